pub mod compression;
pub mod decoder;
pub mod encoder;
pub mod param_value;
pub mod row_set;
pub mod types;

pub use compression::{Codec, DEFAULT_COMPRESSION_THRESHOLD};
pub use decoder::ResultDecoder;
pub use encoder::{EncodeLimits, ResultEncoder, HEADER_SIZE, MAGIC, NULL_CELL, VERSION};
pub use param_value::{decode_params, encode_params, tags_of, ParamValue};
pub use row_set::{ColumnDesc, RowSet};
pub use types::{cell_kind_for, declared_size, sql_type, sql_type_code, CellKind};
