use odbc_api::DataType;

/// Concise ODBC SQL data type codes as they appear in column metadata.
/// Negative driver codes are carried as their two's-complement u16 image.
pub mod sql_type {
    pub const CHAR: i16 = 1;
    pub const NUMERIC: i16 = 2;
    pub const DECIMAL: i16 = 3;
    pub const INTEGER: i16 = 4;
    pub const SMALLINT: i16 = 5;
    pub const FLOAT: i16 = 6;
    pub const REAL: i16 = 7;
    pub const DOUBLE: i16 = 8;
    pub const VARCHAR: i16 = 12;
    pub const DATE: i16 = 91;
    pub const TIME: i16 = 92;
    pub const TIMESTAMP: i16 = 93;
    pub const LONGVARCHAR: i16 = -1;
    pub const BINARY: i16 = -2;
    pub const VARBINARY: i16 = -3;
    pub const LONGVARBINARY: i16 = -4;
    pub const BIGINT: i16 = -5;
    pub const TINYINT: i16 = -6;
    pub const BIT: i16 = -7;
    pub const WCHAR: i16 = -8;
    pub const WVARCHAR: i16 = -9;
    pub const NULL: i16 = 0;
}

/// How a result column's cells are extracted and encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// 4-byte little-endian i32.
    Integer,
    /// 8-byte little-endian i64.
    BigInt,
    /// Raw bytes as the driver returns them.
    Binary,
    /// UTF-8 text (also covers decimals, dates and anything else).
    Text,
}

pub fn cell_kind_for(sql_type_code: i16) -> CellKind {
    match sql_type_code {
        sql_type::INTEGER | sql_type::SMALLINT | sql_type::TINYINT | sql_type::BIT => {
            CellKind::Integer
        }
        sql_type::BIGINT => CellKind::BigInt,
        sql_type::BINARY | sql_type::VARBINARY | sql_type::LONGVARBINARY => CellKind::Binary,
        _ => CellKind::Text,
    }
}

pub fn sql_type_code(data_type: &DataType) -> i16 {
    match data_type {
        DataType::Char { .. } => sql_type::CHAR,
        DataType::WChar { .. } => sql_type::WCHAR,
        DataType::Numeric { .. } => sql_type::NUMERIC,
        DataType::Decimal { .. } => sql_type::DECIMAL,
        DataType::Integer => sql_type::INTEGER,
        DataType::SmallInt => sql_type::SMALLINT,
        DataType::Float { .. } => sql_type::FLOAT,
        DataType::Real => sql_type::REAL,
        DataType::Double => sql_type::DOUBLE,
        DataType::Varchar { .. } => sql_type::VARCHAR,
        DataType::WVarchar { .. } => sql_type::WVARCHAR,
        DataType::LongVarchar { .. } => sql_type::LONGVARCHAR,
        DataType::Date => sql_type::DATE,
        DataType::Time { .. } => sql_type::TIME,
        DataType::Timestamp { .. } => sql_type::TIMESTAMP,
        DataType::BigInt => sql_type::BIGINT,
        DataType::TinyInt => sql_type::TINYINT,
        DataType::Bit => sql_type::BIT,
        DataType::Binary { .. } => sql_type::BINARY,
        DataType::Varbinary { .. } => sql_type::VARBINARY,
        DataType::LongVarbinary { .. } => sql_type::LONGVARBINARY,
        _ => sql_type::VARCHAR,
    }
}

/// Declared column size as reported by the driver's type descriptor:
/// character/binary length, or precision for exact numerics, 0 if unknown.
pub fn declared_size(data_type: &DataType) -> u32 {
    match data_type {
        DataType::Char { length }
        | DataType::WChar { length }
        | DataType::Varchar { length }
        | DataType::WVarchar { length }
        | DataType::LongVarchar { length }
        | DataType::Binary { length }
        | DataType::Varbinary { length }
        | DataType::LongVarbinary { length } => {
            length.map(|l| l.get() as u32).unwrap_or(0)
        }
        DataType::Numeric { precision, .. } | DataType::Decimal { precision, .. } => {
            *precision as u32
        }
        DataType::Integer => 10,
        DataType::SmallInt => 5,
        DataType::BigInt => 19,
        DataType::TinyInt => 3,
        DataType::Bit => 1,
        _ => 0,
    }
}

/// SQL type a positional parameter tag binds as.
pub fn sql_type_for_param_tag(tag: u8) -> i16 {
    match tag {
        0 => sql_type::NULL,
        1 => sql_type::VARCHAR,
        2 => sql_type::INTEGER,
        3 => sql_type::BIGINT,
        4 => sql_type::DECIMAL,
        5 => sql_type::VARBINARY,
        _ => sql_type::VARCHAR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    #[test]
    fn test_sql_type_code_for_common_types() {
        assert_eq!(sql_type_code(&DataType::Integer), 4);
        assert_eq!(sql_type_code(&DataType::BigInt), -5);
        assert_eq!(
            sql_type_code(&DataType::Varchar {
                length: NonZeroUsize::new(64)
            }),
            12
        );
        assert_eq!(
            sql_type_code(&DataType::Decimal {
                precision: 10,
                scale: 2
            }),
            3
        );
        assert_eq!(sql_type_code(&DataType::Date), 91);
        assert_eq!(sql_type_code(&DataType::Timestamp { precision: 3 }), 93);
        assert_eq!(
            sql_type_code(&DataType::Varbinary {
                length: NonZeroUsize::new(16)
            }),
            -3
        );
    }

    #[test]
    fn test_sql_type_code_unknown_defaults_to_varchar() {
        assert_eq!(sql_type_code(&DataType::Unknown), sql_type::VARCHAR);
    }

    #[test]
    fn test_cell_kind_integer_family() {
        assert_eq!(cell_kind_for(sql_type::INTEGER), CellKind::Integer);
        assert_eq!(cell_kind_for(sql_type::SMALLINT), CellKind::Integer);
        assert_eq!(cell_kind_for(sql_type::TINYINT), CellKind::Integer);
        assert_eq!(cell_kind_for(sql_type::BIT), CellKind::Integer);
    }

    #[test]
    fn test_cell_kind_bigint_and_binary() {
        assert_eq!(cell_kind_for(sql_type::BIGINT), CellKind::BigInt);
        assert_eq!(cell_kind_for(sql_type::BINARY), CellKind::Binary);
        assert_eq!(cell_kind_for(sql_type::VARBINARY), CellKind::Binary);
        assert_eq!(cell_kind_for(sql_type::LONGVARBINARY), CellKind::Binary);
    }

    #[test]
    fn test_cell_kind_text_fallback() {
        assert_eq!(cell_kind_for(sql_type::VARCHAR), CellKind::Text);
        assert_eq!(cell_kind_for(sql_type::DECIMAL), CellKind::Text);
        assert_eq!(cell_kind_for(sql_type::TIMESTAMP), CellKind::Text);
        assert_eq!(cell_kind_for(sql_type::DOUBLE), CellKind::Text);
    }

    #[test]
    fn test_declared_size_character_and_numeric() {
        assert_eq!(
            declared_size(&DataType::Varchar {
                length: NonZeroUsize::new(255)
            }),
            255
        );
        assert_eq!(
            declared_size(&DataType::Decimal {
                precision: 18,
                scale: 4
            }),
            18
        );
        assert_eq!(declared_size(&DataType::Integer), 10);
        assert_eq!(declared_size(&DataType::Date), 0);
    }

    #[test]
    fn test_param_tag_sql_types() {
        assert_eq!(sql_type_for_param_tag(0), sql_type::NULL);
        assert_eq!(sql_type_for_param_tag(1), sql_type::VARCHAR);
        assert_eq!(sql_type_for_param_tag(2), sql_type::INTEGER);
        assert_eq!(sql_type_for_param_tag(3), sql_type::BIGINT);
        assert_eq!(sql_type_for_param_tag(4), sql_type::DECIMAL);
        assert_eq!(sql_type_for_param_tag(5), sql_type::VARBINARY);
    }
}
