use crate::error::{EngineError, Result};
use crate::protocol::compression::{Codec, DEFAULT_COMPRESSION_THRESHOLD};
use crate::protocol::row_set::RowSet;

pub const MAGIC: u32 = 0x4F44_4243;
pub const VERSION: u16 = 1;
/// magic(4) + version(2) + col_count(4) + row_count(4) + payload_size(4) + compression(1)
pub const HEADER_SIZE: usize = 19;
/// Cell length prefix encoding SQL NULL.
pub const NULL_CELL: u32 = 0xFFFF_FFFF;

/// Knobs applied while a result set is serialized.
#[derive(Debug, Clone, Copy)]
pub struct EncodeLimits {
    /// Refuse to produce a buffer larger than this. 0 = unlimited.
    pub max_buffer_bytes: u64,
    pub codec: Codec,
    pub compression_threshold: usize,
}

impl Default for EncodeLimits {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 0,
            codec: Codec::None,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

pub struct ResultEncoder;

impl ResultEncoder {
    /// Encodes without compression and without a size limit.
    pub fn encode(rows: &RowSet) -> Vec<u8> {
        // Limits are all-permissive, so this cannot fail.
        Self::encode_with_limits(rows, &EncodeLimits::default())
            .unwrap_or_default()
    }

    pub fn encode_with_limits(rows: &RowSet, limits: &EncodeLimits) -> Result<Vec<u8>> {
        let payload = Self::payload(rows, limits)?;

        let (payload, codec) = if limits.codec != Codec::None
            && payload.len() > limits.compression_threshold
        {
            (limits.codec.compress(&payload)?, limits.codec)
        } else {
            (payload, Codec::None)
        };

        let total = HEADER_SIZE + payload.len();
        check_limit(total, limits)?;

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(rows.column_count() as u32).to_le_bytes());
        out.extend_from_slice(&(rows.row_count() as u32).to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.push(codec.wire_code());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    fn payload(rows: &RowSet, limits: &EncodeLimits) -> Result<Vec<u8>> {
        let mut out = Vec::new();

        for col in &rows.columns {
            out.extend_from_slice(&(col.name.len() as u16).to_le_bytes());
            out.extend_from_slice(col.name.as_bytes());
            out.extend_from_slice(&(col.sql_type as u16).to_le_bytes());
            out.push(u8::from(col.nullable));
            out.extend_from_slice(&col.declared_size.to_le_bytes());
        }

        for row in &rows.rows {
            for cell in row {
                match cell {
                    Some(data) => {
                        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
                        out.extend_from_slice(data);
                    }
                    None => out.extend_from_slice(&NULL_CELL.to_le_bytes()),
                }
            }
            // Bail out before the uncompressed payload outgrows the limit;
            // compression can only shrink it further.
            check_limit(HEADER_SIZE + out.len(), limits)?;
        }

        Ok(out)
    }
}

fn check_limit(size: usize, limits: &EncodeLimits) -> Result<()> {
    if limits.max_buffer_bytes != 0 && size as u64 > limits.max_buffer_bytes {
        return Err(EngineError::BufferTooSmall {
            needed: size,
            capacity: limits.max_buffer_bytes as usize,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::sql_type;

    fn sample() -> RowSet {
        let mut rs = RowSet::new();
        rs.add_column("id".to_string(), sql_type::INTEGER, false, 10);
        rs.add_column("name".to_string(), sql_type::VARCHAR, true, 32);
        rs.add_row(vec![Some(1i32.to_le_bytes().to_vec()), Some(b"a".to_vec())]);
        rs.add_row(vec![Some(2i32.to_le_bytes().to_vec()), None]);
        rs
    }

    #[test]
    fn test_encode_empty_row_set_is_header_only() {
        let encoded = ResultEncoder::encode(&RowSet::new());
        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(u32::from_le_bytes(encoded[0..4].try_into().unwrap()), MAGIC);
        assert_eq!(
            u16::from_le_bytes(encoded[4..6].try_into().unwrap()),
            VERSION
        );
        assert_eq!(u32::from_le_bytes(encoded[6..10].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(encoded[10..14].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(encoded[14..18].try_into().unwrap()), 0);
        assert_eq!(encoded[18], 0);
    }

    #[test]
    fn test_header_counts_match_row_set() {
        let encoded = ResultEncoder::encode(&sample());
        assert_eq!(u32::from_le_bytes(encoded[6..10].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(encoded[10..14].try_into().unwrap()), 2);
        let payload_size = u32::from_le_bytes(encoded[14..18].try_into().unwrap()) as usize;
        assert_eq!(encoded.len(), HEADER_SIZE + payload_size);
    }

    #[test]
    fn test_column_metadata_layout() {
        let encoded = ResultEncoder::encode(&sample());
        let meta = &encoded[HEADER_SIZE..];

        // First column: "id", INTEGER, not nullable, size 10.
        assert_eq!(u16::from_le_bytes(meta[0..2].try_into().unwrap()), 2);
        assert_eq!(&meta[2..4], b"id");
        assert_eq!(
            u16::from_le_bytes(meta[4..6].try_into().unwrap()),
            sql_type::INTEGER as u16
        );
        assert_eq!(meta[6], 0);
        assert_eq!(u32::from_le_bytes(meta[7..11].try_into().unwrap()), 10);
    }

    #[test]
    fn test_null_cell_sentinel() {
        let mut rs = RowSet::new();
        rs.add_column("v".to_string(), sql_type::VARCHAR, true, 8);
        rs.add_row(vec![None]);
        let encoded = ResultEncoder::encode(&rs);
        // header + metadata (2 + 1 + 2 + 1 + 4 = 10) + one null cell (4)
        let cell = &encoded[encoded.len() - 4..];
        assert_eq!(u32::from_le_bytes(cell.try_into().unwrap()), NULL_CELL);
    }

    #[test]
    fn test_negative_sql_type_survives_u16_image() {
        let mut rs = RowSet::new();
        rs.add_column("v".to_string(), sql_type::BIGINT, true, 19);
        let encoded = ResultEncoder::encode(&rs);
        let meta = &encoded[HEADER_SIZE..];
        let raw = u16::from_le_bytes(meta[3..5].try_into().unwrap());
        assert_eq!(raw as i16, sql_type::BIGINT);
    }

    #[test]
    fn test_compression_kicks_in_above_threshold() {
        let mut rs = RowSet::new();
        rs.add_column("blob".to_string(), sql_type::VARCHAR, true, 0);
        for _ in 0..64 {
            rs.add_row(vec![Some(vec![b'x'; 256])]);
        }
        let limits = EncodeLimits {
            max_buffer_bytes: 0,
            codec: Codec::Zstd,
            compression_threshold: 1024,
        };
        let encoded = ResultEncoder::encode_with_limits(&rs, &limits).unwrap();
        assert_eq!(encoded[18], Codec::Zstd.wire_code());
        let raw = ResultEncoder::encode(&rs);
        assert!(encoded.len() < raw.len());
    }

    #[test]
    fn test_compression_skipped_below_threshold() {
        let limits = EncodeLimits {
            max_buffer_bytes: 0,
            codec: Codec::Zstd,
            compression_threshold: 1 << 20,
        };
        let encoded = ResultEncoder::encode_with_limits(&sample(), &limits).unwrap();
        assert_eq!(encoded[18], 0);
    }

    #[test]
    fn test_max_buffer_bytes_enforced() {
        let limits = EncodeLimits {
            max_buffer_bytes: 24,
            codec: Codec::None,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        };
        let err = ResultEncoder::encode_with_limits(&sample(), &limits).unwrap_err();
        match err {
            EngineError::BufferTooSmall { needed, capacity } => {
                assert!(needed > 24);
                assert_eq!(capacity, 24);
            }
            other => panic!("expected BufferTooSmall, got {:?}", other),
        }
    }
}
