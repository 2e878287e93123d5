use crate::error::{EngineError, Result};

/// Payloads above this size are compressed when a codec is enabled.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 256 * 1024;

const ZSTD_LEVEL: i32 = 3;
const LZ4_LEVEL: u32 = 4;

/// Payload codec. The wire code lands in the result-buffer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    None,
    Zstd,
    Lz4,
}

impl Codec {
    pub fn from_wire(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Codec::None),
            1 => Ok(Codec::Zstd),
            2 => Ok(Codec::Lz4),
            other => Err(EngineError::Validation(format!(
                "unknown compression code: {}",
                other
            ))),
        }
    }

    pub fn wire_code(&self) -> u8 {
        match self {
            Codec::None => 0,
            Codec::Zstd => 1,
            Codec::Lz4 => 2,
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::None => Ok(data.to_vec()),
            Codec::Zstd => zstd::encode_all(data, ZSTD_LEVEL)
                .map_err(|e| EngineError::Internal(format!("zstd compression failed: {}", e))),
            Codec::Lz4 => {
                use std::io::Write;
                let mut encoder = lz4::EncoderBuilder::new()
                    .level(LZ4_LEVEL)
                    .build(Vec::new())
                    .map_err(|e| EngineError::Internal(format!("lz4 encoder failed: {}", e)))?;
                encoder
                    .write_all(data)
                    .map_err(|e| EngineError::Internal(format!("lz4 write failed: {}", e)))?;
                let (out, result) = encoder.finish();
                result.map_err(|e| EngineError::Internal(format!("lz4 finish failed: {}", e)))?;
                Ok(out)
            }
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::None => Ok(data.to_vec()),
            Codec::Zstd => zstd::decode_all(data)
                .map_err(|e| EngineError::Protocol(format!("zstd decompression failed: {}", e))),
            Codec::Lz4 => {
                use std::io::Read;
                let mut decoder = lz4::Decoder::new(data)
                    .map_err(|e| EngineError::Protocol(format!("lz4 decoder failed: {}", e)))?;
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| EngineError::Protocol(format!("lz4 read failed: {}", e)))?;
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_code_roundtrip() {
        for codec in [Codec::None, Codec::Zstd, Codec::Lz4] {
            assert_eq!(Codec::from_wire(codec.wire_code()).unwrap(), codec);
        }
    }

    #[test]
    fn test_from_wire_rejects_unknown() {
        assert!(Codec::from_wire(3).is_err());
        assert!(Codec::from_wire(255).is_err());
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"plain bytes";
        assert_eq!(Codec::None.compress(data).unwrap(), data);
        assert_eq!(Codec::None.decompress(data).unwrap(), data);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let data = vec![7u8; 4096];
        let compressed = Codec::Zstd.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Codec::Zstd.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_lz4_roundtrip() {
        let data = b"abcabcabcabcabcabcabcabcabcabc".repeat(64);
        let compressed = Codec::Lz4.compress(&data).unwrap();
        assert_eq!(Codec::Lz4.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        for codec in [Codec::Zstd, Codec::Lz4] {
            let compressed = codec.compress(&[]).unwrap();
            assert!(codec.decompress(&compressed).unwrap().is_empty());
        }
    }

    #[test]
    fn test_zstd_garbage_fails_decompression() {
        assert!(Codec::Zstd.decompress(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }
}
