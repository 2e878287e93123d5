use crate::error::{EngineError, Result};

/// One positional SQL parameter as carried on the wire:
/// tag(u8) + len(u32 LE) + payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    String(String),
    Integer(i32),
    BigInt(i64),
    Decimal(String),
    Binary(Vec<u8>),
}

pub const TAG_NULL: u8 = 0;
pub const TAG_STRING: u8 = 1;
pub const TAG_INTEGER: u8 = 2;
pub const TAG_BIGINT: u8 = 3;
pub const TAG_DECIMAL: u8 = 4;
pub const TAG_BINARY: u8 = 5;

impl ParamValue {
    pub fn tag(&self) -> u8 {
        match self {
            ParamValue::Null => TAG_NULL,
            ParamValue::String(_) => TAG_STRING,
            ParamValue::Integer(_) => TAG_INTEGER,
            ParamValue::BigInt(_) => TAG_BIGINT,
            ParamValue::Decimal(_) => TAG_DECIMAL,
            ParamValue::Binary(_) => TAG_BINARY,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match self {
            ParamValue::Null => out.extend_from_slice(&0u32.to_le_bytes()),
            ParamValue::String(s) | ParamValue::Decimal(s) => {
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            ParamValue::Integer(n) => {
                out.extend_from_slice(&4u32.to_le_bytes());
                out.extend_from_slice(&n.to_le_bytes());
            }
            ParamValue::BigInt(n) => {
                out.extend_from_slice(&8u32.to_le_bytes());
                out.extend_from_slice(&n.to_le_bytes());
            }
            ParamValue::Binary(b) => {
                out.extend_from_slice(&(b.len() as u32).to_le_bytes());
                out.extend_from_slice(b);
            }
        }
    }
}

pub fn encode_params(params: &[ParamValue]) -> Vec<u8> {
    let mut out = Vec::new();
    for p in params {
        p.encode_into(&mut out);
    }
    out
}

/// Decodes a concatenated parameter list. Rejects truncation, wrong fixed
/// widths, invalid UTF-8 and unknown tags.
pub fn decode_params(data: &[u8]) -> Result<Vec<ParamValue>> {
    let mut params = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < 5 {
            return Err(EngineError::Validation(
                "parameter record truncated before payload".to_string(),
            ));
        }
        let tag = rest[0];
        let len = u32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize;
        let record_len = 5usize
            .checked_add(len)
            .ok_or_else(|| EngineError::Validation("parameter length overflow".to_string()))?;
        if rest.len() < record_len {
            return Err(EngineError::Validation(format!(
                "parameter payload truncated: declared {} bytes, {} available",
                len,
                rest.len() - 5
            )));
        }
        let payload = &rest[5..record_len];

        let value = match tag {
            TAG_NULL => ParamValue::Null,
            TAG_STRING => ParamValue::String(utf8_payload(payload, "string")?),
            TAG_INTEGER => {
                let bytes: [u8; 4] = payload.try_into().map_err(|_| {
                    EngineError::Validation(format!("i32 parameter must be 4 bytes, got {}", len))
                })?;
                ParamValue::Integer(i32::from_le_bytes(bytes))
            }
            TAG_BIGINT => {
                let bytes: [u8; 8] = payload.try_into().map_err(|_| {
                    EngineError::Validation(format!("i64 parameter must be 8 bytes, got {}", len))
                })?;
                ParamValue::BigInt(i64::from_le_bytes(bytes))
            }
            TAG_DECIMAL => ParamValue::Decimal(utf8_payload(payload, "decimal")?),
            TAG_BINARY => ParamValue::Binary(payload.to_vec()),
            other => {
                return Err(EngineError::Validation(format!(
                    "unknown parameter tag: {}",
                    other
                )))
            }
        };

        params.push(value);
        offset += record_len;
    }

    Ok(params)
}

fn utf8_payload(payload: &[u8], what: &str) -> Result<String> {
    std::str::from_utf8(payload)
        .map(str::to_string)
        .map_err(|_| EngineError::Validation(format!("{} parameter is not valid UTF-8", what)))
}

/// Tag sequence of a parameter list, used for prepared-statement schemas.
pub fn tags_of(params: &[ParamValue]) -> Vec<u8> {
    params.iter().map(ParamValue::tag).collect()
}
