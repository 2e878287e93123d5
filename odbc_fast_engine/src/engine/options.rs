use crate::error::{EngineError, Result};
use crate::protocol::Codec;

/// timeout_ms(u32) + max_buffer_bytes(u64) + stream(u8) + compression(u8)
pub const EXEC_OPTIONS_WIRE_LEN: usize = 14;

/// Per-call execution options. A null/absent options buffer means defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Statement timeout. 0 = use the connection default.
    pub timeout_ms: u32,
    /// Refuse to build a result buffer beyond this. 0 = unlimited.
    pub max_buffer_bytes: u64,
    /// Reserved; must be 0 on execute. Streaming uses the stream ops.
    pub stream: bool,
    pub codec: Codec,
}

impl ExecOptions {
    pub fn decode(raw: Option<&[u8]>) -> Result<Self> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        if raw.len() < EXEC_OPTIONS_WIRE_LEN {
            return Err(EngineError::Validation(format!(
                "options buffer must be {} bytes, got {}",
                EXEC_OPTIONS_WIRE_LEN,
                raw.len()
            )));
        }
        let timeout_ms = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let max_buffer_bytes = u64::from_le_bytes([
            raw[4], raw[5], raw[6], raw[7], raw[8], raw[9], raw[10], raw[11],
        ]);
        let stream = raw[12] != 0;
        let codec = Codec::from_wire(raw[13])?;
        Ok(Self {
            timeout_ms,
            max_buffer_bytes,
            stream,
            codec,
        })
    }

    /// Effective statement timeout in whole seconds for the driver
    /// attribute: the call's own value, falling back to the connection
    /// default; 0 means no timeout. Sub-second values round up.
    pub fn timeout_secs(&self, connection_default_ms: u32) -> Option<usize> {
        let ms = if self.timeout_ms != 0 {
            self.timeout_ms
        } else {
            connection_default_ms
        };
        if ms == 0 {
            None
        } else {
            Some((ms.saturating_add(999) / 1000) as usize)
        }
    }
}
