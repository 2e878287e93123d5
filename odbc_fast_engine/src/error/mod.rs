use odbc_api::handles::Record as DiagnosticRecord;
use thiserror::Error;

/// Error category for decision-making (retry, fail fast, invalidate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Retry may resolve (timeouts, deadlock victims, pool pressure).
    Transient,
    /// Retryable, but the connection itself must be discarded first.
    ConnectionLost,
    /// Driver internal failure or invalid engine state.
    Fatal,
    /// Invalid caller input (SQL, parameters, options, buffers).
    Validation,
}

/// SQLSTATE + native code + message, extracted from the first diagnostic
/// record of a failed driver call. Synthetic errors carry SQLSTATE `00000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredError {
    pub sqlstate: [u8; 5],
    pub native_code: i32,
    pub message: String,
}

pub const SQLSTATE_SYNTHETIC: [u8; 5] = *b"00000";
pub const SQLSTATE_NO_CONNECTION: [u8; 5] = *b"08003";

impl StructuredError {
    pub fn synthetic(message: impl Into<String>) -> Self {
        Self {
            sqlstate: SQLSTATE_SYNTHETIC,
            native_code: 0,
            message: message.into(),
        }
    }

    pub fn sqlstate_str(&self) -> &str {
        std::str::from_utf8(&self.sqlstate).unwrap_or("?????")
    }

    /// Wire layout: sqlstate(5) + native_code(i32 LE) + msg_len(u32 LE) + msg.
    pub fn serialize(&self) -> Vec<u8> {
        let msg = self.message.as_bytes();
        let mut out = Vec::with_capacity(13 + msg.len());
        out.extend_from_slice(&self.sqlstate);
        out.extend_from_slice(&self.native_code.to_le_bytes());
        out.extend_from_slice(&(msg.len() as u32).to_le_bytes());
        out.extend_from_slice(msg);
        out
    }

    /// Returns `None` on any truncation or invalid UTF-8; never panics.
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < 13 {
            return None;
        }
        let mut sqlstate = [0u8; 5];
        sqlstate.copy_from_slice(&data[0..5]);
        let native_code = i32::from_le_bytes([data[5], data[6], data[7], data[8]]);
        let msg_len = u32::from_le_bytes([data[9], data[10], data[11], data[12]]) as usize;
        if data.len() < 13 + msg_len {
            return None;
        }
        let message = String::from_utf8(data[13..13 + msg_len].to_vec()).ok()?;
        Some(Self {
            sqlstate,
            native_code,
            message,
        })
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] ({}) {}",
            self.sqlstate_str(),
            self.native_code,
            self.message
        )
    }
}

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("connect failed: {0}")]
    Connect(StructuredError),

    #[error("execute failed: {0}")]
    Execute(StructuredError),

    #[error("prepare failed: {0}")]
    Prepare(StructuredError),

    #[error("stream failed: {0}")]
    Stream(StructuredError),

    #[error("connection lost: {0}")]
    ConnectionLost(StructuredError),

    #[error("environment initialization failed: {0}")]
    EnvInitFailed(StructuredError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("pool exhausted for {identity} after {waited_ms}ms")]
    PoolExhausted { identity: String, waited_ms: u64 },

    #[error("connection {0} is busy with an open stream")]
    ConnectionBusy(u64),

    #[error("operation cancelled")]
    Cancelled,

    #[error("unsupported by driver: {0}")]
    Unsupported(String),

    #[error("invalid handle: {0}")]
    InvalidHandle(u64),

    #[error("statement {stmt_id} is not owned by connection {conn_id}")]
    StatementNotOwned { stmt_id: u64, conn_id: u64 },

    #[error("buffer too small: need {needed} bytes, capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("invalid pool identity: {0}")]
    InvalidIdentity(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Category of a driver-reported SQLSTATE, assigned once at capture.
pub fn classify_sqlstate(sqlstate: &[u8; 5]) -> ErrorCategory {
    // Class 08: connection exceptions.
    if &sqlstate[0..2] == b"08" {
        return ErrorCategory::ConnectionLost;
    }
    // Deadlock victim and driver timeouts are retryable as-is.
    if sqlstate == b"40001" || sqlstate == b"40P01" || sqlstate == b"HYT00" || sqlstate == b"HYT01"
    {
        return ErrorCategory::Transient;
    }
    // Syntax / access violations, data and cardinality exceptions.
    match &sqlstate[0..2] {
        b"42" | b"22" | b"21" | b"07" => ErrorCategory::Validation,
        _ => ErrorCategory::Fatal,
    }
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Connect(e)
            | EngineError::Execute(e)
            | EngineError::Prepare(e)
            | EngineError::Stream(e) => classify_sqlstate(&e.sqlstate),
            EngineError::ConnectionLost(_) | EngineError::InvalidHandle(_) => {
                ErrorCategory::ConnectionLost
            }
            EngineError::PoolExhausted { .. } | EngineError::Cancelled => ErrorCategory::Transient,
            EngineError::Protocol(_)
            | EngineError::Validation(_)
            | EngineError::InvalidIdentity(_)
            | EngineError::BufferTooSmall { .. }
            | EngineError::StatementNotOwned { .. } => ErrorCategory::Validation,
            EngineError::ConnectionBusy(_)
            | EngineError::Unsupported(_)
            | EngineError::EnvInitFailed(_)
            | EngineError::Internal(_) => ErrorCategory::Fatal,
        }
    }

    /// True when the caller may retry the operation as-is (possibly on a
    /// fresh connection for `ConnectionLost`). The engine never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ConnectionLost
        )
    }

    pub fn structured(&self) -> StructuredError {
        match self {
            EngineError::Connect(e)
            | EngineError::Execute(e)
            | EngineError::Prepare(e)
            | EngineError::Stream(e)
            | EngineError::ConnectionLost(e)
            | EngineError::EnvInitFailed(e) => e.clone(),
            EngineError::InvalidHandle(_) => StructuredError {
                sqlstate: SQLSTATE_NO_CONNECTION,
                native_code: 0,
                message: self.to_string(),
            },
            _ => StructuredError::synthetic(self.to_string()),
        }
    }
}

/// Reads the first diagnostic record carried by an `odbc-api` error.
/// Errors without diagnostics become a generic unknown-driver error.
pub fn structured_from_driver(err: &odbc_api::Error) -> StructuredError {
    use odbc_api::Error as DriverError;
    let record = match err {
        DriverError::Diagnostics { record, .. } => record,
        DriverError::UnsupportedOdbcApiVersion(record) => record,
        DriverError::InvalidRowArraySize { record, .. } => record,
        DriverError::UnableToRepresentNull(record) => record,
        DriverError::OracleOdbcDriverDoesNotSupport64Bit(record) => record,
        other => return StructuredError::synthetic(format!("unknown driver error: {}", other)),
    };
    from_diagnostic_record(record)
}

fn from_diagnostic_record(record: &DiagnosticRecord) -> StructuredError {
    StructuredError {
        sqlstate: record.state.0,
        native_code: record.native_error,
        message: record.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
