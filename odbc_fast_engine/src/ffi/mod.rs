//! C boundary. Every function takes primitive arguments and caller-owned
//! buffers, returns a small result code, and never panics across the
//! boundary. Detailed error data is retrieved via `engine_get_error`.
//!
//! String arguments are UTF-8 with explicit length. Output buffers are
//! written up to their capacity; when the result does not fit, the function
//! returns `BUFFER_TOO_SMALL`, stores the requirement in `out_written`, and
//! records a structured error carrying the required size.

// FFI entry points dereference raw pointers after explicit null checks.
#![allow(clippy::not_unsafe_ptr_arg_deref)]

use crate::engine::{Engine, ExecOptions};
use crate::engine::options::EXEC_OPTIONS_WIRE_LEN;
use crate::error::{EngineError, StructuredError};
use crate::handles;
use crate::protocol::decode_params;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

/// Result codes returned by every boundary function.
pub mod codes {
    pub const OK: i32 = 0;
    pub const BUFFER_TOO_SMALL: i32 = 1;
    pub const INVALID_HANDLE: i32 = 2;
    pub const CONNECTION_BUSY: i32 = 3;
    pub const CANCELLED: i32 = 4;
    pub const END_OF_STREAM: i32 = 5;
    pub const CONNECT_ERROR: i32 = 10;
    pub const EXECUTE_ERROR: i32 = 11;
    pub const PROTOCOL_ERROR: i32 = 12;
    pub const POOL_EXHAUSTED: i32 = 13;
    pub const UNSUPPORTED: i32 = 14;
    pub const INTERNAL_ERROR: i32 = 99;
}

static ENGINE: OnceLock<Engine> = OnceLock::new();

fn engine() -> &'static Engine {
    ENGINE.get_or_init(Engine::default)
}

pub fn code_for(err: &EngineError) -> i32 {
    match err {
        EngineError::BufferTooSmall { .. } => codes::BUFFER_TOO_SMALL,
        EngineError::InvalidHandle(_) | EngineError::StatementNotOwned { .. } => {
            codes::INVALID_HANDLE
        }
        EngineError::ConnectionBusy(_) => codes::CONNECTION_BUSY,
        EngineError::Cancelled => codes::CANCELLED,
        EngineError::Connect(_)
        | EngineError::InvalidIdentity(_)
        | EngineError::EnvInitFailed(_) => codes::CONNECT_ERROR,
        EngineError::PoolExhausted { .. } => codes::POOL_EXHAUSTED,
        EngineError::Protocol(_) => codes::PROTOCOL_ERROR,
        EngineError::Unsupported(_) => codes::UNSUPPORTED,
        EngineError::Execute(_)
        | EngineError::Prepare(_)
        | EngineError::Stream(_)
        | EngineError::ConnectionLost(_)
        | EngineError::Validation(_) => codes::EXECUTE_ERROR,
        EngineError::Internal(_) => codes::INTERNAL_ERROR,
    }
}

/// Runs a boundary body under `catch_unwind`; a panic becomes
/// `INTERNAL_ERROR` with a best-effort message in the global error slot.
fn guarded(body: impl FnOnce() -> i32) -> i32 {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(code) => code,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic of unknown type".to_string());
            let _ = engine().capture(
                None,
                EngineError::Internal(format!("panic at boundary: {}", message)),
            );
            codes::INTERNAL_ERROR
        }
    }
}

fn str_arg<'a>(ptr: *const u8, len: u32) -> Result<&'a str, EngineError> {
    if ptr.is_null() {
        return Err(EngineError::Validation("null string pointer".to_string()));
    }
    // Safety: caller guarantees `ptr` points at `len` readable bytes for
    // the duration of the call.
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
    std::str::from_utf8(bytes)
        .map_err(|_| EngineError::Validation("string argument is not valid UTF-8".to_string()))
}

fn bytes_arg<'a>(ptr: *const u8, len: u32) -> Option<&'a [u8]> {
    if ptr.is_null() || len == 0 {
        return None;
    }
    // Safety: caller guarantees `ptr` points at `len` readable bytes.
    Some(unsafe { std::slice::from_raw_parts(ptr, len as usize) })
}

fn opts_arg<'a>(ptr: *const u8) -> Option<&'a [u8]> {
    bytes_arg(ptr, EXEC_OPTIONS_WIRE_LEN as u32)
}

fn params_arg(
    conn_id: Option<u64>,
    ptr: *const u8,
    len: u32,
) -> Result<Vec<crate::protocol::ParamValue>, i32> {
    let Some(raw) = bytes_arg(ptr, len) else {
        return Ok(Vec::new());
    };
    decode_params(raw).map_err(|e| {
        let err = engine().capture(conn_id, EngineError::Protocol(e.to_string()));
        code_for(&err)
    })
}

/// Copies `data` into the caller's buffer. On overflow, stores the required
/// size in `out_written`, records a structured error, and returns
/// `BUFFER_TOO_SMALL`.
fn write_out(
    conn_id: Option<u64>,
    data: &[u8],
    out_buf: *mut u8,
    out_buf_cap: u32,
    out_written: *mut u32,
) -> i32 {
    if out_buf.is_null() || out_written.is_null() {
        let err = engine().capture(
            conn_id,
            EngineError::Validation("null output buffer".to_string()),
        );
        return code_for(&err);
    }
    // Safety: out_written checked non-null; valid for a u32 write.
    unsafe { *out_written = data.len() as u32 };
    if data.len() > out_buf_cap as usize {
        let err = engine().capture(
            conn_id,
            EngineError::BufferTooSmall {
                needed: data.len(),
                capacity: out_buf_cap as usize,
            },
        );
        return code_for(&err);
    }
    // Safety: out_buf checked non-null and large enough for data.len().
    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), out_buf, data.len()) };
    codes::OK
}

/// Initializes the ODBC environment and the engine. Idempotent; a second
/// call is a no-op returning `OK`.
#[no_mangle]
pub extern "C" fn engine_init() -> i32 {
    guarded(|| {
        let _ = engine();
        match handles::init_environment() {
            Ok(_) => codes::OK,
            Err(e) => {
                let err = engine().capture(None, e);
                code_for(&err)
            }
        }
    })
}

/// Best-effort teardown: drains streams, closes prepared caches, releases
/// connections, drains pool idle sets. The environment stays alive until
/// process exit. Idempotent.
#[no_mangle]
pub extern "C" fn engine_shutdown() -> i32 {
    guarded(|| {
        if let Some(engine) = ENGINE.get() {
            engine.shutdown();
        }
        codes::OK
    })
}

#[no_mangle]
pub extern "C" fn engine_connect(
    conn_string_ptr: *const u8,
    conn_string_len: u32,
    out_conn_id: *mut u64,
) -> i32 {
    guarded(|| {
        if out_conn_id.is_null() {
            let _ = engine().capture(
                None,
                EngineError::Validation("null out_conn_id".to_string()),
            );
            return codes::CONNECT_ERROR;
        }
        let conn_string = match str_arg(conn_string_ptr, conn_string_len) {
            Ok(s) => s,
            Err(e) => {
                let _ = engine().capture(None, e);
                return codes::CONNECT_ERROR;
            }
        };
        match engine().connect(conn_string) {
            Ok(conn_id) => {
                // Safety: out_conn_id checked non-null.
                unsafe { *out_conn_id = conn_id };
                codes::OK
            }
            Err(e) => code_for(&e),
        }
    })
}

#[no_mangle]
pub extern "C" fn engine_disconnect(conn_id: u64) -> i32 {
    guarded(|| match engine().disconnect(conn_id) {
        Ok(()) => codes::OK,
        Err(e) => code_for(&e),
    })
}

#[no_mangle]
pub extern "C" fn engine_execute(
    conn_id: u64,
    sql_ptr: *const u8,
    sql_len: u32,
    params_ptr: *const u8,
    params_len: u32,
    opts_ptr: *const u8,
    out_buf: *mut u8,
    out_buf_cap: u32,
    out_written: *mut u32,
) -> i32 {
    guarded(|| {
        let sql = match str_arg(sql_ptr, sql_len) {
            Ok(s) => s,
            Err(e) => {
                let err = engine().capture(Some(conn_id), e);
                return code_for(&err);
            }
        };
        let params = match params_arg(Some(conn_id), params_ptr, params_len) {
            Ok(p) => p,
            Err(code) => return code,
        };
        let opts = match ExecOptions::decode(opts_arg(opts_ptr)) {
            Ok(o) => o,
            Err(e) => {
                let err = engine().capture(Some(conn_id), e);
                return code_for(&err);
            }
        };
        match engine().execute(conn_id, sql, &params, &opts) {
            Ok(data) => write_out(Some(conn_id), &data, out_buf, out_buf_cap, out_written),
            Err(e) => code_for(&e),
        }
    })
}

#[no_mangle]
pub extern "C" fn engine_prepare(
    conn_id: u64,
    sql_ptr: *const u8,
    sql_len: u32,
    out_stmt_id: *mut u64,
) -> i32 {
    guarded(|| {
        if out_stmt_id.is_null() {
            let err = engine().capture(
                Some(conn_id),
                EngineError::Validation("null out_stmt_id".to_string()),
            );
            return code_for(&err);
        }
        let sql = match str_arg(sql_ptr, sql_len) {
            Ok(s) => s,
            Err(e) => {
                let err = engine().capture(Some(conn_id), e);
                return code_for(&err);
            }
        };
        match engine().prepare(conn_id, sql) {
            Ok(stmt_id) => {
                // Safety: out_stmt_id checked non-null.
                unsafe { *out_stmt_id = stmt_id };
                codes::OK
            }
            Err(e) => code_for(&e),
        }
    })
}

#[no_mangle]
pub extern "C" fn engine_execute_prepared(
    stmt_id: u64,
    params_ptr: *const u8,
    params_len: u32,
    opts_ptr: *const u8,
    out_buf: *mut u8,
    out_buf_cap: u32,
    out_written: *mut u32,
) -> i32 {
    guarded(|| {
        let params = match params_arg(None, params_ptr, params_len) {
            Ok(p) => p,
            Err(code) => return code,
        };
        let opts = match ExecOptions::decode(opts_arg(opts_ptr)) {
            Ok(o) => o,
            Err(e) => {
                let err = engine().capture(None, e);
                return code_for(&err);
            }
        };
        match engine().execute_prepared(stmt_id, &params, &opts) {
            Ok(data) => write_out(None, &data, out_buf, out_buf_cap, out_written),
            Err(e) => code_for(&e),
        }
    })
}

#[no_mangle]
pub extern "C" fn engine_stream_open(
    conn_id: u64,
    sql_ptr: *const u8,
    sql_len: u32,
    params_ptr: *const u8,
    params_len: u32,
    chunk_rows: u32,
    opts_ptr: *const u8,
    out_stream_id: *mut u64,
) -> i32 {
    guarded(|| {
        if out_stream_id.is_null() {
            let err = engine().capture(
                Some(conn_id),
                EngineError::Validation("null out_stream_id".to_string()),
            );
            return code_for(&err);
        }
        let sql = match str_arg(sql_ptr, sql_len) {
            Ok(s) => s,
            Err(e) => {
                let err = engine().capture(Some(conn_id), e);
                return code_for(&err);
            }
        };
        let params = match params_arg(Some(conn_id), params_ptr, params_len) {
            Ok(p) => p,
            Err(code) => return code,
        };
        let opts = match ExecOptions::decode(opts_arg(opts_ptr)) {
            Ok(o) => o,
            Err(e) => {
                let err = engine().capture(Some(conn_id), e);
                return code_for(&err);
            }
        };
        match engine().stream_open(conn_id, sql, &params, chunk_rows, &opts) {
            Ok(stream_id) => {
                // Safety: out_stream_id checked non-null.
                unsafe { *out_stream_id = stream_id };
                codes::OK
            }
            Err(e) => code_for(&e),
        }
    })
}

/// Returns `END_OF_STREAM` once the cursor is exhausted; the stream id stays
/// valid until `engine_stream_close`.
#[no_mangle]
pub extern "C" fn engine_stream_next(
    stream_id: u64,
    out_buf: *mut u8,
    out_buf_cap: u32,
    out_written: *mut u32,
) -> i32 {
    guarded(|| match engine().stream_next(stream_id) {
        Ok(Some(chunk)) => write_out(None, &chunk, out_buf, out_buf_cap, out_written),
        Ok(None) => {
            if !out_written.is_null() {
                // Safety: out_written checked non-null.
                unsafe { *out_written = 0 };
            }
            codes::END_OF_STREAM
        }
        Err(e) => code_for(&e),
    })
}

#[no_mangle]
pub extern "C" fn engine_stream_close(stream_id: u64) -> i32 {
    guarded(|| match engine().stream_close(stream_id) {
        Ok(()) => codes::OK,
        Err(e) => code_for(&e),
    })
}

/// Arms cooperative cancellation; the connection's current or next driver
/// interaction returns `CANCELLED`. `UNSUPPORTED` when the driver cannot
/// cancel.
#[no_mangle]
pub extern "C" fn engine_cancel(conn_id: u64) -> i32 {
    guarded(|| match engine().cancel(conn_id) {
        Ok(()) => codes::OK,
        Err(e) => code_for(&e),
    })
}

/// Writes the last structured error for `conn_id_or_zero` (0 = the global
/// slot) as a StructuredError record. Connections without a recorded error
/// fall back to the global slot, then to a synthetic empty record.
#[no_mangle]
pub extern "C" fn engine_get_error(
    conn_id_or_zero: u64,
    out_buf: *mut u8,
    out_buf_cap: u32,
    out_written: *mut u32,
) -> i32 {
    guarded(|| {
        let conn_id = if conn_id_or_zero == 0 {
            None
        } else {
            Some(conn_id_or_zero)
        };
        let error = engine()
            .last_error(conn_id)
            .unwrap_or_else(|| StructuredError::synthetic("no error"));
        let data = error.serialize();

        if out_buf.is_null() || out_written.is_null() {
            return codes::INTERNAL_ERROR;
        }
        // Safety: out_written checked non-null.
        unsafe { *out_written = data.len() as u32 };
        if data.len() > out_buf_cap as usize {
            return codes::BUFFER_TOO_SMALL;
        }
        // Safety: out_buf checked non-null and large enough.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), out_buf, data.len()) };
        codes::OK
    })
}

/// Serializes a metrics snapshot as a ResultBuffer with one synthetic row.
#[no_mangle]
pub extern "C" fn engine_get_metrics(
    out_buf: *mut u8,
    out_buf_cap: u32,
    out_written: *mut u32,
) -> i32 {
    guarded(|| {
        let data = engine().metrics().snapshot().to_buffer();
        write_out(None, &data, out_buf, out_buf_cap, out_written)
    })
}
