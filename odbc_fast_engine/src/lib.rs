pub mod config;
pub mod engine;
mod error;
pub mod ffi;
mod handles;
pub mod observability;
pub mod pool;
pub mod protocol;

pub use config::EngineConfig;
pub use engine::{ConnState, DriverCapabilities, Engine, ExecOptions};
pub use error::{EngineError, ErrorCategory, Result, StructuredError};
pub use protocol::{
    decode_params, encode_params, Codec, ParamValue, ResultDecoder, ResultEncoder, RowSet,
};

#[cfg(feature = "test-helpers")]
pub mod test_helpers {
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// Loads env vars from a `.env` file (once). Used by the DSN-gated
    /// integration tests.
    pub fn load_dotenv() {
        INIT.call_once(|| {
            let _ = dotenvy::dotenv();
        });
    }

    /// Connection string for integration tests, when one is configured.
    pub fn test_dsn() -> Option<String> {
        load_dotenv();
        std::env::var("ODBC_FAST_TEST_DSN")
            .ok()
            .filter(|s| !s.is_empty())
    }
}
