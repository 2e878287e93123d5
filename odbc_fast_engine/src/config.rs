use crate::pool::PoolConfig;
use crate::protocol::DEFAULT_COMPRESSION_THRESHOLD;
use serde::Deserialize;
use std::time::Duration;

/// Engine configuration. The host maps its own environment (e.g. the
/// `ODBC_FAST_*` variables) onto this struct; the engine itself reads no
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool_min_size: u32,
    pub pool_max_size: u32,
    pub pool_idle_timeout_ms: u64,
    pub pool_acquire_timeout_ms: u64,
    /// Driver login timeout for new connections. 0 = driver default.
    pub login_timeout_secs: u32,
    /// Connection-default statement timeout. 0 = no timeout.
    pub default_timeout_ms: u32,
    pub prepared_cache_capacity: usize,
    pub default_chunk_rows: u32,
    pub compression_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_min_size: 0,
            pool_max_size: 10,
            pool_idle_timeout_ms: 300_000,
            pool_acquire_timeout_ms: 30_000,
            login_timeout_secs: 0,
            default_timeout_ms: 0,
            prepared_cache_capacity: 64,
            default_chunk_rows: 1024,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl EngineConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_size: self.pool_min_size,
            max_size: self.pool_max_size,
            idle_timeout: Duration::from_millis(self.pool_idle_timeout_ms),
            acquire_timeout: Duration::from_millis(self.pool_acquire_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.pool_max_size, 10);
        assert_eq!(cfg.prepared_cache_capacity, 64);
        assert_eq!(cfg.default_chunk_rows, 1024);
        assert_eq!(cfg.compression_threshold, 256 * 1024);
        assert_eq!(cfg.pool_config().acquire_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_deserializes_with_partial_overrides() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"pool_max_size": 3, "default_chunk_rows": 256}"#).unwrap();
        assert_eq!(cfg.pool_max_size, 3);
        assert_eq!(cfg.default_chunk_rows, 256);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.pool_acquire_timeout_ms, 30_000);
    }
}
