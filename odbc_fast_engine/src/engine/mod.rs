pub mod bind;
pub mod capabilities;
pub mod connection;
pub mod options;
pub mod prepared;
pub mod query;
pub mod streaming;

pub use capabilities::DriverCapabilities;
pub use connection::{ConnState, ConnectionRecord};
pub use options::ExecOptions;
pub use prepared::{fingerprint, PreparedCache, PreparedEntry};
pub use streaming::StreamHandle;

use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorCategory, Result, StructuredError};
use crate::observability::{Metrics, OpClass};
use crate::pool::{OdbcFactory, PoolIdentity, PoolManager};
use crate::protocol::{tags_of, EncodeLimits, ParamValue, ResultEncoder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use zeroize::Zeroizing;

#[derive(Clone)]
struct StatementRef {
    conn_id: u64,
    fingerprint: String,
}

/// The execution engine: owns the connection registry, the pool, the
/// statement and stream registries and the metrics. All operations are
/// blocking and thread-safe; the boundary layer calls straight into here.
pub struct Engine {
    config: EngineConfig,
    pool: PoolManager<OdbcFactory>,
    records: RwLock<HashMap<u64, Arc<ConnectionRecord>>>,
    statements: RwLock<HashMap<u64, StatementRef>>,
    streams: RwLock<HashMap<u64, u64>>,
    next_conn_id: AtomicU64,
    next_stmt_id: AtomicU64,
    next_stream_id: AtomicU64,
    metrics: Arc<Metrics>,
    /// Mirror of the last error observed by calls without a connection id.
    global_error: Mutex<Option<StructuredError>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let factory = OdbcFactory {
            login_timeout_secs: config.login_timeout_secs,
        };
        let pool = PoolManager::new(factory, config.pool_config());
        Self {
            config,
            pool,
            records: RwLock::new(HashMap::new()),
            statements: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            next_stmt_id: AtomicU64::new(1),
            next_stream_id: AtomicU64::new(1),
            metrics: Arc::new(Metrics::new()),
            global_error: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Captures an error into the owning connection's slot (when there is
    /// one), mirrors it globally, bumps the error counters, and breaks the
    /// connection on a connection-lost category. Returns the error for `?`.
    pub fn capture(&self, conn_id: Option<u64>, err: EngineError) -> EngineError {
        let structured = err.structured();
        let category = err.category();
        self.metrics.record_error(category);

        if let Some(conn_id) = conn_id {
            if let Some(record) = self.record(conn_id) {
                record.set_error(structured.clone());
                if category == ErrorCategory::ConnectionLost
                    && !matches!(err, EngineError::InvalidHandle(_))
                {
                    record.mark_broken();
                    self.invalidate_prepared(&record);
                }
            }
        }
        if let Ok(mut slot) = self.global_error.lock() {
            *slot = Some(structured);
        }
        err
    }

    fn fail<T>(&self, conn_id: Option<u64>, err: EngineError) -> Result<T> {
        Err(self.capture(conn_id, err))
    }

    /// Last error for a connection, falling back to the global slot for
    /// unknown ids or calls without one.
    pub fn last_error(&self, conn_id: Option<u64>) -> Option<StructuredError> {
        if let Some(conn_id) = conn_id {
            if let Some(err) = self.record(conn_id).and_then(|r| r.last_error()) {
                return Some(err);
            }
        }
        self.global_error.lock().ok().and_then(|slot| slot.clone())
    }

    fn record(&self, conn_id: u64) -> Option<Arc<ConnectionRecord>> {
        self.records.read().ok()?.get(&conn_id).cloned()
    }

    fn require_record(&self, conn_id: u64) -> Result<Arc<ConnectionRecord>> {
        match self.record(conn_id) {
            Some(record) => Ok(record),
            None => self.fail(None, EngineError::InvalidHandle(conn_id)),
        }
    }

    /// Rejects operations on broken or stream-busy connections, and
    /// consumes a pending cancellation.
    fn check_ready(&self, record: &Arc<ConnectionRecord>) -> Result<()> {
        if record.is_broken() {
            let structured = record
                .last_error()
                .unwrap_or_else(|| StructuredError::synthetic("connection is broken"));
            return self.fail(Some(record.id), EngineError::ConnectionLost(structured));
        }
        if record.open_stream_count() > 0 {
            return self.fail(Some(record.id), EngineError::ConnectionBusy(record.id));
        }
        if record.take_cancel() {
            return self.fail(Some(record.id), EngineError::Cancelled);
        }
        Ok(())
    }

    fn limits(&self, opts: &ExecOptions) -> EncodeLimits {
        EncodeLimits {
            max_buffer_bytes: opts.max_buffer_bytes,
            codec: opts.codec,
            compression_threshold: self.config.compression_threshold,
        }
    }

    pub fn connect(&self, conn_string: &str) -> Result<u64> {
        let started = Instant::now();
        let conn_string = Zeroizing::new(conn_string.to_string());

        let identity = match PoolIdentity::parse(&conn_string) {
            Ok(identity) => identity,
            Err(e) => return self.fail(None, e),
        };
        let capabilities = DriverCapabilities::detect(&conn_string);

        let lease = match self.pool.acquire(&identity, &conn_string) {
            Ok(lease) => lease,
            Err(e) => return self.fail(None, e),
        };

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let record = Arc::new(ConnectionRecord::new(
            conn_id,
            identity,
            capabilities,
            lease,
            self.config.default_timeout_ms,
            self.config.prepared_cache_capacity,
        ));
        self.records
            .write()
            .map_err(|_| EngineError::Internal("registry poisoned".to_string()))?
            .insert(conn_id, record);

        self.metrics.record_connection_opened();
        self.metrics
            .record_latency(OpClass::Connect, started.elapsed());
        log::debug!("connection {} opened", conn_id);
        Ok(conn_id)
    }

    pub fn disconnect(&self, conn_id: u64) -> Result<()> {
        let record = {
            let mut records = self
                .records
                .write()
                .map_err(|_| EngineError::Internal("registry poisoned".to_string()))?;
            records.remove(&conn_id)
        };
        let Some(record) = record else {
            return self.fail(None, EngineError::InvalidHandle(conn_id));
        };

        for stream_id in record.close_all_streams() {
            if let Ok(mut streams) = self.streams.write() {
                streams.remove(&stream_id);
            }
        }
        for entry in record.clear_prepared() {
            if let Ok(mut statements) = self.statements.write() {
                statements.remove(&entry.stmt_id);
            }
        }
        record.release_lease(!record.is_broken());

        self.metrics.record_connection_closed();
        log::debug!("connection {} closed", conn_id);
        Ok(())
    }

    pub fn execute(
        &self,
        conn_id: u64,
        sql: &str,
        params: &[ParamValue],
        opts: &ExecOptions,
    ) -> Result<Vec<u8>> {
        let started = Instant::now();
        let record = self.require_record(conn_id)?;
        self.check_ready(&record)?;
        if opts.stream {
            return self.fail(
                Some(conn_id),
                EngineError::Validation(
                    "stream option must be 0 on execute; use the stream operations".to_string(),
                ),
            );
        }

        let timeout = opts.timeout_secs(record.default_timeout_ms);
        let rows = record
            .with_connection(|conn| query::run_statement(conn, sql, params, timeout))
            .map_err(|e| self.capture(Some(conn_id), e))?;

        let encoded = ResultEncoder::encode_with_limits(&rows, &self.limits(opts))
            .map_err(|e| self.capture(Some(conn_id), e))?;

        self.metrics.record_query();
        self.metrics.add_bytes_encoded(encoded.len() as u64);
        self.metrics
            .record_latency(OpClass::Execute, started.elapsed());
        Ok(encoded)
    }

    /// Registers `sql` in the connection's prepared cache. Re-preparing an
    /// already cached fingerprint returns the existing statement id.
    pub fn prepare(&self, conn_id: u64, sql: &str) -> Result<u64> {
        let record = self.require_record(conn_id)?;
        self.check_ready(&record)?;
        if !record.capabilities.supports_prepared_statements {
            return self.fail(
                Some(conn_id),
                EngineError::Unsupported("prepared statements".to_string()),
            );
        }

        let fp = fingerprint(sql);
        let (stmt_id, inserted, evicted) = record.with_prepared(|cache| {
            if let Some(entry) = cache.get_promote(&fp) {
                return (entry.stmt_id, false, None);
            }
            let stmt_id = self.next_stmt_id.fetch_add(1, Ordering::SeqCst);
            let entry = PreparedEntry::new(stmt_id, fp.clone(), sql.to_string());
            let evicted = cache.insert(entry);
            (stmt_id, true, evicted)
        })?;

        if inserted {
            if let Ok(mut statements) = self.statements.write() {
                statements.insert(
                    stmt_id,
                    StatementRef {
                        conn_id,
                        fingerprint: fp,
                    },
                );
                if let Some(victim) = evicted {
                    statements.remove(&victim.stmt_id);
                }
            }
        }
        Ok(stmt_id)
    }

    pub fn execute_prepared(
        &self,
        stmt_id: u64,
        params: &[ParamValue],
        opts: &ExecOptions,
    ) -> Result<Vec<u8>> {
        let started = Instant::now();
        let sref = {
            let statements = self
                .statements
                .read()
                .map_err(|_| EngineError::Internal("statement registry poisoned".to_string()))?;
            statements.get(&stmt_id).cloned()
        };
        let Some(sref) = sref else {
            return self.fail(None, EngineError::InvalidHandle(stmt_id));
        };

        // A prepared statement is only valid on the connection that
        // prepared it; a disconnected owner invalidates it.
        let Some(record) = self.record(sref.conn_id) else {
            return self.fail(None, EngineError::InvalidHandle(stmt_id));
        };
        self.check_ready(&record)?;
        if opts.stream {
            return self.fail(
                Some(record.id),
                EngineError::Validation("stream option must be 0 on execute".to_string()),
            );
        }

        let tags = tags_of(params);
        let (sql, cache_hit) = match record.with_prepared(|cache| {
            let Some(entry) = cache.get_promote(&sref.fingerprint) else {
                return Err(EngineError::InvalidHandle(stmt_id));
            };
            if let Some(schema) = entry.param_schema.clone() {
                bind::check_schema(&schema, params)?;
            } else {
                entry.param_schema = Some(tags.clone());
            }
            let hit = entry.driver_prepared;
            entry.driver_prepared = true;
            Ok((entry.sql.clone(), hit))
        })? {
            Ok(found) => found,
            Err(e) => return self.fail(Some(record.id), e),
        };

        if cache_hit {
            self.metrics.record_cache_hit();
        } else {
            self.metrics.record_cache_miss();
        }

        let timeout = opts.timeout_secs(record.default_timeout_ms);
        let rows = record
            .with_connection(|conn| query::run_statement(conn, &sql, params, timeout))
            .map_err(|e| self.capture(Some(record.id), e))?;

        let encoded = ResultEncoder::encode_with_limits(&rows, &self.limits(opts))
            .map_err(|e| self.capture(Some(record.id), e))?;

        self.metrics.record_query();
        self.metrics.add_bytes_encoded(encoded.len() as u64);
        self.metrics
            .record_latency(OpClass::ExecutePrepared, started.elapsed());
        Ok(encoded)
    }

    /// Opens a forward-only streaming query. The connection stays `Busy`
    /// until `stream_close`.
    pub fn stream_open(
        &self,
        conn_id: u64,
        sql: &str,
        params: &[ParamValue],
        chunk_rows: u32,
        opts: &ExecOptions,
    ) -> Result<u64> {
        let record = self.require_record(conn_id)?;
        self.check_ready(&record)?;

        let requested = if chunk_rows == 0 {
            self.config.default_chunk_rows
        } else {
            chunk_rows
        };
        let chunk_rows = requested.min(record.capabilities.max_chunk_rows).max(1) as usize;

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let timeout = opts.timeout_secs(record.default_timeout_ms);
        let handle = Arc::new(streaming::open_stream(
            record.clone(),
            conn_id,
            sql.to_string(),
            params.to_vec(),
            chunk_rows,
            self.limits(opts),
            timeout,
            self.metrics.clone(),
        ));

        record.register_stream(stream_id, handle)?;
        self.streams
            .write()
            .map_err(|_| EngineError::Internal("stream registry poisoned".to_string()))?
            .insert(stream_id, conn_id);
        Ok(stream_id)
    }

    /// Next encoded chunk, or `None` at end-of-stream.
    pub fn stream_next(&self, stream_id: u64) -> Result<Option<Vec<u8>>> {
        let started = Instant::now();
        let conn_id = {
            let streams = self
                .streams
                .read()
                .map_err(|_| EngineError::Internal("stream registry poisoned".to_string()))?;
            streams.get(&stream_id).copied()
        };
        let Some(conn_id) = conn_id else {
            return self.fail(None, EngineError::InvalidHandle(stream_id));
        };
        let record = self.require_record(conn_id)?;
        let Some(handle) = record.stream(stream_id) else {
            return self.fail(Some(conn_id), EngineError::InvalidHandle(stream_id));
        };

        let chunk = handle
            .next_chunk()
            .map_err(|e| self.capture(Some(conn_id), e))?;
        self.metrics
            .record_latency(OpClass::StreamNext, started.elapsed());
        Ok(chunk)
    }

    pub fn stream_close(&self, stream_id: u64) -> Result<()> {
        let conn_id = {
            let mut streams = self
                .streams
                .write()
                .map_err(|_| EngineError::Internal("stream registry poisoned".to_string()))?;
            streams.remove(&stream_id)
        };
        let Some(conn_id) = conn_id else {
            return self.fail(None, EngineError::InvalidHandle(stream_id));
        };
        if let Some(record) = self.record(conn_id) {
            // Dropping the handle drops the receiver; the worker's next
            // send fails and it releases the connection lock.
            record.remove_stream(stream_id);
        }
        Ok(())
    }

    /// Arms cooperative cancellation for the connection's current (or next)
    /// driver interaction. Drivers without cancel support get `Unsupported`
    /// instead of a silent no-op.
    pub fn cancel(&self, conn_id: u64) -> Result<()> {
        let record = self.require_record(conn_id)?;
        if !record.capabilities.supports_cancel {
            return self.fail(
                Some(conn_id),
                EngineError::Unsupported("driver-level cancellation".to_string()),
            );
        }
        record.request_cancel();
        Ok(())
    }

    /// Observable state of a connection, mostly for invariant checks.
    pub fn conn_state(&self, conn_id: u64) -> Option<ConnState> {
        self.record(conn_id).map(|r| r.state())
    }

    pub fn pool_live_count(&self, identity: &PoolIdentity) -> u32 {
        self.pool.live_count(identity)
    }

    fn invalidate_prepared(&self, record: &Arc<ConnectionRecord>) {
        for entry in record.clear_prepared() {
            if let Ok(mut statements) = self.statements.write() {
                statements.remove(&entry.stmt_id);
            }
        }
    }

    /// Best-effort teardown: drain streams, close prepared caches, release
    /// every connection, then drain the pool's idle sets. The ODBC
    /// environment itself stays alive until process exit.
    pub fn shutdown(&self) {
        let records: Vec<_> = match self.records.write() {
            Ok(mut map) => map.drain().map(|(_, r)| r).collect(),
            Err(_) => return,
        };
        for record in records {
            for stream_id in record.close_all_streams() {
                if let Ok(mut streams) = self.streams.write() {
                    streams.remove(&stream_id);
                }
            }
            for entry in record.clear_prepared() {
                if let Ok(mut statements) = self.statements.write() {
                    statements.remove(&entry.stmt_id);
                }
            }
            record.release_lease(!record.is_broken());
            self.metrics.record_connection_closed();
        }
        self.pool.drain_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Driver-backed behavior is exercised by the DSN-gated integration
    // suite in tests/. These cover the registry paths that never reach a
    // driver.

    #[test]
    fn test_unknown_connection_is_invalid_handle() {
        let engine = Engine::default();
        let err = engine
            .execute(42, "SELECT 1", &[], &ExecOptions::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidHandle(42)));

        // The failure is mirrored into the global slot with the
        // no-connection SQLSTATE.
        let last = engine.last_error(Some(42)).unwrap();
        assert_eq!(&last.sqlstate, b"08003");
    }

    #[test]
    fn test_unknown_statement_and_stream_handles() {
        let engine = Engine::default();
        assert!(matches!(
            engine.execute_prepared(9, &[], &ExecOptions::default()),
            Err(EngineError::InvalidHandle(9))
        ));
        assert!(matches!(
            engine.stream_next(9),
            Err(EngineError::InvalidHandle(9))
        ));
        assert!(matches!(
            engine.stream_close(9),
            Err(EngineError::InvalidHandle(9))
        ));
        assert!(matches!(
            engine.cancel(9),
            Err(EngineError::InvalidHandle(9))
        ));
        assert!(matches!(
            engine.disconnect(9),
            Err(EngineError::InvalidHandle(9))
        ));
    }

    #[test]
    fn test_connect_rejects_empty_connection_string() {
        let engine = Engine::default();
        let err = engine.connect("").unwrap_err();
        assert!(matches!(err, EngineError::InvalidIdentity(_)));
        assert!(engine.last_error(None).is_some());
    }

    #[test]
    fn test_errors_counted_in_metrics() {
        let engine = Engine::default();
        let _ = engine.execute(1, "SELECT 1", &[], &ExecOptions::default());
        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.errors_connection_lost, 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let engine = Engine::default();
        engine.shutdown();
        engine.shutdown();
    }
}
