use crate::engine::capabilities::DriverCapabilities;
use crate::engine::prepared::{PreparedCache, PreparedEntry};
use crate::engine::streaming::StreamHandle;
use crate::error::{EngineError, Result, StructuredError};
use crate::pool::{Lease, PoolIdentity};
use odbc_api::Connection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Observable connection state. `Broken` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Busy,
    Broken,
}

/// One live connection: the pool lease holding the driver handle, the
/// per-connection error slot, the prepared cache, the open-stream map and
/// the cancellation flag. Driver work serializes on the lease mutex; a
/// connection with an open stream stays `Busy` until the stream closes.
pub struct ConnectionRecord {
    pub id: u64,
    pub identity: PoolIdentity,
    pub capabilities: DriverCapabilities,
    /// Connection-default statement timeout. 0 = none.
    pub default_timeout_ms: u32,
    broken: AtomicBool,
    cancel_requested: AtomicBool,
    lease: Mutex<Option<Lease<Connection<'static>>>>,
    streams: Mutex<HashMap<u64, Arc<StreamHandle>>>,
    prepared: Mutex<PreparedCache>,
    error_slot: Mutex<Option<StructuredError>>,
}

impl ConnectionRecord {
    pub fn new(
        id: u64,
        identity: PoolIdentity,
        capabilities: DriverCapabilities,
        lease: Lease<Connection<'static>>,
        default_timeout_ms: u32,
        prepared_capacity: usize,
    ) -> Self {
        Self {
            id,
            identity,
            capabilities,
            default_timeout_ms,
            broken: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            lease: Mutex::new(Some(lease)),
            streams: Mutex::new(HashMap::new()),
            prepared: Mutex::new(PreparedCache::new(prepared_capacity)),
            error_slot: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnState {
        if self.is_broken() {
            return ConnState::Broken;
        }
        if self.open_stream_count() > 0 {
            return ConnState::Busy;
        }
        match self.lease.try_lock() {
            Ok(_) => ConnState::Idle,
            Err(_) => ConnState::Busy,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Edge-triggered cancellation: `cancel` arms the flag, the next driver
    /// interaction consumes it. Repeated arms are idempotent.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn take_cancel(&self) -> bool {
        self.cancel_requested.swap(false, Ordering::SeqCst)
    }

    pub fn set_error(&self, error: StructuredError) {
        if let Ok(mut slot) = self.error_slot.lock() {
            *slot = Some(error);
        }
    }

    pub fn last_error(&self) -> Option<StructuredError> {
        self.error_slot.lock().ok().and_then(|slot| slot.clone())
    }

    /// Runs `f` with the driver connection, holding the per-connection lock
    /// for exactly the duration of the operation. Concurrent callers queue
    /// on the lock in arrival order.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection<'static>) -> Result<T>) -> Result<T> {
        let guard = self
            .lease
            .lock()
            .map_err(|_| EngineError::Internal("connection mutex poisoned".to_string()))?;
        let conn = guard
            .as_ref()
            .and_then(Lease::connection)
            .ok_or(EngineError::InvalidHandle(self.id))?;
        f(conn)
    }

    /// Gives the driver connection back to the pool. After this every
    /// driver-touching operation fails with `InvalidHandle`.
    pub fn release_lease(&self, healthy: bool) {
        let lease = match self.lease.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(lease) = lease {
            lease.release(healthy);
        }
    }

    pub fn with_prepared<T>(&self, f: impl FnOnce(&mut PreparedCache) -> T) -> Result<T> {
        let mut cache = self
            .prepared
            .lock()
            .map_err(|_| EngineError::Internal("prepared cache mutex poisoned".to_string()))?;
        Ok(f(&mut cache))
    }

    pub fn clear_prepared(&self) -> Vec<PreparedEntry> {
        self.prepared
            .lock()
            .map(|mut cache| cache.clear())
            .unwrap_or_default()
    }

    pub fn open_stream_count(&self) -> usize {
        self.streams.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn register_stream(&self, stream_id: u64, handle: Arc<StreamHandle>) -> Result<()> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| EngineError::Internal("stream map mutex poisoned".to_string()))?;
        streams.insert(stream_id, handle);
        Ok(())
    }

    pub fn stream(&self, stream_id: u64) -> Option<Arc<StreamHandle>> {
        self.streams
            .lock()
            .ok()
            .and_then(|streams| streams.get(&stream_id).cloned())
    }

    pub fn remove_stream(&self, stream_id: u64) -> Option<Arc<StreamHandle>> {
        self.streams
            .lock()
            .ok()
            .and_then(|mut streams| streams.remove(&stream_id))
    }

    /// Drops every open stream, waking their workers so they exit. Returns
    /// the closed stream ids for registry cleanup.
    pub fn close_all_streams(&self) -> Vec<u64> {
        match self.streams.lock() {
            Ok(mut streams) => streams.drain().map(|(id, _)| id).collect(),
            Err(_) => Vec::new(),
        }
    }
}
