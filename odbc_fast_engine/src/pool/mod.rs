pub mod identity;

pub use identity::PoolIdentity;

use crate::error::{EngineError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// Creates, probes and implicitly closes (drops) driver connections. The
/// pool is generic over this so its scheduling logic is testable without a
/// driver manager.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: Send + 'static;

    fn connect(&self, conn_string: &str) -> Result<Self::Conn>;

    /// Cheap liveness probe run on idle entries at checkout.
    fn is_healthy(&self, conn: &mut Self::Conn) -> bool;
}

/// Factory over the shared ODBC environment.
pub struct OdbcFactory {
    pub login_timeout_secs: u32,
}

impl ConnectionFactory for OdbcFactory {
    type Conn = odbc_api::Connection<'static>;

    fn connect(&self, conn_string: &str) -> Result<Self::Conn> {
        crate::handles::connect(conn_string, self.login_timeout_secs)
    }

    fn is_healthy(&self, conn: &mut Self::Conn) -> bool {
        crate::handles::is_alive(conn)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub min_size: u32,
    pub max_size: u32,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

struct IdleEntry<C> {
    conn: C,
    parked_at: Instant,
}

struct ShardState<C> {
    idle: Vec<IdleEntry<C>>,
    /// Connections created and not yet closed: leased + idle.
    live: u32,
    /// Parked acquirers in arrival order; only the front may proceed.
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

/// Per-identity pool state. Idle order is LIFO so callers get the warmest
/// connection; waiters are granted FIFO to bound latency variance.
pub struct PoolShard<C> {
    state: Mutex<ShardState<C>>,
    available: Condvar,
}

impl<C> PoolShard<C> {
    fn new() -> Self {
        Self {
            state: Mutex::new(ShardState {
                idle: Vec::new(),
                live: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ShardState<C>>> {
        self.state
            .lock()
            .map_err(|_| EngineError::Internal("pool mutex poisoned".to_string()))
    }

    fn give_back(&self, conn: C, healthy: bool) {
        let dead;
        match self.lock() {
            Ok(mut state) => {
                if healthy {
                    state.idle.push(IdleEntry {
                        conn,
                        parked_at: Instant::now(),
                    });
                    dead = None;
                } else {
                    state.live = state.live.saturating_sub(1);
                    dead = Some(conn);
                }
            }
            Err(_) => return,
        }
        // Close the broken handle outside the pool lock.
        drop(dead);
        self.available.notify_all();
    }
}

/// A checked-out connection. Dropping it returns the connection to the pool
/// as healthy; callers that observed a broken connection release it with
/// `healthy = false` so it is closed instead of pooled.
pub struct Lease<C> {
    conn: Option<C>,
    shard: Arc<PoolShard<C>>,
}

impl<C> std::fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("has_conn", &self.conn.is_some())
            .finish()
    }
}

impl<C> Lease<C> {
    pub fn connection(&self) -> Option<&C> {
        self.conn.as_ref()
    }

    pub fn connection_mut(&mut self) -> Option<&mut C> {
        self.conn.as_mut()
    }

    pub fn release(mut self, healthy: bool) {
        if let Some(conn) = self.conn.take() {
            self.shard.give_back(conn, healthy);
        }
    }
}

impl<C> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shard.give_back(conn, true);
        }
    }
}

type ShardMap<C> = Mutex<HashMap<PoolIdentity, Arc<PoolShard<C>>>>;

pub struct PoolManager<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    shards: Arc<ShardMap<F::Conn>>,
    reaper_stop: Arc<(Mutex<bool>, Condvar)>,
}

impl<F: ConnectionFactory> PoolManager<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let shards: Arc<ShardMap<F::Conn>> = Arc::new(Mutex::new(HashMap::new()));
        let reaper_stop = Arc::new((Mutex::new(false), Condvar::new()));
        spawn_reaper(Arc::downgrade(&shards), config, reaper_stop.clone());
        Self {
            factory,
            config,
            shards,
            reaper_stop,
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    fn shard(&self, identity: &PoolIdentity) -> Result<Arc<PoolShard<F::Conn>>> {
        let mut shards = self
            .shards
            .lock()
            .map_err(|_| EngineError::Internal("pool registry mutex poisoned".to_string()))?;
        Ok(shards
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(PoolShard::new()))
            .clone())
    }

    /// Checks out a connection for `identity`, creating one when the shard
    /// is below `max_size`. Waits up to `acquire_timeout` for a release
    /// otherwise. Idle entries are probed at checkout; a dead entry is
    /// closed and replaced with a fresh connection before the acquire
    /// returns.
    pub fn acquire(&self, identity: &PoolIdentity, conn_string: &str) -> Result<Lease<F::Conn>> {
        let shard = self.shard(identity)?;
        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout;
        let mut ticket: Option<u64> = None;

        let mut state = shard.lock()?;
        loop {
            let my_turn = match ticket {
                None => state.waiters.is_empty(),
                Some(t) => state.waiters.front() == Some(&t),
            };
            let resource_ready = !state.idle.is_empty() || state.live < self.config.max_size;

            if my_turn && resource_ready {
                if let Some(entry) = state.idle.pop() {
                    drop(state);
                    let mut conn = entry.conn;
                    if self.factory.is_healthy(&mut conn) {
                        return self.grant(&shard, ticket, conn);
                    }
                    // Dead idle entry: close it and go around again, which
                    // either pops the next idle entry or creates a fresh
                    // connection in its place.
                    drop(conn);
                    state = shard.lock()?;
                    state.live = state.live.saturating_sub(1);
                    continue;
                }

                state.live += 1;
                drop(state);
                match self.factory.connect(conn_string) {
                    Ok(conn) => return self.grant(&shard, ticket, conn),
                    Err(e) => {
                        let mut state = shard.lock()?;
                        state.live = state.live.saturating_sub(1);
                        remove_ticket(&mut state, ticket);
                        drop(state);
                        shard.available.notify_all();
                        return Err(e);
                    }
                }
            }

            if ticket.is_none() {
                let t = state.next_ticket;
                state.next_ticket += 1;
                state.waiters.push_back(t);
                ticket = Some(t);
            }

            let now = Instant::now();
            if now >= deadline {
                remove_ticket(&mut state, ticket);
                drop(state);
                shard.available.notify_all();
                return Err(EngineError::PoolExhausted {
                    identity: identity.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            let (guard, _timeout) = shard
                .available
                .wait_timeout(state, deadline - now)
                .map_err(|_| EngineError::Internal("pool mutex poisoned".to_string()))?;
            state = guard;
        }
    }

    fn grant(
        &self,
        shard: &Arc<PoolShard<F::Conn>>,
        ticket: Option<u64>,
        conn: F::Conn,
    ) -> Result<Lease<F::Conn>> {
        if ticket.is_some() {
            let mut state = shard.lock()?;
            remove_ticket(&mut state, ticket);
            drop(state);
            shard.available.notify_all();
        }
        Ok(Lease {
            conn: Some(conn),
            shard: shard.clone(),
        })
    }

    /// Connections created and not yet closed for this identity.
    pub fn live_count(&self, identity: &PoolIdentity) -> u32 {
        self.shard(identity)
            .and_then(|s| s.lock().map(|state| state.live))
            .unwrap_or(0)
    }

    pub fn idle_count(&self, identity: &PoolIdentity) -> u32 {
        self.shard(identity)
            .and_then(|s| s.lock().map(|state| state.idle.len() as u32))
            .unwrap_or(0)
    }

    /// Closes every idle connection for this identity. Leased connections
    /// are unaffected. Returns the number closed.
    pub fn drain(&self, identity: &PoolIdentity) -> u32 {
        let Ok(shard) = self.shard(identity) else {
            return 0;
        };
        drain_shard(&shard)
    }

    /// Drains the idle set of every shard. Used by engine shutdown.
    pub fn drain_all(&self) {
        let shards: Vec<_> = match self.shards.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };
        for shard in shards {
            drain_shard(&shard);
        }
    }
}

impl<F: ConnectionFactory> Drop for PoolManager<F> {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.reaper_stop;
        if let Ok(mut stop) = lock.lock() {
            *stop = true;
        }
        cvar.notify_all();
    }
}

fn drain_shard<C>(shard: &PoolShard<C>) -> u32 {
    let drained = match shard.lock() {
        Ok(mut state) => {
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.live = state.live.saturating_sub(drained.len() as u32);
            drained
        }
        Err(_) => return 0,
    };
    let count = drained.len() as u32;
    drop(drained);
    shard.available.notify_all();
    count
}

fn remove_ticket<C>(state: &mut ShardState<C>, ticket: Option<u64>) {
    if let Some(t) = ticket {
        state.waiters.retain(|w| *w != t);
    }
}

/// Background reaper: closes idle entries parked longer than `idle_timeout`,
/// never shrinking a shard below `min_size`. Exits when the owning manager
/// is dropped.
fn spawn_reaper<C: Send + 'static>(
    shards: Weak<ShardMap<C>>,
    config: PoolConfig,
    stop: Arc<(Mutex<bool>, Condvar)>,
) {
    let interval = (config.idle_timeout / 4)
        .max(Duration::from_millis(100))
        .min(Duration::from_secs(30));

    std::thread::spawn(move || loop {
        {
            let (lock, cvar) = &*stop;
            let Ok(guard) = lock.lock() else { return };
            let Ok((guard, _)) = cvar.wait_timeout(guard, interval) else {
                return;
            };
            if *guard {
                return;
            }
        }

        let Some(shards) = shards.upgrade() else {
            return;
        };
        let snapshot: Vec<_> = match shards.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return,
        };

        for shard in snapshot {
            let mut expired = Vec::new();
            if let Ok(mut state) = shard.lock() {
                let cutoff = Instant::now() - config.idle_timeout;
                let removable = state.live.saturating_sub(config.min_size) as usize;
                let mut kept = Vec::with_capacity(state.idle.len());
                for entry in state.idle.drain(..) {
                    if entry.parked_at < cutoff && expired.len() < removable {
                        expired.push(entry);
                    } else {
                        kept.push(entry);
                    }
                }
                state.idle = kept;
                state.live = state.live.saturating_sub(expired.len() as u32);
            }
            if !expired.is_empty() {
                log::debug!("pool reaper closed {} idle connection(s)", expired.len());
                drop(expired);
                shard.available.notify_all();
            }
        }
    });
}
