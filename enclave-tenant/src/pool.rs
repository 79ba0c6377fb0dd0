//! Bounded cache of per-tenant connection pools.
//!
//! Two limits keep the worst case constant regardless of tenant count:
//!
//! - each pool holds at most `max_connections_per_pool` connections
//! - at most `max_pools` pools are live at once
//!
//! ```text
//!   get_pool("agency_acme")
//!        │
//!        ▼
//!   ┌──────────────┐ hit  ┌──────────────────────────┐
//!   │ entries lock │─────▶│ ref_count += 1, touch LRU │──▶ PoolHandle
//!   └──────────────┘      └──────────────────────────┘
//!        │ miss
//!        ▼
//!   per-key construction lock ──▶ connect (no map lock held)
//!        │
//!        ▼
//!   insert ──▶ evict LRU idle entries while over max_pools
//! ```
//!
//! The entries lock is a plain mutex held only for bookkeeping; it is never
//! held across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backend::{PoolFactory, PoolStatus, TenantPool};
use crate::error::{TenantError, TenantResult};
use crate::keyed::KeyedLocks;

/// Configuration for the pool manager.
#[derive(Debug, Clone)]
pub struct PoolManagerConfig {
    /// Maximum number of live tenant pools.
    pub max_pools: usize,
    /// Connection cap for each tenant pool.
    pub max_connections_per_pool: usize,
    /// Idle time after which an unborrowed pool is closed.
    pub idle_timeout: Duration,
    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
    /// Bounded wait for a connection from a saturated pool.
    pub acquire_timeout: Duration,
    /// Upper bound for building a new pool.
    pub connect_timeout: Duration,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            max_pools: 50,
            max_connections_per_pool: 5,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolManagerConfig {
    /// Create a new config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of live pools.
    pub fn max_pools(mut self, max: usize) -> Self {
        self.max_pools = max;
        self
    }

    /// Set the per-pool connection cap.
    pub fn max_connections_per_pool(mut self, max: usize) -> Self {
        self.max_connections_per_pool = max;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Worst-case physical connections across all pools.
    pub fn connection_budget(&self) -> usize {
        self.max_pools.saturating_mul(self.max_connections_per_pool)
    }

    /// Check that the limits are usable.
    pub fn validate(&self) -> TenantResult<()> {
        if self.max_pools == 0 {
            return Err(TenantError::config("max_pools must be at least 1"));
        }
        if self.max_connections_per_pool == 0 {
            return Err(TenantError::config("max_connections_per_pool must be at least 1"));
        }
        if self.sweep_interval.is_zero() {
            return Err(TenantError::config("sweep_interval must be non-zero"));
        }
        Ok(())
    }
}

struct PoolEntry<P> {
    id: u64,
    pool: P,
    ref_count: usize,
    last_used: Instant,
    last_used_at: DateTime<Utc>,
    last_used_seq: u64,
    created_at: DateTime<Utc>,
}

struct Entries<P> {
    map: HashMap<String, PoolEntry<P>>,
    seq: u64,
    next_id: u64,
}

impl<P: TenantPool> Entries<P> {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Borrow an existing entry.
    fn checkout(&mut self, database: &str) -> Option<(P, u64)> {
        let seq = self.next_seq();
        let entry = self.map.get_mut(database)?;
        entry.ref_count += 1;
        entry.last_used = Instant::now();
        entry.last_used_at = Utc::now();
        entry.last_used_seq = seq;
        Some((entry.pool.clone(), entry.id))
    }

    /// Insert a freshly built pool, already borrowed once.
    fn insert(&mut self, database: &str, pool: P) -> (u64, Option<P>) {
        let seq = self.next_seq();
        self.next_id += 1;
        let id = self.next_id;
        let now = Utc::now();
        let replaced = self.map.insert(
            database.to_string(),
            PoolEntry {
                id,
                pool,
                ref_count: 1,
                last_used: Instant::now(),
                last_used_at: now,
                last_used_seq: seq,
                created_at: now,
            },
        );
        (id, replaced.map(|e| e.pool))
    }

    /// Add a borrow to a live entry. Returns false if the entry was replaced
    /// or removed since `id` was handed out.
    fn retain(&mut self, database: &str, id: u64) -> bool {
        match self.map.get_mut(database) {
            Some(entry) if entry.id == id => {
                entry.ref_count += 1;
                true
            }
            _ => false,
        }
    }

    fn release(&mut self, database: &str, id: u64) {
        let seq = self.next_seq();
        if let Some(entry) = self.map.get_mut(database) {
            // A handle from an invalidated entry must not touch its replacement.
            if entry.id == id {
                entry.ref_count = entry.ref_count.saturating_sub(1);
                entry.last_used = Instant::now();
                entry.last_used_at = Utc::now();
                entry.last_used_seq = seq;
            }
        }
    }

    /// Remove least-recently-used unborrowed entries until within `max`.
    fn evict_over(&mut self, max: usize) -> Vec<(String, P)> {
        let mut evicted = Vec::new();
        while self.map.len() > max {
            let victim = self
                .map
                .iter()
                .filter(|(_, e)| e.ref_count == 0)
                .min_by_key(|(_, e)| e.last_used_seq)
                .map(|(k, _)| k.clone());

            match victim.and_then(|k| self.map.remove_entry(&k)) {
                Some((key, entry)) => evicted.push((key, entry.pool)),
                None => {
                    warn!(
                        entries = self.map.len(),
                        max_pools = max,
                        "All tenant pools are borrowed; pool cap temporarily exceeded"
                    );
                    break;
                }
            }
        }
        evicted
    }
}

struct Shared<P> {
    entries: Mutex<Entries<P>>,
}

/// Owns every live tenant pool.
///
/// No other component touches the pool map; construction, release and
/// eviction are the only mutation paths.
pub struct PoolManager<F: PoolFactory> {
    factory: F,
    config: PoolManagerConfig,
    shared: Arc<Shared<F::Pool>>,
    construction: KeyedLocks,
}

impl<F: PoolFactory> PoolManager<F> {
    /// Create a pool manager.
    pub fn new(factory: F, config: PoolManagerConfig) -> TenantResult<Self> {
        config.validate()?;
        Ok(Self {
            factory,
            shared: Arc::new(Shared {
                entries: Mutex::new(Entries {
                    map: HashMap::with_capacity(config.max_pools),
                    seq: 0,
                    next_id: 0,
                }),
            }),
            config,
            construction: KeyedLocks::new(),
        })
    }

    /// The manager configuration.
    pub fn config(&self) -> &PoolManagerConfig {
        &self.config
    }

    /// The pool factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Borrow the pool for `database`, building it on first access.
    ///
    /// Concurrent first accesses build a single pool. A failed build is not
    /// cached: the next call tries again.
    pub async fn get_pool(&self, database: &str) -> TenantResult<PoolHandle<F::Pool>> {
        if let Some(handle) = self.checkout(database) {
            return Ok(handle);
        }

        let _guard = self.construction.lock(database).await;
        if let Some(handle) = self.checkout(database) {
            return Ok(handle);
        }

        let started = Instant::now();
        let pool = match tokio::time::timeout(
            self.config.connect_timeout,
            self.factory
                .create_pool(database, self.config.max_connections_per_pool),
        )
        .await
        {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => {
                warn!(database = %database, error = %e, "Tenant pool construction failed");
                return Err(e);
            }
            Err(_) => {
                warn!(database = %database, "Tenant pool construction timed out");
                return Err(TenantError::timeout(
                    format!("connecting to '{database}'"),
                    self.config.connect_timeout,
                ));
            }
        };

        let (id, replaced, evicted, live) = {
            let mut entries = self.shared.entries.lock();
            let (id, replaced) = entries.insert(database, pool.clone());
            let evicted = entries.evict_over(self.config.max_pools);
            (id, replaced, evicted, entries.map.len())
        };

        if let Some(old) = replaced {
            old.close();
        }
        close_pools(evicted, "lru");

        debug!(
            database = %database,
            elapsed_ms = started.elapsed().as_millis() as u64,
            live_pools = live,
            "Tenant pool created"
        );
        Ok(self.handle(database, pool, id))
    }

    /// Return a borrowed handle. Equivalent to dropping it.
    pub fn release(&self, handle: PoolHandle<F::Pool>) {
        drop(handle);
    }

    /// Evict least-recently-used unborrowed pools until within `max_pools`.
    ///
    /// If every pool is borrowed the cap is left exceeded; requests are never
    /// blocked or failed to honor it.
    pub fn enforce_cap(&self) -> usize {
        let evicted = self.shared.entries.lock().evict_over(self.config.max_pools);
        let count = evicted.len();
        close_pools(evicted, "lru");
        count
    }

    /// Close unborrowed pools idle longer than `idle_timeout`.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let evicted: Vec<(String, F::Pool)> = {
            let mut entries = self.shared.entries.lock();
            let idle: Vec<String> = entries
                .map
                .iter()
                .filter(|(_, e)| {
                    e.ref_count == 0 && now.duration_since(e.last_used) > self.config.idle_timeout
                })
                .map(|(k, _)| k.clone())
                .collect();
            idle.into_iter()
                .filter_map(|k| entries.map.remove_entry(&k).map(|(k, e)| (k, e.pool)))
                .collect()
        };
        let count = evicted.len();
        close_pools(evicted, "idle");
        if count > 0 {
            info!(evicted = count, "Idle tenant pools evicted");
        }
        count
    }

    /// Remove and close the pool for `database`, even if borrowed.
    ///
    /// Only for use before the database itself is dropped; outstanding
    /// handles and connections keep a closed pool and their release becomes
    /// a no-op.
    pub fn invalidate(&self, database: &str) -> bool {
        let removed = self.shared.entries.lock().map.remove(database);
        match removed {
            Some(entry) => {
                entry.pool.close();
                info!(database = %database, borrowers = entry.ref_count, "Tenant pool invalidated");
                true
            }
            None => false,
        }
    }

    /// Close every pool.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(String, F::Pool)> = self
            .shared
            .entries
            .lock()
            .map
            .drain()
            .map(|(k, e)| (k, e.pool))
            .collect();
        let count = drained.len();
        close_pools(drained, "shutdown");
        count
    }

    /// Whether a live pool exists for `database`.
    pub fn contains(&self, database: &str) -> bool {
        self.shared.entries.lock().map.contains_key(database)
    }

    /// Number of live pools.
    pub fn len(&self) -> usize {
        self.shared.entries.lock().map.len()
    }

    /// Whether no pool is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current borrow count for `database`.
    pub fn ref_count(&self, database: &str) -> Option<usize> {
        self.shared.entries.lock().map.get(database).map(|e| e.ref_count)
    }

    /// Snapshot of every live pool, sorted by database name.
    pub fn stats(&self) -> PoolManagerStats {
        let now = Instant::now();
        let entries = self.shared.entries.lock();
        let mut pools: Vec<PoolEntryStats> = entries
            .map
            .iter()
            .map(|(database, e)| PoolEntryStats {
                database: database.clone(),
                ref_count: e.ref_count,
                status: e.pool.status(),
                created_at: e.created_at,
                last_used_at: e.last_used_at,
                idle_ms: now.duration_since(e.last_used).as_millis() as u64,
            })
            .collect();
        drop(entries);
        pools.sort_by(|a, b| a.database.cmp(&b.database));

        PoolManagerStats {
            entries: pools.len(),
            max_pools: self.config.max_pools,
            max_connections_per_pool: self.config.max_connections_per_pool,
            total_connections: pools.iter().map(|p| p.status.size).sum(),
            borrowed: pools.iter().map(|p| p.ref_count).sum(),
            pools,
        }
    }

    /// Run `evict_idle` every `sweep_interval` on a background task.
    ///
    /// The task holds only a weak reference and ends once the manager is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.evict_idle();
            }
            debug!("Pool sweeper stopped");
        })
    }

    fn checkout(&self, database: &str) -> Option<PoolHandle<F::Pool>> {
        let (pool, id) = self.shared.entries.lock().checkout(database)?;
        Some(self.handle(database, pool, id))
    }

    fn handle(&self, database: &str, pool: F::Pool, id: u64) -> PoolHandle<F::Pool> {
        PoolHandle {
            pool,
            acquire_timeout: self.config.acquire_timeout,
            borrow: Borrow {
                database: database.to_string(),
                entry_id: id,
                shared: self.shared.clone(),
            },
        }
    }
}

impl<F: PoolFactory> fmt::Debug for PoolManager<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.config)
            .field("live_pools", &self.len())
            .finish()
    }
}

fn close_pools<P: TenantPool>(evicted: Vec<(String, P)>, reason: &'static str) {
    for (database, pool) in evicted {
        pool.close();
        debug!(database = %database, reason, "Tenant pool closed");
    }
}

/// One unit of `ref_count` on a pool entry, returned on drop.
struct Borrow<P: TenantPool> {
    database: String,
    entry_id: u64,
    shared: Arc<Shared<P>>,
}

impl<P: TenantPool> Borrow<P> {
    /// A second borrow on the same entry, if it is still the live one.
    fn extend(&self) -> Option<Self> {
        let live = self.shared.entries.lock().retain(&self.database, self.entry_id);
        live.then(|| Borrow {
            database: self.database.clone(),
            entry_id: self.entry_id,
            shared: self.shared.clone(),
        })
    }
}

impl<P: TenantPool> Drop for Borrow<P> {
    fn drop(&mut self) {
        self.shared.entries.lock().release(&self.database, self.entry_id);
    }
}

/// A borrowed reference to one tenant's pool.
///
/// While a handle, or any connection acquired through it, is alive the pool
/// cannot be evicted.
pub struct PoolHandle<P: TenantPool> {
    pool: P,
    acquire_timeout: Duration,
    borrow: Borrow<P>,
}

impl<P: TenantPool> PoolHandle<P> {
    /// The tenant database.
    pub fn database(&self) -> &str {
        &self.borrow.database
    }

    /// The underlying pool.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Current pool occupancy.
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Borrow a connection, waiting at most `acquire_timeout`.
    ///
    /// The connection carries its own borrow on the pool entry, so it keeps
    /// the pool cached even after this handle is dropped.
    pub async fn acquire(&self) -> TenantResult<PooledConnection<P>> {
        let started = Instant::now();
        let conn = match tokio::time::timeout(self.acquire_timeout, self.pool.acquire()).await {
            Ok(conn) => conn?,
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(database = %self.database(), waited_ms, "Tenant pool exhausted");
                return Err(TenantError::PoolExhausted {
                    database: self.database().to_string(),
                    waited_ms,
                });
            }
        };
        let borrow = self.borrow.extend().ok_or_else(|| {
            TenantError::connection(format!("pool for '{}' was closed", self.database()))
        })?;
        Ok(PooledConnection { conn, borrow })
    }
}

impl<P: TenantPool> fmt::Debug for PoolHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("database", &self.borrow.database)
            .field("status", &self.pool.status())
            .finish()
    }
}

/// A connection checked out of a tenant pool.
///
/// Dereferences to the backend connection. The connection is returned to its
/// pool before the entry borrow is released.
pub struct PooledConnection<P: TenantPool> {
    conn: P::Connection,
    borrow: Borrow<P>,
}

impl<P: TenantPool> PooledConnection<P> {
    /// The tenant database.
    pub fn database(&self) -> &str {
        &self.borrow.database
    }
}

impl<P: TenantPool> Deref for PooledConnection<P> {
    type Target = P::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<P: TenantPool> DerefMut for PooledConnection<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl<P: TenantPool> fmt::Debug for PooledConnection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("database", &self.borrow.database)
            .finish()
    }
}

/// Occupancy of one live pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolEntryStats {
    /// Tenant database.
    pub database: String,
    /// In-flight borrowers.
    pub ref_count: usize,
    /// Physical connection counts.
    #[serde(flatten)]
    pub status: PoolStatus,
    /// When the pool was built.
    pub created_at: DateTime<Utc>,
    /// Last borrow or release.
    pub last_used_at: DateTime<Utc>,
    /// Milliseconds since last use.
    pub idle_ms: u64,
}

/// Snapshot returned by [`PoolManager::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct PoolManagerStats {
    /// Live pools.
    pub entries: usize,
    /// Configured pool cap.
    pub max_pools: usize,
    /// Configured per-pool connection cap.
    pub max_connections_per_pool: usize,
    /// Open connections across all pools.
    pub total_connections: usize,
    /// Outstanding handles across all pools.
    pub borrowed: usize,
    /// Per-pool detail.
    pub pools: Vec<PoolEntryStats>,
}
