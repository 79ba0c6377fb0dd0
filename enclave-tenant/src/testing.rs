//! An in-memory database cluster implementing the backend traits.
//!
//! Each database is a [`MemoryExecutor`] catalog. The cluster records
//! administrative events, tracks sessions per database, enforces the
//! per-pool connection cap with a semaphore, and lets tests inject failures
//! and stalls. Enabled by the `testing` feature.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use enclave_schema::testing::{INJECTED_FAILURE, MemoryExecutor};
use enclave_schema::{SchemaError, SchemaExecutor, SchemaResult};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::backend::{DatabaseAdmin, PoolFactory, PoolStatus, TenantPool};
use crate::error::{TenantError, TenantResult};

struct MemoryDatabase {
    catalog: Arc<MemoryExecutor>,
    marker: Option<String>,
    sessions: usize,
    epoch: u64,
}

impl MemoryDatabase {
    fn new(marker: Option<String>) -> Self {
        Self {
            catalog: Arc::new(MemoryExecutor::new()),
            marker,
            sessions: 0,
            epoch: 0,
        }
    }
}

#[derive(Default)]
struct ClusterState {
    databases: BTreeMap<String, MemoryDatabase>,
    events: Vec<String>,
    unreachable: HashSet<String>,
    failing_statements: Vec<String>,
    stalls: Vec<(String, Duration)>,
    fail_create: bool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<ClusterState>,
    pools_created: AtomicUsize,
    pools_closed: AtomicUsize,
    queries: AtomicUsize,
}

/// A fake database server shared by clones.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Inner>,
}

impl MemoryCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a database directly, bypassing admin events.
    pub fn insert_database(&self, name: &str, marker: Option<&str>) -> Arc<MemoryExecutor> {
        let mut state = self.inner.state.lock();
        let db = state
            .databases
            .entry(name.to_string())
            .or_insert_with(|| MemoryDatabase::new(marker.map(str::to_string)));
        db.catalog.clone()
    }

    /// The catalog of `name`, if it exists.
    pub fn catalog(&self, name: &str) -> Option<Arc<MemoryExecutor>> {
        self.inner.state.lock().databases.get(name).map(|db| db.catalog.clone())
    }

    /// Whether `name` exists.
    pub fn exists(&self, name: &str) -> bool {
        self.inner.state.lock().databases.contains_key(name)
    }

    /// The marker on `name`.
    pub fn marker(&self, name: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .databases
            .get(name)
            .and_then(|db| db.marker.clone())
    }

    /// All database names, sorted.
    pub fn database_names(&self) -> Vec<String> {
        self.inner.state.lock().databases.keys().cloned().collect()
    }

    /// Live sessions on `name`.
    pub fn sessions(&self, name: &str) -> usize {
        self.inner
            .state
            .lock()
            .databases
            .get(name)
            .map_or(0, |db| db.sessions)
    }

    /// Administrative events (`create x`, `terminate x`, `drop x`) in order.
    pub fn events(&self) -> Vec<String> {
        self.inner.state.lock().events.clone()
    }

    /// Pools built by the factory.
    pub fn pools_created(&self) -> usize {
        self.inner.pools_created.load(Ordering::SeqCst)
    }

    /// Pools closed.
    pub fn pools_closed(&self) -> usize {
        self.inner.pools_closed.load(Ordering::SeqCst)
    }

    /// Queries run through [`MemoryConnection::select`].
    pub fn queries(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    /// Fail every statement containing `needle`, in every database.
    pub fn fail_statements_containing(&self, needle: &str) {
        self.inner.state.lock().failing_statements.push(needle.to_string());
    }

    /// Delay every statement containing `needle` by `delay`.
    pub fn stall_statements_containing(&self, needle: &str, delay: Duration) {
        self.inner.state.lock().stalls.push((needle.to_string(), delay));
    }

    /// Fail `CREATE DATABASE`.
    pub fn fail_create_database(&self, fail: bool) {
        self.inner.state.lock().fail_create = fail;
    }

    /// Refuse pool construction for `name`.
    pub fn set_unreachable(&self, name: &str, unreachable: bool) {
        let mut state = self.inner.state.lock();
        if unreachable {
            state.unreachable.insert(name.to_string());
        } else {
            state.unreachable.remove(name);
        }
    }

    /// Remove every injected failure and stall.
    pub fn clear_faults(&self) {
        let mut state = self.inner.state.lock();
        state.failing_statements.clear();
        state.stalls.clear();
        state.unreachable.clear();
        state.fail_create = false;
    }

    fn open_session(&self, database: &str) -> TenantResult<(Arc<MemoryExecutor>, u64)> {
        let mut state = self.inner.state.lock();
        let db = state.databases.get_mut(database).ok_or_else(|| missing_database(database))?;
        db.sessions += 1;
        Ok((db.catalog.clone(), db.epoch))
    }

    fn close_session(&self, database: &str, epoch: u64) {
        let mut state = self.inner.state.lock();
        if let Some(db) = state.databases.get_mut(database) {
            if db.epoch == epoch {
                db.sessions = db.sessions.saturating_sub(1);
            }
        }
    }

    fn session_alive(&self, database: &str, epoch: u64) -> bool {
        self.inner
            .state
            .lock()
            .databases
            .get(database)
            .is_some_and(|db| db.epoch == epoch)
    }
}

fn missing_database(name: &str) -> TenantError {
    TenantError::with_state(format!("database \"{name}\" does not exist"), "3D000")
}

#[async_trait]
impl PoolFactory for MemoryCluster {
    type Pool = MemoryPool;

    async fn create_pool(&self, database: &str, max_connections: usize) -> TenantResult<MemoryPool> {
        {
            let state = self.inner.state.lock();
            if state.unreachable.contains(database) {
                return Err(TenantError::connection(format!("could not connect to '{database}'")));
            }
            if !state.databases.contains_key(database) {
                return Err(missing_database(database));
            }
        }
        self.inner.pools_created.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryPool {
            cluster: self.clone(),
            database: database.to_string(),
            permits: Arc::new(Semaphore::new(max_connections)),
            max_size: max_connections,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl DatabaseAdmin for MemoryCluster {
    async fn database_exists(&self, name: &str) -> TenantResult<bool> {
        Ok(self.exists(name))
    }

    async fn database_marker(&self, name: &str) -> TenantResult<Option<String>> {
        Ok(self.marker(name))
    }

    async fn create_database(&self, name: &str, marker: &str) -> TenantResult<()> {
        let mut state = self.inner.state.lock();
        if state.fail_create {
            return Err(TenantError::with_state("permission denied to create database", "42501"));
        }
        if state.databases.contains_key(name) {
            return Err(TenantError::with_state(
                format!("database \"{name}\" already exists"),
                "42P04",
            ));
        }
        state
            .databases
            .insert(name.to_string(), MemoryDatabase::new(Some(marker.to_string())));
        state.events.push(format!("create {name}"));
        Ok(())
    }

    async fn set_marker(&self, name: &str, marker: &str) -> TenantResult<()> {
        let mut state = self.inner.state.lock();
        let db = state.databases.get_mut(name).ok_or_else(|| missing_database(name))?;
        db.marker = Some(marker.to_string());
        Ok(())
    }

    async fn terminate_connections(&self, name: &str) -> TenantResult<u64> {
        let mut state = self.inner.state.lock();
        let terminated = match state.databases.get_mut(name) {
            Some(db) => {
                db.epoch += 1;
                std::mem::take(&mut db.sessions) as u64
            }
            None => 0,
        };
        state.events.push(format!("terminate {name}"));
        Ok(terminated)
    }

    async fn drop_database(&self, name: &str) -> TenantResult<()> {
        let mut state = self.inner.state.lock();
        if let Some(db) = state.databases.get(name) {
            if db.sessions > 0 {
                return Err(TenantError::with_state(
                    format!("database \"{name}\" is being accessed by other users"),
                    "55006",
                ));
            }
            state.databases.remove(name);
            state.events.push(format!("drop {name}"));
        }
        Ok(())
    }

    async fn list_databases(&self, prefix: &str) -> TenantResult<Vec<String>> {
        Ok(self
            .inner
            .state
            .lock()
            .databases
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// A pool over one in-memory database.
#[derive(Clone)]
pub struct MemoryPool {
    cluster: MemoryCluster,
    database: String,
    permits: Arc<Semaphore>,
    max_size: usize,
    closed: Arc<AtomicBool>,
}

impl MemoryPool {
    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The database this pool serves.
    pub fn database(&self) -> &str {
        &self.database
    }
}

#[async_trait]
impl TenantPool for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> TenantResult<MemoryConnection> {
        if self.is_closed() {
            return Err(TenantError::connection("pool is closed"));
        }
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TenantError::connection("pool is closed"))?;
        let (catalog, epoch) = self.cluster.open_session(&self.database)?;
        Ok(MemoryConnection {
            cluster: self.cluster.clone(),
            database: self.database.clone(),
            catalog,
            epoch,
            _permit: permit,
        })
    }

    fn status(&self) -> PoolStatus {
        let available = self.permits.available_permits();
        PoolStatus {
            size: self.max_size.saturating_sub(available),
            available,
            max_size: self.max_size,
            waiting: 0,
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.permits.close();
            self.cluster.inner.pools_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A session on an in-memory database.
pub struct MemoryConnection {
    cluster: MemoryCluster,
    database: String,
    catalog: Arc<MemoryExecutor>,
    epoch: u64,
    _permit: OwnedSemaphorePermit,
}

impl MemoryConnection {
    /// Read from `relation`; fails with `42P01` if it does not exist.
    pub async fn select(&self, relation: &str) -> TenantResult<()> {
        self.cluster.inner.queries.fetch_add(1, Ordering::SeqCst);
        if !self.cluster.session_alive(&self.database, self.epoch) {
            return Err(TenantError::with_state("terminating connection", "57P01"));
        }
        if self.catalog.has_relation(relation) {
            Ok(())
        } else {
            Err(TenantError::with_state(
                format!("relation \"{relation}\" does not exist"),
                "42P01",
            ))
        }
    }

    /// Fail with a non-schema error, as a constraint violation would.
    pub async fn violate_constraint(&self) -> TenantResult<()> {
        self.cluster.inner.queries.fetch_add(1, Ordering::SeqCst);
        Err(TenantError::with_state("duplicate key value violates unique constraint", "23505"))
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.cluster.close_session(&self.database, self.epoch);
    }
}

#[async_trait]
impl SchemaExecutor for MemoryConnection {
    async fn execute_batch(&self, sql: &str) -> SchemaResult<()> {
        if !self.cluster.session_alive(&self.database, self.epoch) {
            return Err(SchemaError::with_state("terminating connection", "57P01"));
        }
        let (stall, fail) = {
            let state = self.cluster.inner.state.lock();
            let stall = state
                .stalls
                .iter()
                .find(|(needle, _)| sql.contains(needle.as_str()))
                .map(|(_, delay)| *delay);
            let fail = state.failing_statements.iter().any(|needle| sql.contains(needle.as_str()));
            (stall, fail)
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(SchemaError::with_state("injected failure", INJECTED_FAILURE));
        }
        self.catalog.execute_batch(sql).await
    }

    async fn existing_relations(&self, relations: &[String]) -> SchemaResult<Vec<String>> {
        self.catalog.existing_relations(relations).await
    }

    async fn user_relation_count(&self) -> SchemaResult<u64> {
        self.catalog.user_relation_count().await
    }
}
