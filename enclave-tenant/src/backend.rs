//! The seams between tenant management and a concrete database server.
//!
//! `enclave-postgres` implements these for PostgreSQL; tests implement them
//! in memory.

use async_trait::async_trait;
use enclave_schema::SchemaExecutor;
use serde::Serialize;

use crate::error::TenantResult;

/// Point-in-time occupancy of one physical pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Open connections.
    pub size: usize,
    /// Idle connections ready to hand out.
    pub available: usize,
    /// Connection cap for this pool.
    pub max_size: usize,
    /// Callers waiting for a connection.
    pub waiting: usize,
}

/// A bounded set of physical connections to one tenant database.
///
/// Clones share the same underlying pool.
#[async_trait]
pub trait TenantPool: Clone + Send + Sync + 'static {
    /// A borrowed connection; returned to the pool on drop.
    type Connection: SchemaExecutor + Send + Sync;

    /// Borrow a connection, waiting if the pool is saturated.
    async fn acquire(&self) -> TenantResult<Self::Connection>;

    /// Current occupancy.
    fn status(&self) -> PoolStatus;

    /// Close idle connections and refuse new borrows.
    fn close(&self);
}

/// Builds pools for tenant databases.
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    /// The pool type produced.
    type Pool: TenantPool;

    /// Connect to `database` with at most `max_connections` connections.
    async fn create_pool(&self, database: &str, max_connections: usize) -> TenantResult<Self::Pool>;
}

#[async_trait]
impl<T> PoolFactory for std::sync::Arc<T>
where
    T: PoolFactory,
{
    type Pool = T::Pool;

    async fn create_pool(&self, database: &str, max_connections: usize) -> TenantResult<Self::Pool> {
        (**self).create_pool(database, max_connections).await
    }
}

/// Server-level administration: the operations that run outside any tenant
/// database.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync + 'static {
    /// Whether a database named `name` exists.
    async fn database_exists(&self, name: &str) -> TenantResult<bool>;

    /// The provisioning marker recorded on `name`, if any.
    async fn database_marker(&self, name: &str) -> TenantResult<Option<String>>;

    /// Create an empty database and record `marker` on it.
    async fn create_database(&self, name: &str, marker: &str) -> TenantResult<()>;

    /// Replace the marker on `name`.
    async fn set_marker(&self, name: &str, marker: &str) -> TenantResult<()>;

    /// Terminate every session connected to `name`; returns how many.
    async fn terminate_connections(&self, name: &str) -> TenantResult<u64>;

    /// Drop `name` if it exists.
    async fn drop_database(&self, name: &str) -> TenantResult<()>;

    /// Database names starting with `prefix`, sorted.
    async fn list_databases(&self, prefix: &str) -> TenantResult<Vec<String>>;
}

#[async_trait]
impl<T> DatabaseAdmin for std::sync::Arc<T>
where
    T: DatabaseAdmin + ?Sized,
{
    async fn database_exists(&self, name: &str) -> TenantResult<bool> {
        (**self).database_exists(name).await
    }

    async fn database_marker(&self, name: &str) -> TenantResult<Option<String>> {
        (**self).database_marker(name).await
    }

    async fn create_database(&self, name: &str, marker: &str) -> TenantResult<()> {
        (**self).create_database(name, marker).await
    }

    async fn set_marker(&self, name: &str, marker: &str) -> TenantResult<()> {
        (**self).set_marker(name, marker).await
    }

    async fn terminate_connections(&self, name: &str) -> TenantResult<u64> {
        (**self).terminate_connections(name).await
    }

    async fn drop_database(&self, name: &str) -> TenantResult<()> {
        (**self).drop_database(name).await
    }

    async fn list_databases(&self, prefix: &str) -> TenantResult<Vec<String>> {
        (**self).list_databases(prefix).await
    }
}
