//! Connection pools for PostgreSQL tenant databases.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use enclave_tenant::{PoolFactory, PoolStatus, TenantPool, TenantResult};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::config::PgConfig;
use crate::connection::PgConnection;
use crate::error::{PgError, PgResult};

/// A connection pool for one PostgreSQL database.
#[derive(Clone)]
pub struct PgPool {
    inner: Pool,
    config: Arc<PgConfig>,
}

impl PgPool {
    /// Create a pool for `config.database` without connecting.
    pub fn new(config: PgConfig, pool_config: PoolConfig) -> PgResult<Self> {
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(config.to_pg_config(), NoTls, mgr_config);

        let pool = Pool::builder(mgr)
            .max_size(pool_config.max_connections)
            .wait_timeout(pool_config.wait_timeout)
            .create_timeout(pool_config.create_timeout)
            .recycle_timeout(pool_config.recycle_timeout)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| PgError::config(format!("failed to create pool: {}", e)))?;

        debug!(
            host = %config.host,
            port = %config.port,
            database = %config.database,
            max_connections = %pool_config.max_connections,
            "PostgreSQL connection pool created"
        );

        Ok(Self {
            inner: pool,
            config: Arc::new(config),
        })
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> PgResult<PgConnection> {
        let client = self.inner.get().await?;
        Ok(PgConnection::new(client))
    }

    /// The database this pool connects to.
    pub fn database(&self) -> &str {
        &self.config.database
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Check if the pool is healthy by attempting to get a connection.
    pub async fn is_healthy(&self) -> bool {
        match self.inner.get().await {
            Ok(client) => client.query_one("SELECT 1", &[]).await.is_ok(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl TenantPool for PgPool {
    type Connection = PgConnection;

    async fn acquire(&self) -> TenantResult<PgConnection> {
        Ok(self.get().await?)
    }

    fn status(&self) -> PoolStatus {
        let status = self.inner.status();
        PoolStatus {
            size: status.size as usize,
            available: status.available as usize,
            max_size: status.max_size as usize,
            waiting: status.waiting as usize,
        }
    }

    fn close(&self) {
        self.inner.close();
        debug!(database = %self.config.database, "PostgreSQL connection pool closed");
    }
}

impl std::fmt::Debug for PgPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPool")
            .field("database", &self.config.database)
            .field("status", &self.status())
            .finish()
    }
}

/// Timeouts and sizing for one physical pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: usize,
    /// Maximum time to wait for a free connection.
    pub wait_timeout: Option<Duration>,
    /// Maximum time to open a new connection.
    pub create_timeout: Option<Duration>,
    /// Maximum time to health-check a returned connection.
    pub recycle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            wait_timeout: Some(Duration::from_secs(5)),
            create_timeout: Some(Duration::from_secs(10)),
            recycle_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Builds [`PgPool`]s for tenant databases on one server.
///
/// A pool is only handed back after one connection has been opened
/// successfully, so unreachable or missing databases fail at creation.
#[derive(Debug, Clone)]
pub struct PgPoolFactory {
    server: PgConfig,
    pool_config: PoolConfig,
}

impl PgPoolFactory {
    /// Create a factory for databases on the server described by `server`.
    pub fn new(server: PgConfig) -> Self {
        Self {
            server,
            pool_config: PoolConfig::default(),
        }
    }

    /// Override the per-pool timeouts; `max_connections` is supplied per call.
    pub fn with_pool_config(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    /// The server configuration.
    pub fn server(&self) -> &PgConfig {
        &self.server
    }
}

#[async_trait]
impl PoolFactory for PgPoolFactory {
    type Pool = PgPool;

    async fn create_pool(&self, database: &str, max_connections: usize) -> TenantResult<PgPool> {
        let pool_config = PoolConfig {
            max_connections,
            ..self.pool_config.clone()
        };
        let pool = PgPool::new(self.server.with_database(database), pool_config)?;

        if let Err(e) = pool.get().await {
            pool.inner.close();
            return Err(e.into());
        }

        info!(
            database = %database,
            max_connections,
            "Tenant pool connected"
        );
        Ok(pool)
    }
}
