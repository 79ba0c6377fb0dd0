//! Wiring from configuration to live services.

use std::path::Path;
use std::sync::Arc;

use enclave_postgres::{PgAdmin, PgConfig, PgPoolFactory, PoolConfig};
use enclave_schema::{ModuleDirectory, SchemaOrchestrator, SchemaRegistry, SqlModule};
use enclave_tenant::{PoolManager, SchemaRepairService, TenantProvisioner};
use tracing::debug;

use crate::config::Config;
use crate::error::{CliError, CliResult};

/// Read the module files in `dir`, resolved against `cwd`.
pub async fn load_modules(dir: &Path, cwd: &Path) -> CliResult<Vec<SqlModule>> {
    let dir = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        cwd.join(dir)
    };
    if !dir.is_dir() {
        return Err(CliError::Config(format!(
            "schema module directory not found: {}",
            dir.display()
        )));
    }
    Ok(ModuleDirectory::new(dir).load().await?)
}

/// Load the module registry from `dir`, resolved against `cwd`.
pub async fn load_registry(dir: &Path, cwd: &Path) -> CliResult<SchemaRegistry> {
    let modules = load_modules(dir, cwd).await?;
    Ok(SchemaRegistry::builder().extend_sql(modules).build()?)
}

/// Everything a database command needs.
pub struct Services {
    /// Loaded configuration.
    pub config: Config,
    /// Server administration.
    pub admin: Arc<PgAdmin>,
    /// Tenant pools.
    pub pools: Arc<PoolManager<PgPoolFactory>>,
    /// Schema modules.
    pub registry: Arc<SchemaRegistry>,
    /// Module runner.
    pub orchestrator: SchemaOrchestrator,
}

impl Services {
    /// Connect services described by `config`.
    ///
    /// No connection is opened until a command needs one.
    pub async fn connect(config: Config, cwd: &Path) -> CliResult<Self> {
        let server = PgConfig::from_url(config.database_url()?)?;
        let pool_settings = config.pool_manager_config()?;

        let factory = PgPoolFactory::new(server.clone()).with_pool_config(PoolConfig {
            max_connections: pool_settings.max_connections_per_pool,
            wait_timeout: Some(pool_settings.acquire_timeout),
            create_timeout: Some(pool_settings.connect_timeout),
            ..PoolConfig::default()
        });

        debug!(server = %server.redacted_url(), "Connecting services");

        let admin = Arc::new(PgAdmin::new(server)?);
        let pools = Arc::new(PoolManager::new(factory, pool_settings)?);
        let registry = Arc::new(load_registry(&config.schema.modules_dir, cwd).await?);
        let orchestrator = SchemaOrchestrator::new(config.orchestrator_config()?);

        Ok(Self {
            config,
            admin,
            pools,
            registry,
            orchestrator,
        })
    }

    /// A provisioner over these services.
    pub fn provisioner(&self) -> CliResult<TenantProvisioner<Arc<PgAdmin>, PgPoolFactory>> {
        Ok(TenantProvisioner::new(
            self.admin.clone(),
            self.pools.clone(),
            self.registry.clone(),
            self.orchestrator.clone(),
            self.config.provision_config()?,
        ))
    }

    /// A repair service over these services.
    pub fn repair_service(&self) -> CliResult<SchemaRepairService<PgPoolFactory>> {
        Ok(SchemaRepairService::new(
            self.pools.clone(),
            self.registry.clone(),
            self.orchestrator.clone(),
            self.config.repair_config()?,
        ))
    }

    /// Close every pool.
    pub fn shutdown(&self) {
        self.pools.close_all();
        self.admin.close();
    }
}
