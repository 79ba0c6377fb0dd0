//! Creating isolated tenant databases.
//!
//! Provisioning either produces a `ready` database or leaves nothing behind:
//!
//! 1. normalize the requested name
//! 2. drop a residual left by a crashed attempt of the same tenant
//! 3. create an empty database, marked as provisioning
//! 4. connect through the pool manager and confirm the catalog is empty
//! 5. apply every schema module in rank order
//! 6. verify the critical relations, then mark the database ready
//!
//! Any failure in steps 3-6, including the overall timeout, terminates
//! sessions and drops the database before the error is returned.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use enclave_schema::{SchemaExecutor, SchemaOrchestrator, SchemaRegistry, SqlStateError, sqlstate};
use parking_lot::Mutex;
use tracing::{Instrument, error, info, info_span, warn};

use crate::backend::{DatabaseAdmin, PoolFactory};
use crate::context::{TenantDatabase, TenantId, TenantState};
use crate::error::{TenantError, TenantResult};
use crate::keyed::KeyedLocks;
use crate::naming::NamingPolicy;
use crate::pool::PoolManager;

const MARKER_NAMESPACE: &str = "enclave";

/// The durable note recorded on each tenant database.
///
/// Stored as the database comment so it survives process crashes; a
/// `Provisioning` marker found at startup means an attempt never finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionMarker {
    /// Provisioning started but has not completed.
    Provisioning(TenantId),
    /// Every module applied and verified.
    Ready(TenantId),
}

impl ProvisionMarker {
    /// Parse a marker, returning `None` for foreign comments.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        if parts.next()? != MARKER_NAMESPACE {
            return None;
        }
        let state = parts.next()?;
        let tenant = parts.next().filter(|t| !t.is_empty())?;
        match state {
            "provisioning" => Some(Self::Provisioning(TenantId::new(tenant))),
            "ready" => Some(Self::Ready(TenantId::new(tenant))),
            _ => None,
        }
    }

    /// The tenant that wrote the marker.
    pub fn tenant(&self) -> &TenantId {
        match self {
            Self::Provisioning(t) | Self::Ready(t) => t,
        }
    }

    /// The lifecycle state the marker records.
    pub fn state(&self) -> TenantState {
        match self {
            Self::Provisioning(_) => TenantState::Provisioning,
            Self::Ready(_) => TenantState::Ready,
        }
    }
}

impl fmt::Display for ProvisionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning(t) => write!(f, "{MARKER_NAMESPACE}:provisioning:{t}"),
            Self::Ready(t) => write!(f, "{MARKER_NAMESPACE}:ready:{t}"),
        }
    }
}

/// Configuration for the provisioner.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Name normalization rules.
    pub naming: NamingPolicy,
    /// Budget for steps 3-6 together.
    pub timeout: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            naming: NamingPolicy::default(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl ProvisionConfig {
    /// Create a new config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the naming policy.
    pub fn naming(mut self, naming: NamingPolicy) -> Self {
        self.naming = naming;
        self
    }

    /// Set the provisioning timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Creates and removes tenant databases.
pub struct TenantProvisioner<A: DatabaseAdmin, F: PoolFactory> {
    admin: A,
    pools: Arc<PoolManager<F>>,
    registry: Arc<SchemaRegistry>,
    orchestrator: SchemaOrchestrator,
    config: ProvisionConfig,
    locks: KeyedLocks,
    states: Mutex<HashMap<TenantId, TenantDatabase>>,
}

impl<A: DatabaseAdmin, F: PoolFactory> TenantProvisioner<A, F> {
    /// Create a provisioner.
    pub fn new(
        admin: A,
        pools: Arc<PoolManager<F>>,
        registry: Arc<SchemaRegistry>,
        orchestrator: SchemaOrchestrator,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            admin,
            pools,
            registry,
            orchestrator,
            config,
            locks: KeyedLocks::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// The provisioner configuration.
    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// The administrative backend.
    pub fn admin(&self) -> &A {
        &self.admin
    }

    /// The database name `requested` normalizes to for `tenant`.
    pub fn database_name(&self, tenant: &TenantId, requested: &str) -> TenantResult<String> {
        self.config.naming.normalize(tenant, requested)
    }

    /// Last known state of `tenant` in this process.
    pub fn state(&self, tenant: &TenantId) -> TenantState {
        self.states
            .lock()
            .get(tenant)
            .map_or(TenantState::Absent, |t| t.state)
    }

    /// Last known database record of `tenant` in this process.
    pub fn tenant_database(&self, tenant: &TenantId) -> Option<TenantDatabase> {
        self.states.lock().get(tenant).cloned()
    }

    /// Create a fully initialized database for `tenant`.
    ///
    /// Returns the database in state `ready`, or an error with the database
    /// guaranteed absent: `NameConflict` if the name belongs to another
    /// database, `InvalidName` if the request cannot be normalized, and
    /// `Provision` for everything after creation began.
    pub async fn provision(&self, tenant: &TenantId, requested: &str) -> TenantResult<TenantDatabase> {
        let database = self.database_name(tenant, requested)?;
        let span = info_span!("provision", tenant = %tenant, database = %database);

        async {
            let _guard = self.locks.lock(&database).await;
            self.clear_residual(tenant, &database).await?;

            self.set_state(tenant, &database, TenantState::Provisioning);
            let started = Instant::now();
            info!("Provisioning tenant database");

            let mut created = false;
            let outcome = match tokio::time::timeout(
                self.config.timeout,
                self.build(tenant, &database, &mut created),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(TenantError::timeout("provisioning", self.config.timeout)),
            };

            match outcome {
                Ok(applied) => {
                    self.set_state(tenant, &database, TenantState::Ready);
                    info!(
                        modules = applied,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Tenant database ready"
                    );
                    Ok(TenantDatabase::new(tenant.clone(), database.clone(), TenantState::Ready))
                }
                Err(e) if e.is_name_conflict() => {
                    self.states.lock().remove(tenant);
                    Err(e)
                }
                Err(e) => {
                    warn!(error = %e, "Provisioning failed; rolling back");
                    if created {
                        self.rollback(&database).await;
                    }
                    self.set_state(tenant, &database, TenantState::Failed);
                    Err(TenantError::provision(&database, e))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Remove `database`, which must belong to `tenant`.
    pub async fn deprovision(&self, tenant: &TenantId, database: &str) -> TenantResult<()> {
        let _guard = self.locks.lock(database).await;
        if !self.admin.database_exists(database).await? {
            self.states.lock().remove(tenant);
            return Ok(());
        }

        let marker = self.admin.database_marker(database).await?;
        let owner = marker.as_deref().and_then(ProvisionMarker::parse);
        if owner.as_ref().map(ProvisionMarker::tenant) != Some(tenant) {
            return Err(TenantError::NotOwned {
                database: database.to_string(),
                tenant: tenant.to_string(),
            });
        }

        self.remove_database(database).await?;
        self.states.lock().remove(tenant);
        info!(tenant = %tenant, database = %database, "Tenant database deprovisioned");
        Ok(())
    }

    /// Remove `database` without checking ownership.
    pub async fn deprovision_unchecked(&self, database: &str) -> TenantResult<()> {
        let _guard = self.locks.lock(database).await;
        self.remove_database(database).await?;
        self.states.lock().retain(|_, t| t.database_name != database);
        warn!(database = %database, "Tenant database dropped without ownership check");
        Ok(())
    }

    /// Step 2: refuse foreign databases, drop our own residue.
    ///
    /// Creating a database and marking it are separate statements, so a
    /// crash in between leaves a database with no marker at all. One that is
    /// also empty is treated as residue; one with any relation is foreign.
    async fn clear_residual(&self, tenant: &TenantId, database: &str) -> TenantResult<()> {
        if !self.admin.database_exists(database).await? {
            return Ok(());
        }

        let marker = self.admin.database_marker(database).await?;
        let residual = match marker.as_deref() {
            Some(text) => matches!(
                ProvisionMarker::parse(text),
                Some(ProvisionMarker::Provisioning(owner)) if owner == *tenant
            ),
            None => self.is_empty(database).await?,
        };
        if !residual {
            return Err(TenantError::NameConflict {
                database: database.to_string(),
            });
        }

        warn!(
            marked = marker.is_some(),
            "Dropping residual database from an aborted provisioning attempt"
        );
        self.remove_database(database)
            .await
            .map_err(|e| TenantError::provision(database, e))
    }

    async fn is_empty(&self, database: &str) -> TenantResult<bool> {
        let handle = self.pools.get_pool(database).await?;
        let conn = handle.acquire().await?;
        Ok(conn.user_relation_count().await? == 0)
    }

    /// Steps 3-6. Returns the number of modules applied.
    ///
    /// `created` is set once `CREATE DATABASE` may have taken effect, which
    /// includes a create that timed out. It stays false only when the server
    /// reported that the name was already taken.
    async fn build(&self, tenant: &TenantId, database: &str, created: &mut bool) -> TenantResult<usize> {
        let marker = ProvisionMarker::Provisioning(tenant.clone()).to_string();
        *created = true;
        if let Err(e) = self.admin.create_database(database, &marker).await {
            if e.sql_state() == Some(sqlstate::DUPLICATE_DATABASE) {
                *created = false;
                return Err(TenantError::NameConflict {
                    database: database.to_string(),
                });
            }
            return Err(e);
        }

        let handle = self.pools.get_pool(database).await?;
        let conn = handle.acquire().await?;

        let relations = conn.user_relation_count().await?;
        if relations > 0 {
            return Err(TenantError::CatalogNotEmpty {
                database: database.to_string(),
                relations,
            });
        }

        let result = self.orchestrator.apply(&*conn, &self.registry).await;
        if let Some(e) = result.error {
            return Err(e.into());
        }
        if !result.missing_relations.is_empty() {
            return Err(TenantError::MissingRelations {
                database: database.to_string(),
                relations: result.missing_relations,
            });
        }

        let ready = ProvisionMarker::Ready(tenant.clone()).to_string();
        self.admin.set_marker(database, &ready).await?;
        Ok(result.applied_modules.len())
    }

    /// Step 7. Errors are logged; the original failure is what the caller sees.
    async fn rollback(&self, database: &str) {
        if let Err(e) = self.remove_database(database).await {
            error!(database = %database, error = %e, "Rollback failed; database may still exist");
        }
    }

    async fn remove_database(&self, database: &str) -> TenantResult<()> {
        self.pools.invalidate(database);
        let terminated = self.admin.terminate_connections(database).await?;
        self.admin.drop_database(database).await?;
        info!(database = %database, terminated, "Database dropped");
        Ok(())
    }

    fn set_state(&self, tenant: &TenantId, database: &str, state: TenantState) {
        self.states.lock().insert(
            tenant.clone(),
            TenantDatabase::new(tenant.clone(), database, state),
        );
    }
}

impl<A: DatabaseAdmin, F: PoolFactory> fmt::Debug for TenantProvisioner<A, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantProvisioner")
            .field("config", &self.config)
            .field("modules", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolManagerConfig;
    use crate::testing::MemoryCluster;
    use enclave_schema::{OrchestratorConfig, SqlModule};
    use pretty_assertions::assert_eq;

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::builder()
                .register_sql(SqlModule::new("identity", 0).statements([
                    "CREATE TABLE IF NOT EXISTS tenants (id INT)",
                    "CREATE TABLE IF NOT EXISTS users (id INT)",
                ]))
                .register_sql(
                    SqlModule::new("billing", 1).statement("CREATE TABLE IF NOT EXISTS invoices (id INT)"),
                )
                .build()
                .unwrap(),
        )
    }

    fn provisioner(cluster: &MemoryCluster) -> TenantProvisioner<MemoryCluster, MemoryCluster> {
        let pools = Arc::new(PoolManager::new(cluster.clone(), PoolManagerConfig::new()).unwrap());
        TenantProvisioner::new(
            cluster.clone(),
            pools,
            registry(),
            SchemaOrchestrator::new(OrchestratorConfig::new().critical_relations(["tenants", "users"])),
            ProvisionConfig::new().naming(NamingPolicy::new().append_tenant_suffix(false)),
        )
    }

    #[test]
    fn test_marker_round_trip() {
        let marker = ProvisionMarker::Provisioning(TenantId::new("acme"));
        assert_eq!(marker.to_string(), "enclave:provisioning:acme");
        assert_eq!(ProvisionMarker::parse("enclave:provisioning:acme"), Some(marker));

        let ready = ProvisionMarker::parse("enclave:ready:a:b").unwrap();
        assert_eq!(ready.tenant().as_str(), "a:b");
        assert_eq!(ready.state(), TenantState::Ready);

        assert_eq!(ProvisionMarker::parse("billing database"), None);
        assert_eq!(ProvisionMarker::parse("enclave:ready:"), None);
    }

    #[tokio::test]
    async fn test_provision_ready() {
        let cluster = MemoryCluster::new();
        let prov = provisioner(&cluster);
        let acme = TenantId::new("acme");

        let db = prov.provision(&acme, "acme").await.unwrap();

        assert_eq!(db.database_name, "agency_acme");
        assert_eq!(db.state, TenantState::Ready);
        assert_eq!(prov.state(&acme), TenantState::Ready);
        assert_eq!(cluster.marker("agency_acme").as_deref(), Some("enclave:ready:acme"));
        let catalog = cluster.catalog("agency_acme").unwrap();
        assert_eq!(catalog.relations(), vec!["tenants", "users", "invoices"]);
    }

    #[tokio::test]
    async fn test_failure_rolls_back() {
        let cluster = MemoryCluster::new();
        cluster.fail_statements_containing("invoices");
        let prov = provisioner(&cluster);
        let tenant = TenantId::new("acme2");

        let err = prov.provision(&tenant, "acme2").await.unwrap_err();

        assert!(err.is_provision_error());
        assert!(!cluster.exists("agency_acme2"));
        assert_eq!(prov.state(&tenant), TenantState::Failed);
    }

    #[tokio::test]
    async fn test_existing_foreign_database_is_a_conflict() {
        let cluster = MemoryCluster::new();
        cluster.insert_database("agency_acme", Some("enclave:ready:someone-else"));
        let prov = provisioner(&cluster);

        let err = prov.provision(&TenantId::new("acme"), "acme").await.unwrap_err();

        assert!(err.is_name_conflict());
        assert!(cluster.exists("agency_acme"));
    }

    #[tokio::test]
    async fn test_unmarked_empty_database_is_rebuilt() {
        let cluster = MemoryCluster::new();
        cluster.insert_database("agency_acme", None);
        let prov = provisioner(&cluster);

        prov.provision(&TenantId::new("acme"), "acme").await.unwrap();

        assert_eq!(cluster.marker("agency_acme").as_deref(), Some("enclave:ready:acme"));
        assert_eq!(
            cluster.events(),
            vec!["terminate agency_acme", "drop agency_acme", "create agency_acme"]
        );
    }

    #[tokio::test]
    async fn test_unmarked_database_with_relations_is_a_conflict() {
        let cluster = MemoryCluster::new();
        cluster.insert_database("agency_acme", None).seed("customers");
        let prov = provisioner(&cluster);

        let err = prov.provision(&TenantId::new("acme"), "acme").await.unwrap_err();

        assert!(err.is_name_conflict());
        assert!(cluster.catalog("agency_acme").unwrap().has_relation("customers"));
        assert!(cluster.events().is_empty());
    }

    #[tokio::test]
    async fn test_own_residual_is_rebuilt() {
        let cluster = MemoryCluster::new();
        let stale = cluster.insert_database("agency_acme", Some("enclave:provisioning:acme"));
        stale.seed("half_built");
        let prov = provisioner(&cluster);

        prov.provision(&TenantId::new("acme"), "acme").await.unwrap();

        let catalog = cluster.catalog("agency_acme").unwrap();
        assert!(!catalog.has_relation("half_built"));
        assert!(catalog.has_relation("invoices"));
    }

    #[tokio::test]
    async fn test_create_failure_leaves_nothing() {
        let cluster = MemoryCluster::new();
        cluster.fail_create_database(true);
        let prov = provisioner(&cluster);

        let err = prov.provision(&TenantId::new("acme"), "acme").await.unwrap_err();

        assert!(err.is_provision_error());
        assert!(cluster.database_names().is_empty());
    }

    #[tokio::test]
    async fn test_deprovision_checks_owner() {
        let cluster = MemoryCluster::new();
        let prov = provisioner(&cluster);
        let acme = TenantId::new("acme");
        prov.provision(&acme, "acme").await.unwrap();

        let err = prov.deprovision(&TenantId::new("intruder"), "agency_acme").await.unwrap_err();
        assert!(matches!(err, TenantError::NotOwned { .. }));

        prov.deprovision(&acme, "agency_acme").await.unwrap();
        assert!(!cluster.exists("agency_acme"));
        assert_eq!(prov.state(&acme), TenantState::Absent);
    }

    #[tokio::test]
    async fn test_deprovision_forgets_tenant_state() {
        let cluster = MemoryCluster::new();
        let prov = provisioner(&cluster);
        let acme = TenantId::new("acme");
        let globex = TenantId::new("globex");
        prov.provision(&acme, "acme").await.unwrap();
        prov.provision(&globex, "globex").await.unwrap();
        assert_eq!(prov.states.lock().len(), 2);

        prov.deprovision(&acme, "agency_acme").await.unwrap();
        assert!(prov.tenant_database(&acme).is_none());

        prov.deprovision_unchecked("agency_globex").await.unwrap();
        assert!(prov.tenant_database(&globex).is_none());
        assert!(prov.states.lock().is_empty());
    }
}
