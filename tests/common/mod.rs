//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use enclave::schema::{OrchestratorConfig, SchemaOrchestrator, SchemaRegistry, SqlModule};
use enclave::tenant::testing::MemoryCluster;
use enclave::tenant::{
    NamingPolicy, PoolManager, PoolManagerConfig, ProvisionConfig, RepairConfig,
    SchemaRepairService, TenantProvisioner,
};

/// Relations every tenant database must end up with.
pub const CRITICAL: [&str; 2] = ["tenants", "users"];

/// The five-module registry used across the suite.
pub fn modules() -> Vec<SqlModule> {
    vec![
        SqlModule::new("identity", 1)
            .statement("CREATE TABLE IF NOT EXISTS tenants (id uuid PRIMARY KEY)")
            .statement("CREATE TABLE IF NOT EXISTS users (id uuid PRIMARY KEY, tenant_id uuid)"),
        SqlModule::new("roles", 2)
            .requires("users")
            .statement("CREATE TABLE IF NOT EXISTS roles (id uuid PRIMARY KEY, user_id uuid)"),
        SqlModule::new("billing", 3)
            .statement("CREATE TABLE IF NOT EXISTS invoices (id uuid PRIMARY KEY)"),
        SqlModule::new("crm", 4)
            .requires("users")
            .statement("CREATE TABLE IF NOT EXISTS contacts (id uuid PRIMARY KEY)"),
        SqlModule::new("audit", 5)
            .statement("CREATE TABLE IF NOT EXISTS audit_log (id bigserial PRIMARY KEY)"),
    ]
}

/// Registry of [`modules`], optionally with extra modules appended.
pub fn registry_with(extra: Vec<SqlModule>) -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::builder()
            .extend_sql(modules())
            .extend_sql(extra)
            .build()
            .unwrap(),
    )
}

/// Registry of [`modules`].
pub fn registry() -> Arc<SchemaRegistry> {
    registry_with(Vec::new())
}

/// Orchestrator checking [`CRITICAL`].
pub fn orchestrator() -> SchemaOrchestrator {
    SchemaOrchestrator::new(OrchestratorConfig::new().critical_relations(CRITICAL))
}

/// Naming without the tenant suffix, so `acme` becomes `agency_acme`.
pub fn plain_naming() -> NamingPolicy {
    NamingPolicy::new().append_tenant_suffix(false)
}

/// A pool manager over `cluster`.
pub fn pools(cluster: &MemoryCluster, config: PoolManagerConfig) -> Arc<PoolManager<MemoryCluster>> {
    Arc::new(PoolManager::new(cluster.clone(), config).unwrap())
}

/// Provisioner, pool manager and repair service sharing one cluster.
pub struct Harness {
    pub cluster: MemoryCluster,
    pub pools: Arc<PoolManager<MemoryCluster>>,
    pub provisioner: TenantProvisioner<MemoryCluster, MemoryCluster>,
    pub repair: SchemaRepairService<MemoryCluster>,
}

impl Harness {
    /// Default harness: plain naming and the standard registry.
    pub fn new() -> Self {
        Self::with(registry(), ProvisionConfig::new().naming(plain_naming()))
    }

    /// Harness with a specific registry and provisioning config.
    pub fn with(registry: Arc<SchemaRegistry>, config: ProvisionConfig) -> Self {
        let cluster = MemoryCluster::new();
        let pools = pools(
            &cluster,
            PoolManagerConfig::new().acquire_timeout(Duration::from_millis(500)),
        );
        let provisioner = TenantProvisioner::new(
            cluster.clone(),
            pools.clone(),
            registry.clone(),
            orchestrator(),
            config,
        );
        let repair = SchemaRepairService::new(pools.clone(), registry, orchestrator(), RepairConfig::new());
        Self {
            cluster,
            pools,
            provisioner,
            repair,
        }
    }
}
