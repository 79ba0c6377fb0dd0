//! # enclave-tenant
//!
//! Database-per-tenant lifecycle management.
//!
//! This crate provides:
//! - [`TenantProvisioner`]: creates an isolated database per tenant and
//!   rolls back to nothing on any failure
//! - [`PoolManager`]: a bounded, LRU-evicted cache of per-tenant pools
//! - [`SchemaRepairService`]: re-applies schema modules when a query hits a
//!   missing relation, then retries once
//! - Backend traits ([`PoolFactory`], [`TenantPool`], [`DatabaseAdmin`])
//!   implemented by `enclave-postgres`
//!
//! ## Architecture
//!
//! ```text
//!   signup ──▶ TenantProvisioner ──┐
//!                                  ├──▶ PoolManager ──▶ PoolFactory ──▶ server
//!   request ─▶ SchemaRepairService ┘        │
//!                     │                     └── evict_idle / enforce_cap
//!                     ▼
//!             SchemaOrchestrator (enclave-schema)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use enclave_tenant::{PoolManager, PoolManagerConfig, SchemaRepairService, RepairConfig};
//!
//! let pools = Arc::new(PoolManager::new(factory, PoolManagerConfig::default())?);
//! let _sweeper = pools.spawn_sweeper();
//!
//! let repair = SchemaRepairService::new(pools.clone(), registry, orchestrator, RepairConfig::default());
//! let rows = repair
//!     .with_repair("agency_acme", |pool| async move {
//!         let conn = pool.acquire().await?;
//!         conn.query("SELECT id FROM projects", &[]).await
//!     })
//!     .await?;
//! ```

pub mod backend;
pub mod context;
pub mod error;
pub mod keyed;
pub mod logging;
pub mod naming;
pub mod pool;
pub mod provision;
pub mod repair;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports
pub use backend::{DatabaseAdmin, PoolFactory, PoolStatus, TenantPool};
pub use context::{TenantDatabase, TenantId, TenantState};
pub use error::{TenantError, TenantResult};
pub use keyed::{KeyedGuard, KeyedLocks};
pub use naming::{MAX_IDENTIFIER_LENGTH, NamingPolicy, tenant_suffix};
pub use pool::{
    PoolEntryStats, PoolHandle, PoolManager, PoolManagerConfig, PoolManagerStats, PooledConnection,
};
pub use provision::{ProvisionConfig, ProvisionMarker, TenantProvisioner};
pub use repair::{RepairConfig, RepairError, RepairReport, SchemaRepairService};
