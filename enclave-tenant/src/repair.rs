//! Request-time schema self-repair.
//!
//! [`SchemaRepairService::with_repair`] runs a query against a tenant pool.
//! If it fails because a relation, column, function or type is missing
//! (judged by SQLSTATE), the service re-applies the schema modules to that
//! database and retries the query exactly once.
//!
//! Repairs for one database are serialized. Callers that queued behind an
//! in-flight repair notice that it completed and skip straight to their
//! retry, so a burst of identical failures triggers one orchestration run.
//!
//! A repair never drops or recreates a database; it only re-applies
//! modules, which are idempotent.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use enclave_schema::{ApplyResult, SchemaOrchestrator, SchemaRegistry, SqlStateError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::PoolFactory;
use crate::error::{TenantError, TenantResult};
use crate::keyed::KeyedLocks;
use crate::pool::{PoolHandle, PoolManager};

/// Configuration for the repair service.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Upper bound for one orchestration run.
    pub repair_timeout: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            repair_timeout: Duration::from_secs(60),
        }
    }
}

impl RepairConfig {
    /// Create a new config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the repair timeout.
    pub fn repair_timeout(mut self, timeout: Duration) -> Self {
        self.repair_timeout = timeout;
        self
    }
}

/// Failure of a query run through [`SchemaRepairService::with_repair`].
#[derive(Debug, Error)]
pub enum RepairError<E> {
    /// The query failed for a reason repair cannot fix.
    #[error("{0}")]
    Query(E),

    /// The query failed on a missing object and repair did not help.
    ///
    /// `error` is the retried query's error, or the original one when the
    /// repair itself failed (`cause` is then set).
    #[error("{error} (schema repair attempted)")]
    RepairFailed {
        /// The query error surfaced to the caller.
        error: E,
        /// Why the repair run failed, if it did.
        #[source]
        cause: Option<TenantError>,
    },

    /// No pool could be obtained for the database.
    #[error(transparent)]
    Pool(TenantError),
}

impl<E> RepairError<E> {
    /// The query error, if the query ran.
    pub fn query_error(&self) -> Option<&E> {
        match self {
            Self::Query(e) | Self::RepairFailed { error: e, .. } => Some(e),
            Self::Pool(_) => None,
        }
    }

    /// Unwrap into the query error, if the query ran.
    pub fn into_query_error(self) -> Option<E> {
        match self {
            Self::Query(e) | Self::RepairFailed { error: e, .. } => Some(e),
            Self::Pool(_) => None,
        }
    }

    /// Whether a repair was attempted.
    pub fn repair_attempted(&self) -> bool {
        matches!(self, Self::RepairFailed { .. })
    }
}

/// Outcome of repairing one database in [`SchemaRepairService::repair_all`].
#[derive(Debug)]
pub struct RepairReport {
    /// The tenant database.
    pub database: String,
    /// The orchestration result, or why it failed.
    pub result: TenantResult<ApplyResult>,
}

impl RepairReport {
    /// Whether the repair completed.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Re-applies schema modules to live tenant databases on demand.
pub struct SchemaRepairService<F: PoolFactory> {
    pools: Arc<PoolManager<F>>,
    registry: Arc<SchemaRegistry>,
    orchestrator: SchemaOrchestrator,
    config: RepairConfig,
    locks: KeyedLocks,
    generations: Mutex<HashMap<String, u64>>,
    runs: AtomicU64,
}

impl<F: PoolFactory> SchemaRepairService<F> {
    /// Create a repair service.
    pub fn new(
        pools: Arc<PoolManager<F>>,
        registry: Arc<SchemaRegistry>,
        orchestrator: SchemaOrchestrator,
        config: RepairConfig,
    ) -> Self {
        Self {
            pools,
            registry,
            orchestrator,
            config,
            locks: KeyedLocks::new(),
            generations: Mutex::new(HashMap::new()),
            runs: AtomicU64::new(0),
        }
    }

    /// The pool manager repairs run through.
    pub fn pools(&self) -> &Arc<PoolManager<F>> {
        &self.pools
    }

    /// Orchestration runs started since creation.
    pub fn repair_runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Run `query` against `database`'s pool, repairing the schema once if
    /// the query fails on a missing object.
    ///
    /// `query` is called at most twice. Errors that are not missing-object
    /// errors are returned immediately as [`RepairError::Query`].
    pub async fn with_repair<T, E, Q, Fut>(&self, database: &str, mut query: Q) -> Result<T, RepairError<E>>
    where
        Q: FnMut(F::Pool) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: SqlStateError + fmt::Display,
    {
        let handle = match self.pools.get_pool(database).await {
            Ok(handle) => handle,
            Err(e) => {
                self.generations.lock().remove(database);
                return Err(RepairError::Pool(e));
            }
        };
        let generation = self.generation(database);

        let original = match query(handle.pool().clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_missing_relation() => return Err(RepairError::Query(e)),
            Err(e) => e,
        };

        warn!(
            database = %database,
            sql_state = original.sql_state().unwrap_or_default(),
            error = %original,
            "Query hit a missing schema object; repairing"
        );

        if let Err(cause) = self.repair_after(&handle, generation).await {
            warn!(database = %database, error = %cause, "Schema repair failed");
            return Err(RepairError::RepairFailed {
                error: original,
                cause: Some(cause),
            });
        }

        match query(handle.pool().clone()).await {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(database = %database, error = %error, "Query still failing after repair");
                Err(RepairError::RepairFailed { error, cause: None })
            }
        }
    }

    /// Re-apply every module to `database` now.
    pub async fn repair(&self, database: &str) -> TenantResult<ApplyResult> {
        let handle = self.pools.get_pool(database).await?;
        let _guard = self.locks.lock(database).await;
        self.run(&handle).await
    }

    /// Re-apply modules to each database in turn.
    ///
    /// One database failing does not stop the sweep.
    pub async fn repair_all<I, S>(&self, databases: I) -> Vec<RepairReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut reports = Vec::new();
        for database in databases {
            let database = database.as_ref();
            let result = self.repair(database).await;
            if let Err(e) = &result {
                warn!(database = %database, error = %e, "Repair sweep: database failed");
            }
            reports.push(RepairReport {
                database: database.to_string(),
                result,
            });
        }
        let failed = reports.iter().filter(|r| !r.is_success()).count();
        info!(databases = reports.len(), failed, "Repair sweep finished");
        reports
    }

    /// Serialize on the per-database lock; skip the run if another caller
    /// completed one since `seen` was sampled.
    async fn repair_after(&self, handle: &PoolHandle<F::Pool>, seen: u64) -> TenantResult<()> {
        let database = handle.database();
        let _guard = self.locks.lock(database).await;
        if self.generation(database) != seen {
            debug!(database = %database, "Repair already completed by a concurrent caller");
            return Ok(());
        }
        self.run(handle).await.map(|_| ())
    }

    /// One orchestration run. The caller holds the per-database lock.
    async fn run(&self, handle: &PoolHandle<F::Pool>) -> TenantResult<ApplyResult> {
        let database = handle.database();
        self.runs.fetch_add(1, Ordering::SeqCst);

        let limit = self.config.repair_timeout;
        let result = match tokio::time::timeout(limit, self.apply(handle)).await {
            Ok(result) => result?,
            Err(_) => return Err(TenantError::timeout(format!("repairing '{database}'"), limit)),
        };

        if let Some(e) = result.error {
            return Err(e.into());
        }
        if !result.missing_relations.is_empty() {
            return Err(TenantError::MissingRelations {
                database: database.to_string(),
                relations: result.missing_relations,
            });
        }

        {
            let mut generations = self.generations.lock();
            *generations.entry(database.to_string()).or_insert(0) += 1;
            // Only databases with a live pool can have a repair in flight.
            generations.retain(|db, _| db == database || self.pools.contains(db));
        }
        info!(
            database = %database,
            modules = result.applied_modules.len(),
            elapsed_ms = result.duration_ms,
            "Schema repaired"
        );
        Ok(result)
    }

    async fn apply(&self, handle: &PoolHandle<F::Pool>) -> TenantResult<ApplyResult> {
        let conn = handle.acquire().await?;
        Ok(self.orchestrator.apply(&*conn, &self.registry).await)
    }

    fn generation(&self, database: &str) -> u64 {
        self.generations.lock().get(database).copied().unwrap_or(0)
    }
}

impl<F: PoolFactory> fmt::Debug for SchemaRepairService<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRepairService")
            .field("config", &self.config)
            .field("modules", &self.registry.len())
            .field("runs", &self.repair_runs())
            .finish()
    }
}
