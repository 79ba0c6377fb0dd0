//! Applies a rank-ordered module list to one tenant database.
//!
//! ```text
//! rank 0 ──▶ rank 0 ──▶ rank 1 ──▶ rank 2 ──▶ catalog check
//!   │           │          │          │              │
//!   └───────────┴── halt on first failure ──┘        ▼
//!                                            missing critical relations
//! ```
//!
//! Modules run one after another on the same connection, never
//! concurrently. A failed run reports what was applied and stops; since
//! modules are idempotent, the next run simply starts again from rank 0.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::{SchemaError, SchemaResult};
use crate::executor::{SchemaExecutor, missing_from};
use crate::module::SchemaModule;
use crate::registry::SchemaRegistry;

/// Configuration for the schema orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound for a single module's `apply`.
    pub module_timeout: Option<Duration>,
    /// Relations that must exist after a full run.
    pub critical_relations: Vec<String>,
    /// Check each module's `required_after` before applying it.
    pub check_requirements: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            module_timeout: Some(Duration::from_secs(120)),
            critical_relations: Vec::new(),
            check_requirements: true,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-module timeout.
    pub fn module_timeout(mut self, timeout: Duration) -> Self {
        self.module_timeout = Some(timeout);
        self
    }

    /// Disable the per-module timeout.
    pub fn no_module_timeout(mut self) -> Self {
        self.module_timeout = None;
        self
    }

    /// Add a relation to the post-run checklist.
    pub fn critical_relation(mut self, relation: impl Into<String>) -> Self {
        self.critical_relations.push(relation.into());
        self
    }

    /// Replace the post-run checklist.
    pub fn critical_relations<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.critical_relations = relations.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable `required_after` checks.
    pub fn check_requirements(mut self, enabled: bool) -> Self {
        self.check_requirements = enabled;
        self
    }
}

/// A module that ran while one of its declared prerequisites was absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmetRequirement {
    /// The module that declared the requirement.
    pub module: String,
    /// The relation that was missing.
    pub relation: String,
}

/// Outcome of one orchestration run.
#[derive(Debug, Default)]
pub struct ApplyResult {
    /// Modules that completed, in order.
    pub applied_modules: Vec<String>,
    /// Critical relations absent after the run. Empty when the run halted.
    pub missing_relations: Vec<String>,
    /// Prerequisites that were absent when their module ran.
    pub unmet_requirements: Vec<UnmetRequirement>,
    /// The failure that halted the run, if any.
    pub error: Option<SchemaError>,
    /// Wall time of the run.
    pub duration_ms: u64,
}

impl ApplyResult {
    /// Every module applied and the checklist is complete.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.missing_relations.is_empty()
    }

    /// Whether the run stopped before the last module.
    pub fn halted(&self) -> bool {
        self.error.is_some()
    }

    /// Convert into a `Result`, keeping the report on success.
    ///
    /// A complete run with missing critical relations is not an error here;
    /// callers decide what an incomplete checklist means.
    pub fn into_result(self) -> SchemaResult<Self> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    /// Short human-readable summary.
    pub fn summary(&self) -> String {
        match &self.error {
            Some(err) => format!(
                "halted after {} module(s): {}",
                self.applied_modules.len(),
                err
            ),
            None if self.missing_relations.is_empty() => format!(
                "{} module(s) applied in {}ms",
                self.applied_modules.len(),
                self.duration_ms
            ),
            None => format!(
                "{} module(s) applied, missing: {}",
                self.applied_modules.len(),
                self.missing_relations.join(", ")
            ),
        }
    }
}

/// Drives schema modules against a single connection.
#[derive(Debug, Clone, Default)]
pub struct SchemaOrchestrator {
    config: OrchestratorConfig,
}

impl SchemaOrchestrator {
    /// Create an orchestrator.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    /// The orchestrator configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Apply every module in the registry.
    pub async fn apply(&self, conn: &dyn SchemaExecutor, registry: &SchemaRegistry) -> ApplyResult {
        self.run(conn, registry.modules()).await
    }

    /// Apply an arbitrary module list, stable-sorted by rank first.
    pub async fn apply_modules(
        &self,
        conn: &dyn SchemaExecutor,
        modules: &[Arc<dyn SchemaModule>],
    ) -> ApplyResult {
        let mut ordered = modules.to_vec();
        ordered.sort_by_key(|m| m.rank());
        self.run(conn, &ordered).await
    }

    async fn run(&self, conn: &dyn SchemaExecutor, modules: &[Arc<dyn SchemaModule>]) -> ApplyResult {
        let started = Instant::now();
        let mut result = ApplyResult::default();

        for module in modules {
            let span = info_span!("schema_module", module = %module.name(), rank = module.rank());

            if self.config.check_requirements && !module.required_after().is_empty() {
                match conn.existing_relations(module.required_after()).await {
                    Ok(present) => {
                        for relation in missing_from(module.required_after(), &present) {
                            warn!(
                                module = %module.name(),
                                relation = %relation,
                                "Module prerequisite missing; applying anyway"
                            );
                            result.unmet_requirements.push(UnmetRequirement {
                                module: module.name().to_string(),
                                relation,
                            });
                        }
                    }
                    Err(e) => {
                        result.error = Some(e.in_module(module.name()));
                        break;
                    }
                }
            }

            let module_started = Instant::now();
            match self.apply_one(conn, module.as_ref()).instrument(span).await {
                Ok(()) => {
                    debug!(
                        module = %module.name(),
                        elapsed_ms = module_started.elapsed().as_millis() as u64,
                        "Schema module applied"
                    );
                    result.applied_modules.push(module.name().to_string());
                }
                Err(e) => {
                    warn!(module = %module.name(), error = %e, "Schema module failed; halting");
                    result.error = Some(e);
                    break;
                }
            }
        }

        if result.error.is_none() && !self.config.critical_relations.is_empty() {
            match conn.existing_relations(&self.config.critical_relations).await {
                Ok(present) => {
                    result.missing_relations = missing_from(&self.config.critical_relations, &present);
                }
                Err(e) => result.error = Some(e),
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            applied = result.applied_modules.len(),
            missing = result.missing_relations.len(),
            halted = result.halted(),
            elapsed_ms = result.duration_ms,
            "Schema orchestration finished"
        );
        result
    }

    async fn apply_one(&self, conn: &dyn SchemaExecutor, module: &dyn SchemaModule) -> SchemaResult<()> {
        let fut = module.apply(conn);
        match self.config.module_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(outcome) => outcome.map_err(|e| e.in_module(module.name())),
                Err(_) => Err(SchemaError::Timeout {
                    module: module.name().to_string(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => fut.await.map_err(|e| e.in_module(module.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::SqlModule;
    use crate::testing::MemoryExecutor;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn table(name: &str, rank: i32) -> SqlModule {
        SqlModule::new(name, rank).statement(format!("CREATE TABLE IF NOT EXISTS {name} (id INT)"))
    }

    fn registry(modules: Vec<SqlModule>) -> SchemaRegistry {
        SchemaRegistry::builder().extend_sql(modules).build().unwrap()
    }

    #[tokio::test]
    async fn test_apply_in_rank_order() {
        let exec = MemoryExecutor::new();
        let reg = registry(vec![table("projects", 3), table("users", 0), table("invoices", 1)]);
        let orch = SchemaOrchestrator::new(
            OrchestratorConfig::new().critical_relations(["users", "projects"]),
        );

        let result = orch.apply(&exec, &reg).await;

        assert!(result.is_success());
        assert_eq!(result.applied_modules, vec!["users", "invoices", "projects"]);
        assert_eq!(exec.relations(), vec!["users", "invoices", "projects"]);
    }

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let exec = MemoryExecutor::new();
        let reg = registry(vec![table("users", 0), table("invoices", 1)]);
        let orch = SchemaOrchestrator::default();

        assert!(orch.apply(&exec, &reg).await.is_success());
        let once = exec.relations();
        assert!(orch.apply(&exec, &reg).await.is_success());

        assert_eq!(exec.relations(), once);
    }

    #[tokio::test]
    async fn test_failure_halts_run() {
        let exec = MemoryExecutor::new();
        exec.fail_on("invoices");
        let reg = registry(vec![
            table("users", 0),
            table("roles", 1),
            table("invoices", 2),
            table("projects", 3),
            table("reports", 4),
        ]);
        let orch = SchemaOrchestrator::new(OrchestratorConfig::new().critical_relation("users"));

        let result = orch.apply(&exec, &reg).await;

        assert!(result.halted());
        assert_eq!(result.applied_modules, vec!["users", "roles"]);
        assert_eq!(result.error.as_ref().and_then(|e| e.failed_module()), Some("invoices"));
        // Nothing after the failing module was attempted.
        assert!(exec.journal().iter().all(|s| !s.contains("projects") && !s.contains("reports")));
        // No catalog check on a halted run.
        assert!(result.missing_relations.is_empty());
    }

    #[tokio::test]
    async fn test_reports_missing_critical_relations() {
        let exec = MemoryExecutor::new();
        let reg = registry(vec![table("users", 0)]);
        let orch = SchemaOrchestrator::new(
            OrchestratorConfig::new().critical_relations(["users", "tenants"]),
        );

        let result = orch.apply(&exec, &reg).await;

        assert!(!result.is_success());
        assert!(!result.halted());
        assert_eq!(result.missing_relations, vec!["tenants"]);
        assert!(result.summary().contains("missing: tenants"));
    }

    #[tokio::test]
    async fn test_unmet_requirements_are_reported_not_enforced() {
        let exec = MemoryExecutor::new();
        let reg = registry(vec![table("users", 0), table("deals", 1).requires("contacts")]);
        let orch = SchemaOrchestrator::default();

        let result = orch.apply(&exec, &reg).await;

        assert!(result.is_success());
        assert_eq!(
            result.unmet_requirements,
            vec![UnmetRequirement {
                module: "deals".to_string(),
                relation: "contacts".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_apply_modules_sorts_stably() {
        let exec = MemoryExecutor::new();
        let modules: Vec<Arc<dyn SchemaModule>> = vec![
            Arc::new(table("b", 1)),
            Arc::new(table("a", 1)),
            Arc::new(table("core", 0)),
        ];

        let result = SchemaOrchestrator::default().apply_modules(&exec, &modules).await;
        assert_eq!(result.applied_modules, vec!["core", "b", "a"]);
    }

    struct Stalls;

    #[async_trait]
    impl SchemaModule for Stalls {
        fn name(&self) -> &str {
            "stalls"
        }

        fn rank(&self) -> i32 {
            1
        }

        async fn apply(&self, _conn: &dyn SchemaExecutor) -> SchemaResult<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_module_timeout_halts() {
        let exec = MemoryExecutor::new();
        let reg = SchemaRegistry::builder()
            .register_sql(table("users", 0))
            .register(Stalls)
            .register_sql(table("after", 2))
            .build()
            .unwrap();
        let orch = SchemaOrchestrator::new(
            OrchestratorConfig::new().module_timeout(Duration::from_millis(250)),
        );

        let result = orch.apply(&exec, &reg).await;

        assert_eq!(result.applied_modules, vec!["users"]);
        let err = result.error.expect("timeout error");
        assert!(err.is_timeout());
        assert_eq!(err.failed_module(), Some("stalls"));
        assert!(!exec.relations().contains(&"after".to_string()));
    }
}
