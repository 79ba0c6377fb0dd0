//! The static, rank-ordered set of schema modules.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{SchemaError, SchemaResult};
use crate::module::{LintWarning, SchemaModule, SqlModule, validate_name};

/// An immutable, rank-ordered list of schema modules.
///
/// Built once at process start and shared as `Arc<SchemaRegistry>`. Rank
/// ties keep registration order so every run is reproducible.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    modules: Vec<Arc<dyn SchemaModule>>,
    warnings: Vec<LintWarning>,
}

impl SchemaRegistry {
    /// Create a registry builder.
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Modules in application order.
    pub fn modules(&self) -> &[Arc<dyn SchemaModule>] {
        &self.modules
    }

    /// Look up a module by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn SchemaModule>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    /// Module names in application order.
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Idempotency warnings collected from SQL modules at build time.
    pub fn warnings(&self) -> &[LintWarning] {
        &self.warnings
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no modules are registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Builder for [`SchemaRegistry`].
#[derive(Default)]
pub struct SchemaRegistryBuilder {
    modules: Vec<Arc<dyn SchemaModule>>,
    warnings: Vec<LintWarning>,
}

impl SchemaRegistryBuilder {
    /// Register a module.
    pub fn register<M>(mut self, module: M) -> Self
    where
        M: SchemaModule + 'static,
    {
        self.modules.push(Arc::new(module));
        self
    }

    /// Register a SQL module, keeping its lint warnings.
    pub fn register_sql(mut self, module: SqlModule) -> Self {
        self.warnings.extend(module.lint());
        self.modules.push(Arc::new(module));
        self
    }

    /// Register an already-shared module.
    pub fn register_arc(mut self, module: Arc<dyn SchemaModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Register several SQL modules.
    pub fn extend_sql<I>(self, modules: I) -> Self
    where
        I: IntoIterator<Item = SqlModule>,
    {
        modules.into_iter().fold(self, |b, m| b.register_sql(m))
    }

    /// Validate names and produce the ordered registry.
    pub fn build(self) -> SchemaResult<SchemaRegistry> {
        let mut seen = HashSet::with_capacity(self.modules.len());
        for module in &self.modules {
            validate_name(module.name())?;
            if !seen.insert(module.name().to_string()) {
                return Err(SchemaError::DuplicateModule(module.name().to_string()));
            }
        }

        let mut modules = self.modules;
        // `sort_by_key` is stable: equal ranks keep registration order.
        modules.sort_by_key(|m| m.rank());

        for warning in &self.warnings {
            warn!(module = %warning.module, statement = warning.statement, "{}", warning.message);
        }
        debug!(modules = modules.len(), "Schema registry built");

        Ok(SchemaRegistry {
            modules,
            warnings: self.warnings,
        })
    }
}
