//! Schema modules: named, ranked, idempotent units of DDL.

use std::fmt;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::{SchemaError, SchemaResult};
use crate::executor::SchemaExecutor;

/// A named unit of DDL with a dependency rank.
///
/// `apply` must be idempotent: running it against a database that already
/// has its effects is a no-op. Lower ranks are fully applied before any
/// higher rank starts.
#[async_trait]
pub trait SchemaModule: Send + Sync {
    /// Unique module name.
    fn name(&self) -> &str;

    /// Dependency rank; lower applies first.
    fn rank(&self) -> i32;

    /// Relations this module expects to exist before it runs.
    fn required_after(&self) -> &[String] {
        &[]
    }

    /// Apply this module's DDL.
    async fn apply(&self, conn: &dyn SchemaExecutor) -> SchemaResult<()>;
}

impl fmt::Debug for dyn SchemaModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaModule")
            .field("name", &self.name())
            .field("rank", &self.rank())
            .finish()
    }
}

/// A statement that may not survive a second run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintWarning {
    /// Module the statement belongs to.
    pub module: String,
    /// Zero-based statement index within the module.
    pub statement: usize,
    /// What looks wrong.
    pub message: String,
}

impl fmt::Display for LintWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (statement {}): {}",
            self.module,
            self.statement + 1,
            self.message
        )
    }
}

/// A schema module made of plain SQL statements, run one at a time.
#[derive(Debug, Clone)]
pub struct SqlModule {
    name: String,
    rank: i32,
    statements: Vec<String>,
    required_after: Vec<String>,
}

impl SqlModule {
    /// Create an empty module.
    pub fn new(name: impl Into<String>, rank: i32) -> Self {
        Self {
            name: name.into(),
            rank,
            statements: Vec::new(),
            required_after: Vec::new(),
        }
    }

    /// Append a statement.
    pub fn statement(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(sql.into());
        self
    }

    /// Append several statements.
    pub fn statements<I, S>(mut self, sql: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.statements.extend(sql.into_iter().map(Into::into));
        self
    }

    /// Declare a relation this module expects to exist already.
    pub fn requires(mut self, relation: impl Into<String>) -> Self {
        self.required_after.push(relation.into());
        self
    }

    /// The module's statements, in execution order.
    pub fn sql(&self) -> &[String] {
        &self.statements
    }

    /// SHA-256 over the module's statements, hex encoded.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for stmt in &self.statements {
            hasher.update(stmt.trim().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Flag statements that lack an idempotency guard.
    pub fn lint(&self) -> Vec<LintWarning> {
        self.statements
            .iter()
            .enumerate()
            .filter_map(|(i, stmt)| {
                unguarded(stmt).map(|message| LintWarning {
                    module: self.name.clone(),
                    statement: i,
                    message,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SchemaModule for SqlModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn rank(&self) -> i32 {
        self.rank
    }

    fn required_after(&self) -> &[String] {
        &self.required_after
    }

    async fn apply(&self, conn: &dyn SchemaExecutor) -> SchemaResult<()> {
        for (i, stmt) in self.statements.iter().enumerate() {
            trace!(module = %self.name, statement = i, "Executing module statement");
            conn.execute_batch(stmt).await?;
        }
        Ok(())
    }
}

/// Return a warning message if `stmt` would fail or duplicate on re-run.
fn unguarded(stmt: &str) -> Option<String> {
    let normalized = stmt.split_whitespace().collect::<Vec<_>>().join(" ");
    let upper = normalized.to_uppercase();

    // DO blocks carry their own existence checks.
    if upper.starts_with("DO ") || upper.contains("IF NOT EXISTS") || upper.contains("IF EXISTS") {
        return None;
    }
    if upper.starts_with("CREATE OR REPLACE") {
        return None;
    }

    let guarded_kinds = [
        ("CREATE TABLE", "use CREATE TABLE IF NOT EXISTS"),
        ("CREATE UNIQUE INDEX", "use CREATE UNIQUE INDEX IF NOT EXISTS"),
        ("CREATE INDEX", "use CREATE INDEX IF NOT EXISTS"),
        ("CREATE SCHEMA", "use CREATE SCHEMA IF NOT EXISTS"),
        ("CREATE SEQUENCE", "use CREATE SEQUENCE IF NOT EXISTS"),
        ("CREATE EXTENSION", "use CREATE EXTENSION IF NOT EXISTS"),
        ("CREATE VIEW", "use CREATE OR REPLACE VIEW"),
        ("CREATE FUNCTION", "use CREATE OR REPLACE FUNCTION"),
        ("CREATE TRIGGER", "drop the trigger IF EXISTS first or use CREATE OR REPLACE TRIGGER"),
        ("CREATE TYPE", "wrap CREATE TYPE in a DO block that checks pg_type"),
        ("ALTER TABLE", "use ADD COLUMN IF NOT EXISTS / DROP ... IF EXISTS"),
        ("DROP ", "use DROP ... IF EXISTS"),
        ("INSERT ", "use INSERT ... ON CONFLICT DO NOTHING"),
    ];

    for (prefix, advice) in guarded_kinds {
        if upper.starts_with(prefix) {
            if prefix == "INSERT " && upper.contains("ON CONFLICT") {
                return None;
            }
            if prefix == "CREATE TRIGGER" {
                return Some(advice.to_string());
            }
            return Some(format!("statement is not idempotent; {advice}"));
        }
    }
    None
}

/// Validate a module name: non-empty, no whitespace.
pub(crate) fn validate_name(name: &str) -> SchemaResult<()> {
    if name.trim().is_empty() {
        return Err(SchemaError::invalid_module("module name must not be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(SchemaError::invalid_module(format!(
            "module name '{name}' contains whitespace"
        )));
    }
    Ok(())
}
