//! An in-memory [`SchemaExecutor`] for tests.
//!
//! Understands just enough DDL to track `CREATE TABLE` and `DROP TABLE`, so
//! orchestration can be exercised without a server. Enabled by the
//! `testing` feature.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{SchemaError, SchemaResult, sqlstate};
use crate::executor::SchemaExecutor;

/// SQLSTATE returned for injected failures (`raise_exception`).
pub const INJECTED_FAILURE: &str = "P0001";

#[derive(Default)]
struct State {
    relations: Vec<String>,
    journal: Vec<String>,
    fail_on: Vec<String>,
}

/// A fake catalog with a statement journal and failure injection.
#[derive(Default)]
pub struct MemoryExecutor {
    state: Mutex<State>,
}

impl MemoryExecutor {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any statement containing `needle`.
    pub fn fail_on(&self, needle: &str) {
        self.state.lock().fail_on.push(needle.to_string());
    }

    /// Stop failing statements.
    pub fn clear_failures(&self) {
        self.state.lock().fail_on.clear();
    }

    /// Add a relation without running DDL.
    pub fn seed(&self, relation: &str) {
        let mut state = self.state.lock();
        let name = relation.to_lowercase();
        if !state.relations.contains(&name) {
            state.relations.push(name);
        }
    }

    /// Remove a relation without running DDL.
    pub fn remove(&self, relation: &str) {
        let name = relation.to_lowercase();
        self.state.lock().relations.retain(|r| *r != name);
    }

    /// Whether `relation` exists.
    pub fn has_relation(&self, relation: &str) -> bool {
        self.state.lock().relations.contains(&relation.to_lowercase())
    }

    /// Relations in creation order.
    pub fn relations(&self) -> Vec<String> {
        self.state.lock().relations.clone()
    }

    /// Every statement received, including failed ones.
    pub fn journal(&self) -> Vec<String> {
        self.state.lock().journal.clone()
    }
}

fn table_name(rest: &str) -> String {
    rest.trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .trim_matches('"')
        .to_lowercase()
}

#[async_trait]
impl SchemaExecutor for MemoryExecutor {
    async fn execute_batch(&self, sql: &str) -> SchemaResult<()> {
        let mut state = self.state.lock();
        state.journal.push(sql.to_string());

        if state.fail_on.iter().any(|needle| sql.contains(needle.as_str())) {
            return Err(SchemaError::with_state("injected failure", INJECTED_FAILURE));
        }

        let upper = sql.trim().to_uppercase();
        if let Some(rest) = upper.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let name = table_name(rest);
            if !state.relations.contains(&name) {
                state.relations.push(name);
            }
        } else if let Some(rest) = upper.strip_prefix("CREATE TABLE ") {
            let name = table_name(rest);
            if state.relations.contains(&name) {
                return Err(SchemaError::with_state(
                    format!("relation \"{name}\" already exists"),
                    sqlstate::DUPLICATE_TABLE,
                ));
            }
            state.relations.push(name);
        } else if let Some(rest) = upper.strip_prefix("DROP TABLE IF EXISTS ") {
            let name = table_name(rest);
            state.relations.retain(|r| *r != name);
        }
        Ok(())
    }

    async fn existing_relations(&self, relations: &[String]) -> SchemaResult<Vec<String>> {
        let state = self.state.lock();
        Ok(relations
            .iter()
            .filter(|r| state.relations.contains(&r.to_lowercase()))
            .cloned()
            .collect())
    }

    async fn user_relation_count(&self) -> SchemaResult<u64> {
        Ok(self.state.lock().relations.len() as u64)
    }
}
