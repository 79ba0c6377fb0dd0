//! The connection seam that schema modules run against.

use async_trait::async_trait;

use crate::error::SchemaResult;

/// A live connection to one tenant database, as seen by schema modules.
///
/// Implementations must not reorder or pipeline calls: modules rely on each
/// `execute_batch` having completed before the next one starts.
#[async_trait]
pub trait SchemaExecutor: Send + Sync {
    /// Execute one or more DDL statements.
    async fn execute_batch(&self, sql: &str) -> SchemaResult<()>;

    /// Return the subset of `relations` that exist in the catalog.
    ///
    /// Names may be schema-qualified (`billing.invoices`); unqualified names
    /// resolve through the connection's search path.
    async fn existing_relations(&self, relations: &[String]) -> SchemaResult<Vec<String>>;

    /// Number of user relations (outside the system schemas).
    async fn user_relation_count(&self) -> SchemaResult<u64>;
}

#[async_trait]
impl<T> SchemaExecutor for &T
where
    T: SchemaExecutor + ?Sized,
{
    async fn execute_batch(&self, sql: &str) -> SchemaResult<()> {
        (**self).execute_batch(sql).await
    }

    async fn existing_relations(&self, relations: &[String]) -> SchemaResult<Vec<String>> {
        (**self).existing_relations(relations).await
    }

    async fn user_relation_count(&self) -> SchemaResult<u64> {
        (**self).user_relation_count().await
    }
}

/// Return the entries of `expected` that are not in `present`, in order.
pub fn missing_from(expected: &[String], present: &[String]) -> Vec<String> {
    expected
        .iter()
        .filter(|name| !present.iter().any(|p| p == *name))
        .cloned()
        .collect()
}
