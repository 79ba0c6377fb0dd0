//! PostgreSQL connection wrapper.

use async_trait::async_trait;
use deadpool_postgres::Object;
use enclave_schema::{SchemaExecutor, SchemaResult};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use tracing::debug;

use crate::error::PgResult;

const EXISTING_RELATIONS_SQL: &str = "\
SELECT r.name FROM unnest($1::text[]) WITH ORDINALITY AS r(name, ord) \
WHERE to_regclass(r.name) IS NOT NULL ORDER BY r.ord";

const USER_RELATION_COUNT_SQL: &str = "\
SELECT count(*) FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
WHERE n.nspname NOT IN ('pg_catalog', 'information_schema') \
AND n.nspname NOT LIKE 'pg_toast%' AND n.nspname NOT LIKE 'pg_temp%' \
AND c.relkind IN ('r', 'p', 'v', 'm', 'S', 'f')";

/// A pooled connection to one tenant database.
///
/// Returned to its pool on drop.
pub struct PgConnection {
    client: Object,
}

impl PgConnection {
    pub(crate) fn new(client: Object) -> Self {
        Self { client }
    }

    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<Vec<Row>> {
        debug!(sql = %sql, "Executing query");
        Ok(self.client.query(sql, params).await?)
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<Row> {
        debug!(sql = %sql, "Executing query_one");
        Ok(self.client.query_one(sql, params).await?)
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> PgResult<Option<Row>> {
        debug!(sql = %sql, "Executing query_opt");
        Ok(self.client.query_opt(sql, params).await?)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<u64> {
        debug!(sql = %sql, "Executing statement");
        Ok(self.client.execute(sql, params).await?)
    }

    /// Execute one or more statements with the simple query protocol.
    pub async fn batch_execute(&self, sql: &str) -> PgResult<()> {
        debug!(sql = %sql, "Executing batch");
        Ok(self.client.batch_execute(sql).await?)
    }
}

#[async_trait]
impl SchemaExecutor for PgConnection {
    async fn execute_batch(&self, sql: &str) -> SchemaResult<()> {
        Ok(self.batch_execute(sql).await?)
    }

    async fn existing_relations(&self, relations: &[String]) -> SchemaResult<Vec<String>> {
        if relations.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.query(EXISTING_RELATIONS_SQL, &[&relations]).await?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    async fn user_relation_count(&self) -> SchemaResult<u64> {
        let row = self.query_one(USER_RELATION_COUNT_SQL, &[]).await?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection").finish_non_exhaustive()
    }
}
