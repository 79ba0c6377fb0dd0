//! Server-level administration for tenant databases.
//!
//! `CREATE DATABASE` and `DROP DATABASE` cannot run inside a transaction and
//! cannot take bind parameters, so names are validated and quoted here and
//! every statement goes through the simple query protocol.

use async_trait::async_trait;
use enclave_tenant::{DatabaseAdmin, TenantError, TenantResult};
use tracing::{debug, info};

use crate::config::PgConfig;
use crate::connection::PgConnection;
use crate::error::PgResult;
use crate::pool::{PgPool, PoolConfig};

/// Quote an identifier for use in DDL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for use in DDL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Administrative operations run against the maintenance database.
#[derive(Debug, Clone)]
pub struct PgAdmin {
    pool: PgPool,
}

impl PgAdmin {
    /// Connect lazily to the maintenance database described by `config`.
    pub fn new(config: PgConfig) -> PgResult<Self> {
        let pool = PgPool::new(
            config,
            PoolConfig {
                max_connections: 2,
                ..PoolConfig::default()
            },
        )?;
        Ok(Self { pool })
    }

    /// The maintenance database pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the maintenance pool.
    pub fn close(&self) {
        enclave_tenant::TenantPool::close(&self.pool);
    }

    async fn conn(&self) -> TenantResult<PgConnection> {
        Ok(self.pool.get().await?)
    }

    fn check_name(name: &str) -> TenantResult<()> {
        if name.is_empty() || name.len() > enclave_tenant::MAX_IDENTIFIER_LENGTH {
            return Err(TenantError::invalid_name(name, "not a valid identifier length"));
        }
        if name.contains('\0') {
            return Err(TenantError::invalid_name(name, "contains a NUL byte"));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdmin for PgAdmin {
    async fn database_exists(&self, name: &str) -> TenantResult<bool> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&name])
            .await?;
        Ok(row.is_some())
    }

    async fn database_marker(&self, name: &str) -> TenantResult<Option<String>> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT shobj_description(oid, 'pg_database') FROM pg_database WHERE datname = $1",
                &[&name],
            )
            .await?;
        Ok(row.and_then(|row| row.get::<_, Option<String>>(0)))
    }

    async fn create_database(&self, name: &str, marker: &str) -> TenantResult<()> {
        Self::check_name(name)?;
        let conn = self.conn().await?;
        conn.batch_execute(&format!(
            "CREATE DATABASE {} WITH TEMPLATE template0 ENCODING 'UTF8'",
            quote_identifier(name)
        ))
        .await?;
        conn.batch_execute(&format!(
            "COMMENT ON DATABASE {} IS {}",
            quote_identifier(name),
            quote_literal(marker)
        ))
        .await?;
        info!(database = %name, "Database created");
        Ok(())
    }

    async fn set_marker(&self, name: &str, marker: &str) -> TenantResult<()> {
        Self::check_name(name)?;
        let conn = self.conn().await?;
        conn.batch_execute(&format!(
            "COMMENT ON DATABASE {} IS {}",
            quote_identifier(name),
            quote_literal(marker)
        ))
        .await?;
        debug!(database = %name, marker = %marker, "Database marker updated");
        Ok(())
    }

    async fn terminate_connections(&self, name: &str) -> TenantResult<u64> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "SELECT count(pg_terminate_backend(pid)) FROM pg_stat_activity \
                 WHERE datname = $1 AND pid <> pg_backend_pid()",
                &[&name],
            )
            .await?;
        let terminated: i64 = row.get(0);
        debug!(database = %name, terminated, "Terminated connections");
        Ok(terminated.max(0) as u64)
    }

    async fn drop_database(&self, name: &str) -> TenantResult<()> {
        Self::check_name(name)?;
        let conn = self.conn().await?;
        conn.batch_execute(&format!("DROP DATABASE IF EXISTS {}", quote_identifier(name)))
            .await?;
        info!(database = %name, "Database dropped");
        Ok(())
    }

    async fn list_databases(&self, prefix: &str) -> TenantResult<Vec<String>> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT datname FROM pg_database \
                 WHERE NOT datistemplate AND left(datname, length($1)) = $1 \
                 ORDER BY datname",
                &[&prefix],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("agency_acme"), "\"agency_acme\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(
            quote_literal("enclave:ready:acme"),
            "'enclave:ready:acme'"
        );
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn test_check_name() {
        assert!(PgAdmin::check_name("agency_acme").is_ok());
        assert!(PgAdmin::check_name("").is_err());
        assert!(PgAdmin::check_name(&"a".repeat(64)).is_err());
        assert!(PgAdmin::check_name("a\0b").is_err());
    }
}
