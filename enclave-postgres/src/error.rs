//! Error types for PostgreSQL operations.

use enclave_schema::{SchemaError, SqlStateError};
use enclave_tenant::TenantError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Timeout error.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Pool(deadpool_postgres::PoolError::Backend(e)) => e.code().is_none(),
            Self::Pool(_) => true,
            Self::Postgres(e) => e.is_closed() || e.code().is_none(),
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Pool(deadpool_postgres::PoolError::Timeout(_))
        )
    }

    /// The server's message without the driver's "db error:" wrapping.
    fn server_message(&self) -> String {
        let db = match self {
            Self::Postgres(e) => e.as_db_error(),
            Self::Pool(deadpool_postgres::PoolError::Backend(e)) => e.as_db_error(),
            _ => None,
        };
        db.map(|db| db.message().to_string())
            .unwrap_or_else(|| self.to_string())
    }
}

impl SqlStateError for PgError {
    fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Postgres(e) => e.code().map(|c| c.code()),
            Self::Pool(deadpool_postgres::PoolError::Backend(e)) => e.code().map(|c| c.code()),
            _ => None,
        }
    }
}

impl From<PgError> for SchemaError {
    fn from(err: PgError) -> Self {
        match err.sql_state().map(str::to_string) {
            Some(code) => SchemaError::with_state(err.server_message(), code),
            None => SchemaError::database(err.to_string()),
        }
    }
}

impl From<PgError> for TenantError {
    fn from(err: PgError) -> Self {
        if let Some(code) = err.sql_state().map(str::to_string) {
            return TenantError::with_state(err.server_message(), code);
        }
        match err {
            PgError::Config(msg) => TenantError::Config(msg),
            PgError::Connection(msg) => TenantError::Connection(msg),
            PgError::Timeout(ms) => TenantError::Timeout {
                operation: "postgres".to_string(),
                timeout_ms: ms,
            },
            other if other.is_connection_error() => TenantError::Connection(other.to_string()),
            other => TenantError::database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PgError::config("invalid URL");
        assert!(matches!(err, PgError::Config(_)));

        let err = PgError::connection("connection refused");
        assert!(err.is_connection_error());

        let err = PgError::Timeout(5000);
        assert!(err.is_timeout());
        assert_eq!(err.sql_state(), None);
    }

    #[test]
    fn test_into_tenant_error() {
        let err: TenantError = PgError::Timeout(1000).into();
        assert!(err.is_timeout());

        let err: TenantError = PgError::connection("refused").into();
        assert!(matches!(err, TenantError::Connection(_)));

        let err: TenantError = PgError::config("bad").into();
        assert!(matches!(err, TenantError::Config(_)));
    }

    #[test]
    fn test_into_schema_error_without_state() {
        let err: SchemaError = PgError::connection("refused").into();
        assert_eq!(err.sql_state(), None);
        assert!(!err.is_missing_relation());
    }
}
