//! Error types for tenant provisioning, pooling and repair.

use std::time::Duration;

use enclave_schema::{SchemaError, SqlStateError};
use thiserror::Error;

/// Result type for tenant operations.
pub type TenantResult<T> = Result<T, TenantError>;

/// Errors that can occur while provisioning, pooling or repairing tenant databases.
#[derive(Error, Debug)]
pub enum TenantError {
    /// The database name belongs to an existing, healthy tenant database.
    #[error("database '{database}' already exists")]
    NameConflict {
        /// The conflicting database name.
        database: String,
    },

    /// The requested name cannot be turned into a safe identifier.
    #[error("invalid database name '{name}': {reason}")]
    InvalidName {
        /// The name as requested.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Provisioning failed; the database has been rolled back.
    #[error("provisioning '{database}' failed: {source}")]
    Provision {
        /// The database that was rolled back.
        database: String,
        /// What went wrong.
        #[source]
        source: Box<TenantError>,
    },

    /// No connection became available within the acquire timeout.
    #[error("connection pool for '{database}' exhausted after {waited_ms}ms")]
    PoolExhausted {
        /// The tenant database.
        database: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// Applying schema modules failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Critical relations were absent after a complete module run.
    #[error("critical relations missing in '{database}': {}", relations.join(", "))]
    MissingRelations {
        /// The tenant database.
        database: String,
        /// Relations that were not found.
        relations: Vec<String>,
    },

    /// A freshly created database already contained user relations.
    #[error("database '{database}' is not empty ({relations} user relations)")]
    CatalogNotEmpty {
        /// The tenant database.
        database: String,
        /// Number of relations found.
        relations: u64,
    },

    /// The caller does not own this tenant database.
    #[error("database '{database}' is not owned by tenant '{tenant}'")]
    NotOwned {
        /// The tenant database.
        database: String,
        /// The tenant that asked.
        tenant: String,
    },

    /// Could not connect.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected an administrative statement.
    #[error("database error: {message}")]
    Database {
        /// Server or driver message.
        message: String,
        /// SQLSTATE, if the server supplied one.
        sql_state: Option<String>,
    },

    /// An operation exceeded its time budget.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// What was running.
        operation: String,
        /// The budget that elapsed.
        timeout_ms: u64,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TenantError {
    /// Create an invalid name error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a database error without a SQLSTATE.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state: None,
        }
    }

    /// Create a database error carrying a SQLSTATE.
    pub fn with_state(message: impl Into<String>, sql_state: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state: Some(sql_state.into()),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: limit.as_millis() as u64,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap this error as a rolled-back provisioning failure.
    pub fn provision(database: impl Into<String>, source: TenantError) -> Self {
        Self::Provision {
            database: database.into(),
            source: Box::new(source),
        }
    }

    /// Check if this is a name conflict.
    pub fn is_name_conflict(&self) -> bool {
        matches!(self, Self::NameConflict { .. })
    }

    /// Check if this is a rolled-back provisioning failure.
    pub fn is_provision_error(&self) -> bool {
        matches!(self, Self::Provision { .. })
    }

    /// Check if the pool had no free connection in time.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Check if this is, or wraps, a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Schema(e) => e.is_timeout(),
            Self::Provision { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Whether retrying the whole operation from scratch is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provision { .. } | Self::PoolExhausted { .. } | Self::Connection(_) | Self::Timeout { .. }
        )
    }
}

impl SqlStateError for TenantError {
    fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            Self::Schema(e) => e.sql_state(),
            Self::Provision { source, .. } => source.sql_state(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TenantError::invalid_name("pg_x", "reserved prefix");
        assert!(matches!(err, TenantError::InvalidName { .. }));
        assert!(err.to_string().contains("reserved prefix"));

        let err = TenantError::timeout("provisioning", Duration::from_secs(2));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("2000ms"));
    }

    #[test]
    fn test_provision_wraps_source() {
        let err = TenantError::provision(
            "agency_acme2",
            TenantError::Schema(SchemaError::with_state("boom", "P0001").in_module("crm")),
        );
        assert!(err.is_provision_error());
        assert!(err.is_retryable());
        assert_eq!(err.sql_state(), Some("P0001"));
        assert!(err.to_string().contains("agency_acme2"));
    }

    #[test]
    fn test_missing_relation_classification() {
        assert!(TenantError::with_state("no such table", "42P01").is_missing_relation());
        assert!(!TenantError::database("relation \"x\" does not exist").is_missing_relation());
        assert!(!TenantError::NameConflict { database: "a".into() }.is_missing_relation());
    }

    #[test]
    fn test_missing_relations_display() {
        let err = TenantError::MissingRelations {
            database: "agency_acme".into(),
            relations: vec!["users".into(), "tenants".into()],
        };
        assert_eq!(
            err.to_string(),
            "critical relations missing in 'agency_acme': users, tenants"
        );
    }
}
