//! CLI error types and result alias.

use enclave_postgres::PgError;
use enclave_schema::SchemaError;
use enclave_tenant::TenantError;
use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(enclave::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(enclave::config))]
    Config(String),

    /// Schema module error
    #[error("Schema error: {0}")]
    #[diagnostic(code(enclave::schema))]
    Schema(String),

    /// Provisioning error
    #[error("Provisioning error: {0}")]
    #[diagnostic(code(enclave::provision))]
    Provision(String),

    /// Pool error
    #[error("Pool error: {0}")]
    #[diagnostic(code(enclave::pool))]
    Pool(String),

    /// Repair error
    #[error("Repair error: {0}")]
    #[diagnostic(code(enclave::repair))]
    Repair(String),

    /// Database error
    #[error("Database error: {0}")]
    #[diagnostic(code(enclave::database))]
    Database(String),

    /// Command error
    #[error("Command error: {0}")]
    #[diagnostic(code(enclave::command))]
    Command(String),
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Command(format!("Failed to serialize JSON: {}", err))
    }
}

impl From<SchemaError> for CliError {
    fn from(err: SchemaError) -> Self {
        CliError::Schema(err.to_string())
    }
}

impl From<PgError> for CliError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Config(msg) => CliError::Config(msg),
            other => CliError::Database(other.to_string()),
        }
    }
}

impl From<TenantError> for CliError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::Config(msg) => CliError::Config(msg),
            TenantError::Schema(e) => CliError::Schema(e.to_string()),
            e @ TenantError::PoolExhausted { .. } => CliError::Pool(e.to_string()),
            e @ (TenantError::Provision { .. }
            | TenantError::NameConflict { .. }
            | TenantError::InvalidName { .. }
            | TenantError::NotOwned { .. }) => CliError::Provision(e.to_string()),
            other => CliError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_error_mapping() {
        let err: CliError = TenantError::NameConflict {
            database: "agency_acme".into(),
        }
        .into();
        assert!(matches!(err, CliError::Provision(_)));

        let err: CliError = TenantError::config("max_pools must be at least 1").into();
        assert!(matches!(err, CliError::Config(_)));

        let err: CliError = TenantError::PoolExhausted {
            database: "agency_acme".into(),
            waited_ms: 5000,
        }
        .into();
        assert!(matches!(err, CliError::Pool(_)));
    }
}
