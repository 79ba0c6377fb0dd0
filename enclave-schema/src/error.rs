//! Error types for schema module application.

use thiserror::Error;

/// Result type alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// SQLSTATE codes that mean "the object you referenced is not in the catalog".
pub mod sqlstate {
    /// `undefined_table`: relation does not exist.
    pub const UNDEFINED_TABLE: &str = "42P01";
    /// `undefined_column`: column does not exist.
    pub const UNDEFINED_COLUMN: &str = "42703";
    /// `undefined_function`: function does not exist.
    pub const UNDEFINED_FUNCTION: &str = "42883";
    /// `undefined_object`: type, trigger or other object does not exist.
    pub const UNDEFINED_OBJECT: &str = "42704";
    /// `duplicate_table`: relation already exists.
    pub const DUPLICATE_TABLE: &str = "42P07";
    /// `duplicate_database`: database already exists.
    pub const DUPLICATE_DATABASE: &str = "42P04";

    /// Codes that indicate schema drift a module re-run can fix.
    pub const MISSING_OBJECT: &[&str] = &[
        UNDEFINED_TABLE,
        UNDEFINED_COLUMN,
        UNDEFINED_FUNCTION,
        UNDEFINED_OBJECT,
    ];
}

/// Errors that carry a structured SQLSTATE.
///
/// Classification is done on the code, never on message text, so it holds
/// across server locales and versions.
pub trait SqlStateError {
    /// The five-character SQLSTATE, when the error came from the server.
    fn sql_state(&self) -> Option<&str>;

    /// Whether this error means a relation, column, function or type is missing.
    fn is_missing_relation(&self) -> bool {
        self.sql_state()
            .is_some_and(|code| sqlstate::MISSING_OBJECT.contains(&code))
    }
}

/// Errors that can occur while registering or applying schema modules.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The database rejected a statement.
    #[error("database error: {message}")]
    Database {
        /// Server or driver message.
        message: String,
        /// SQLSTATE, if the server supplied one.
        sql_state: Option<String>,
    },

    /// A module's DDL failed; orchestration halted at this module.
    #[error("schema module '{module}' failed: {source}")]
    Apply {
        /// Name of the failing module.
        module: String,
        /// Underlying failure.
        #[source]
        source: Box<SchemaError>,
    },

    /// A module did not finish within the configured timeout.
    #[error("schema module '{module}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Name of the module that timed out.
        module: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// Two modules were registered under the same name.
    #[error("duplicate schema module '{0}'")]
    DuplicateModule(String),

    /// A module definition is malformed.
    #[error("invalid schema module: {0}")]
    InvalidModule(String),

    /// Reading module files failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchemaError {
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

    /// Create an invalid module error.
    pub fn invalid_module(message: impl Into<String>) -> Self {
        Self::InvalidModule(message.into())
    }

    /// Wrap this error as the failure of `module`.
    pub fn in_module(self, module: impl Into<String>) -> Self {
        Self::Apply {
            module: module.into(),
            source: Box::new(self),
        }
    }

    /// Name of the module that failed, for apply and timeout errors.
    pub fn failed_module(&self) -> Option<&str> {
        match self {
            Self::Apply { module, .. } | Self::Timeout { module, .. } => Some(module),
            _ => None,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Apply { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl SqlStateError for SchemaError {
    fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            Self::Apply { source, .. } => source.sql_state(),
            _ => None,
        }
    }
}
