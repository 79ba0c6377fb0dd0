//! Tenant identity and lifecycle state.

use std::fmt;

use serde::Serialize;

/// An opaque external tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a new tenant ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Lifecycle of a tenant database.
///
/// ```text
/// absent ──▶ provisioning ──▶ ready ◀─┐
///   ▲             │             └─────┘ repair
///   └─ rollback ──┘──▶ failed
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantState {
    /// No database exists.
    #[default]
    Absent,
    /// The database is being built.
    Provisioning,
    /// Every module applied and the checklist passed.
    Ready,
    /// The last attempt failed; the database was dropped.
    Failed,
}

impl TenantState {
    /// Whether application traffic may use the database.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// State name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TenantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tenant and its isolated database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantDatabase {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Normalized database name.
    pub database_name: String,
    /// Current lifecycle state.
    pub state: TenantState,
}

impl TenantDatabase {
    /// Create a tenant database record.
    pub fn new(tenant_id: TenantId, database_name: impl Into<String>, state: TenantState) -> Self {
        Self {
            tenant_id,
            database_name: database_name.into(),
            state,
        }
    }
}
