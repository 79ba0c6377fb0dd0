//! Turning requested tenant names into safe database identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::TenantId;
use crate::error::{TenantError, TenantResult};

/// PostgreSQL's identifier limit (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Names owned by the server itself.
const SYSTEM_DATABASES: &[&str] = &["postgres", "template0", "template1"];

/// SQL keywords that cannot be used as bare identifiers.
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both",
    "case", "cast", "check", "collate", "column", "constraint", "create", "current_catalog",
    "current_date", "current_role", "current_time", "current_timestamp", "current_user",
    "default", "deferrable", "desc", "distinct", "do", "else", "end", "except", "false",
    "fetch", "for", "foreign", "from", "grant", "group", "having", "in", "initially",
    "intersect", "into", "lateral", "leading", "limit", "localtime", "localtimestamp", "not",
    "null", "offset", "on", "only", "or", "order", "placing", "primary", "references",
    "returning", "select", "session_user", "some", "symmetric", "table", "then", "to",
    "trailing", "true", "union", "unique", "user", "using", "variadic", "when", "where",
    "window", "with",
];

/// How requested names become database names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingPolicy {
    /// Prefix every tenant database carries.
    pub prefix: String,
    /// Append a suffix derived from the tenant ID.
    pub append_tenant_suffix: bool,
    /// Hex characters of the tenant hash to use as suffix.
    pub suffix_len: usize,
    /// Maximum identifier length.
    pub max_length: usize,
    /// Extra names to refuse, compared after normalization.
    pub reserved_names: Vec<String>,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            prefix: "agency_".to_string(),
            append_tenant_suffix: true,
            suffix_len: 8,
            max_length: MAX_IDENTIFIER_LENGTH,
            reserved_names: Vec::new(),
        }
    }
}

impl NamingPolicy {
    /// Create the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Enable or disable the tenant suffix.
    pub fn append_tenant_suffix(mut self, enabled: bool) -> Self {
        self.append_tenant_suffix = enabled;
        self
    }

    /// Set the suffix length in hex characters.
    pub fn suffix_len(mut self, len: usize) -> Self {
        self.suffix_len = len;
        self
    }

    /// Set the maximum identifier length.
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = len;
        self
    }

    /// Refuse an additional name.
    pub fn reserve(mut self, name: impl Into<String>) -> Self {
        self.reserved_names.push(name.into());
        self
    }

    /// Normalize `requested` into a database name for `tenant`.
    ///
    /// Lowercases, maps every character outside `[a-z0-9_]` to `_`, adds the
    /// prefix if missing and, when enabled, appends `_<hash>` where `<hash>`
    /// is the leading hex of SHA-256(tenant ID). The result is deterministic,
    /// so a retried signup lands on the same name.
    pub fn normalize(&self, tenant: &TenantId, requested: &str) -> TenantResult<String> {
        let cleaned = sanitize(requested);
        if cleaned.is_empty() {
            return Err(TenantError::invalid_name(requested, "name is empty after normalization"));
        }

        let mut base = if cleaned.starts_with(&self.prefix) {
            cleaned
        } else {
            format!("{}{}", self.prefix, cleaned)
        };

        if base.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(TenantError::invalid_name(requested, "name must start with a letter or underscore"));
        }
        self.check_reserved(requested, &base)?;

        if !self.append_tenant_suffix {
            if base.len() > self.max_length {
                return Err(TenantError::invalid_name(
                    requested,
                    format!("name exceeds {} characters", self.max_length),
                ));
            }
            return Ok(base);
        }

        let suffix = tenant_suffix(tenant, self.suffix_len);
        let room = self
            .max_length
            .checked_sub(suffix.len() + 1)
            .filter(|room| *room > 0)
            .ok_or_else(|| TenantError::config("max_length leaves no room for the tenant suffix"))?;
        if base.len() > room {
            base.truncate(room);
            while base.ends_with('_') {
                base.pop();
            }
        }
        Ok(format!("{base}_{suffix}"))
    }

    fn check_reserved(&self, requested: &str, name: &str) -> TenantResult<()> {
        if name.starts_with("pg_") {
            return Err(TenantError::invalid_name(requested, "the pg_ prefix is reserved"));
        }
        if SYSTEM_DATABASES.contains(&name) {
            return Err(TenantError::invalid_name(requested, "name is a system database"));
        }
        if RESERVED_WORDS.contains(&name) {
            return Err(TenantError::invalid_name(requested, "name is a reserved SQL keyword"));
        }
        if self.reserved_names.iter().any(|r| r.eq_ignore_ascii_case(name)) {
            return Err(TenantError::invalid_name(requested, "name is reserved"));
        }
        Ok(())
    }
}

/// Leading `len` hex characters of SHA-256(tenant ID).
pub fn tenant_suffix(tenant: &TenantId, len: usize) -> String {
    let digest = hex::encode(Sha256::digest(tenant.as_str().as_bytes()));
    digest[..len.min(digest.len())].to_string()
}

fn sanitize(requested: &str) -> String {
    let mut out = String::with_capacity(requested.len());
    for c in requested.trim().chars() {
        let c = c.to_ascii_lowercase();
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '_' };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> NamingPolicy {
        NamingPolicy::new().append_tenant_suffix(false)
    }

    #[test]
    fn test_prefix_added_once() {
        let tenant = TenantId::new("acme");
        assert_eq!(plain().normalize(&tenant, "acme").unwrap(), "agency_acme");
        assert_eq!(plain().normalize(&tenant, "agency_acme").unwrap(), "agency_acme");
    }

    #[test]
    fn test_charset_normalized() {
        let tenant = TenantId::new("acme");
        assert_eq!(
            plain().normalize(&tenant, "  Acme Corp. (EU)-West ").unwrap(),
            "agency_acme_corp_eu_west"
        );
        assert!(plain().normalize(&tenant, "---").is_err());
    }

    #[test]
    fn test_reserved_names_rejected() {
        let tenant = TenantId::new("acme");
        let policy = NamingPolicy::new().prefix("").append_tenant_suffix(false);

        for name in ["postgres", "template1", "pg_stat", "select", "user"] {
            let err = policy.normalize(&tenant, name).unwrap_err();
            assert!(matches!(err, TenantError::InvalidName { .. }), "{name} accepted");
        }
        assert!(policy.normalize(&tenant, "9lives").is_err());
        assert!(policy.clone().reserve("admin").normalize(&tenant, "Admin").is_err());
        assert_eq!(policy.normalize(&tenant, "acme").unwrap(), "acme");
    }

    #[test]
    fn test_suffix_is_deterministic_and_distinct() {
        let policy = NamingPolicy::new();
        let a = policy.normalize(&TenantId::new("t-1"), "acme").unwrap();
        let again = policy.normalize(&TenantId::new("t-1"), "acme").unwrap();
        let b = policy.normalize(&TenantId::new("t-2"), "acme").unwrap();

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert!(a.starts_with("agency_acme_"));
        assert_eq!(a.len(), "agency_acme_".len() + 8);
    }

    #[test]
    fn test_length_bounded() {
        let tenant = TenantId::new("acme");
        let long = "x".repeat(200);

        let name = NamingPolicy::new().normalize(&tenant, &long).unwrap();
        assert_eq!(name.len(), MAX_IDENTIFIER_LENGTH);
        assert!(name.ends_with(&tenant_suffix(&tenant, 8)));

        assert!(plain().normalize(&tenant, &long).is_err());
    }

    #[test]
    fn test_tenant_suffix() {
        let suffix = tenant_suffix(&TenantId::new("acme"), 8);
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
