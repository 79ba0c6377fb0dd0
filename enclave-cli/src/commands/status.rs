//! `enclave status` command - Show tenant databases and their state.

use std::path::Path;

use enclave_tenant::{DatabaseAdmin, PoolManagerStats, ProvisionMarker, TenantId, TenantState};
use serde::Serialize;

use crate::cli::StatusArgs;
use crate::config::Config;
use crate::error::CliResult;
use crate::output::{self, field, state_badge};
use crate::services::Services;

/// One tenant database as seen by `status`.
#[derive(Debug, Serialize)]
pub struct DatabaseStatus {
    /// Database name.
    pub database: String,
    /// Owning tenant, if the database carries a marker.
    pub tenant: Option<TenantId>,
    /// Provisioning state from the marker.
    pub state: Option<TenantState>,
}

impl DatabaseStatus {
    /// Classify `database` from its marker.
    pub fn from_marker(database: String, marker: Option<&str>) -> Self {
        let marker = marker.and_then(ProvisionMarker::parse);
        Self {
            database,
            tenant: marker.as_ref().map(|m| m.tenant().clone()),
            state: marker.as_ref().map(ProvisionMarker::state),
        }
    }
}

/// Output of `status --json`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Tenant databases on the server.
    pub databases: Vec<DatabaseStatus>,
    /// Pools held by this process.
    pub pools: PoolManagerStats,
}

/// Run the status command
pub async fn run(args: StatusArgs, config: Config, cwd: &Path) -> CliResult<()> {
    let prefix = config.provision.prefix.clone();
    let services = Services::connect(config, cwd).await?;

    let mut databases = Vec::new();
    for name in services.admin.list_databases(&prefix).await? {
        let marker = services.admin.database_marker(&name).await?;
        databases.push(DatabaseStatus::from_marker(name, marker.as_deref()));
    }
    let report = StatusReport {
        databases,
        pools: services.pools.stats(),
    };
    services.shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    output::title("Tenant Status");
    field("Prefix", &prefix);
    field("Databases", report.databases.len());
    field(
        "Pools",
        format!("{}/{}", report.pools.entries, report.pools.max_pools),
    );
    output::blank();

    for db in &report.databases {
        let state = state_badge(db.state);
        let tenant = db
            .tenant
            .as_ref()
            .map(|t| format!(" ({})", t))
            .unwrap_or_default();
        output::bullet(&format!("{}{} {}", db.database, tenant, state));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_marker() {
        let ready = DatabaseStatus::from_marker("agency_acme".into(), Some("enclave:ready:acme"));
        assert_eq!(ready.state, Some(TenantState::Ready));
        assert_eq!(ready.tenant, Some(TenantId::new("acme")));

        let foreign = DatabaseStatus::from_marker("agency_legacy".into(), Some("hand made"));
        assert_eq!(foreign.state, None);
        assert_eq!(foreign.tenant, None);

        let json = serde_json::to_value(&ready).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["tenant"], "acme");
    }
}
