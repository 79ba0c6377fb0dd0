//! `enclave migrate-all` command - Re-apply modules to every tenant database.

use std::path::Path;

use enclave_tenant::DatabaseAdmin;

use crate::cli::MigrateAllArgs;
use crate::config::Config;
use crate::error::{CliError, CliResult};
use crate::output::{self, Tone, field, note, repair_outcome};
use crate::services::Services;

/// Run the migrate-all command
pub async fn run(args: MigrateAllArgs, config: Config, cwd: &Path) -> CliResult<()> {
    output::title("Migrate All Tenants");

    let prefix = args
        .prefix
        .unwrap_or_else(|| config.provision.prefix.clone());
    let services = Services::connect(config, cwd).await?;
    let repair = services.repair_service()?;

    let databases = services.admin.list_databases(&prefix).await?;
    field("Prefix", &prefix);
    field("Databases", databases.len());
    field("Modules", services.registry.len());
    output::blank();

    if databases.is_empty() {
        services.shutdown();
        note(Tone::Quiet, "No tenant databases found.");
        return Ok(());
    }

    let reports = repair.repair_all(&databases).await;
    services.shutdown();

    let total = reports.len();
    let mut failed = 0;
    for (index, report) in reports.iter().enumerate() {
        let (outcome, is_failure) = repair_outcome(report);
        if is_failure {
            failed += 1;
        }
        output::progress(index + 1, total, &format!("{} {}", report.database, outcome));
    }

    output::blank();
    if failed > 0 {
        return Err(CliError::Repair(format!(
            "{} of {} tenant databases failed",
            failed, total
        )));
    }
    note(Tone::Good, &format!("{} tenant databases up to date", total));
    Ok(())
}
