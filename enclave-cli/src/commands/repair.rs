//! `enclave repair` command - Re-apply modules to one tenant database.

use std::path::Path;

use crate::cli::RepairArgs;
use crate::config::Config;
use crate::error::{CliError, CliResult};
use crate::output::{self, Tone, field, note};
use crate::services::Services;

/// Run the repair command
pub async fn run(args: RepairArgs, config: Config, cwd: &Path) -> CliResult<()> {
    output::title("Repair Tenant Schema");

    let services = Services::connect(config, cwd).await?;
    let repair = services.repair_service()?;

    field("Database", &args.database);
    field("Modules", services.registry.len());
    output::blank();

    let result = repair.repair(&args.database).await;
    services.shutdown();
    let report = result?;

    for requirement in &report.unmet_requirements {
        note(Tone::Pending, &format!(
            "{} ran before {} existed",
            requirement.module, requirement.relation
        ));
    }

    if report.is_success() {
        note(Tone::Good, &report.summary());
        Ok(())
    } else {
        Err(CliError::Repair(format!("{}: {}", args.database, report.summary())))
    }
}
