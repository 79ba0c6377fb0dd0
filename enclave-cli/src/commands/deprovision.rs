//! `enclave deprovision` command - Drop a tenant database.

use std::path::Path;

use enclave_tenant::TenantId;

use crate::cli::DeprovisionArgs;
use crate::config::Config;
use crate::error::CliResult;
use crate::output::{self, Tone, field, note};
use crate::services::Services;

/// Run the deprovision command
pub async fn run(args: DeprovisionArgs, config: Config, cwd: &Path) -> CliResult<()> {
    output::title("Deprovision Tenant");

    field("Tenant", &args.tenant);
    field("Database", &args.database);
    output::blank();

    if args.force {
        note(Tone::Pending, "--force skips the ownership check");
    }
    if !args.yes && !output::confirm_drop(&args.database) {
        note(Tone::Quiet, "Deprovision cancelled.");
        return Ok(());
    }

    let services = Services::connect(config, cwd).await?;
    let provisioner = services.provisioner()?;

    let result = if args.force {
        provisioner.deprovision_unchecked(&args.database).await
    } else {
        provisioner
            .deprovision(&TenantId::new(args.tenant), &args.database)
            .await
    };
    services.shutdown();
    result?;

    note(Tone::Good, &format!("Database {} dropped", args.database));
    Ok(())
}
