//! `enclave provision` command - Create a tenant database.

use std::path::Path;

use enclave_tenant::TenantId;

use crate::cli::ProvisionArgs;
use crate::config::Config;
use crate::error::CliResult;
use crate::output::{self, Tone, field, note, state_badge};
use crate::services::Services;

/// Run the provision command
pub async fn run(args: ProvisionArgs, config: Config, cwd: &Path) -> CliResult<()> {
    output::title("Provision Tenant");

    let services = Services::connect(config, cwd).await?;
    let provisioner = services.provisioner()?;

    let tenant = TenantId::new(args.tenant);
    let requested = args.name.as_deref().unwrap_or(tenant.as_str());
    let database = provisioner.database_name(&tenant, requested)?;

    field("Tenant", &tenant);
    field("Database", &database);
    field("Modules", services.registry.len());
    output::blank();

    let result = provisioner.provision(&tenant, requested).await;
    services.shutdown();
    let provisioned = result?;

    note(
        Tone::Good,
        &format!(
            "Database {} is {}",
            provisioned.database_name,
            state_badge(Some(provisioned.state))
        ),
    );
    Ok(())
}
