//! `enclave version` command - Display version information.

use crate::error::CliResult;
use crate::output::{self, Tone, field, note};

/// Package version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command
pub async fn run() -> CliResult<()> {
    output::title("Enclave");

    field("Version", VERSION);
    field("Binary", "enclave");

    #[cfg(debug_assertions)]
    let build_mode = "debug";
    #[cfg(not(debug_assertions))]
    let build_mode = "release";

    field("Build", build_mode);
    field("Backend", "postgres");

    output::blank();
    output::subheading("Components");
    field("enclave-schema", VERSION);
    field("enclave-tenant", VERSION);
    field("enclave-postgres", VERSION);

    output::blank();
    note(Tone::Quiet, "Database-per-tenant provisioning and schema repair");

    Ok(())
}
