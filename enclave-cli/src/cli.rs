//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Enclave CLI - database-per-tenant operations
#[derive(Parser, Debug)]
#[command(name = "enclave")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "Enclave CLI - database-per-tenant operations", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file (defaults to ./enclave.toml)
    #[arg(short, long, global = true, env = "ENCLAVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and initialize a tenant database
    Provision(ProvisionArgs),

    /// Drop a tenant database
    Deprovision(DeprovisionArgs),

    /// Re-apply schema modules to one tenant database
    Repair(RepairArgs),

    /// Re-apply schema modules to every tenant database
    MigrateAll(MigrateAllArgs),

    /// Show tenant databases and their provisioning state
    Status(StatusArgs),

    /// List the schema modules that would be applied
    Modules(ModulesArgs),

    /// Display version information
    Version,
}

/// Arguments for the `provision` command
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Tenant identifier
    pub tenant: String,

    /// Requested database name (defaults to the tenant identifier)
    #[arg(short, long)]
    pub name: Option<String>,
}

/// Arguments for the `deprovision` command
#[derive(Args, Debug)]
pub struct DeprovisionArgs {
    /// Tenant identifier
    pub tenant: String,

    /// Database to drop
    pub database: String,

    /// Drop even if the database is not marked as owned by the tenant
    #[arg(long)]
    pub force: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the `repair` command
#[derive(Args, Debug)]
pub struct RepairArgs {
    /// Tenant database to repair
    pub database: String,
}

/// Arguments for the `migrate-all` command
#[derive(Args, Debug)]
pub struct MigrateAllArgs {
    /// Only databases with this prefix (defaults to the configured prefix)
    #[arg(long)]
    pub prefix: Option<String>,
}

/// Arguments for the `status` command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `modules` command
#[derive(Args, Debug)]
pub struct ModulesArgs {
    /// Module directory (overrides [schema].modules_dir)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}
