//! Enclave CLI - operator commands for tenant databases.

use clap::Parser;

use enclave_cli::cli::{Cli, Command};
use enclave_cli::commands;
use enclave_cli::config::Config;
use enclave_cli::error::CliResult;
use enclave_cli::output;
use enclave_tenant::logging;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::failure(e);
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    if cli.verbose {
        logging::init_with_level("debug");
    } else {
        logging::init();
    }

    if let Command::Version = cli.command {
        return commands::version::run().await;
    }

    let cwd = std::env::current_dir()?;
    let config = Config::discover(cli.config.as_deref(), &cwd)?;

    match cli.command {
        Command::Provision(args) => commands::provision::run(args, config, &cwd).await,
        Command::Deprovision(args) => commands::deprovision::run(args, config, &cwd).await,
        Command::Repair(args) => commands::repair::run(args, config, &cwd).await,
        Command::MigrateAll(args) => commands::migrate_all::run(args, config, &cwd).await,
        Command::Status(args) => commands::status::run(args, config, &cwd).await,
        Command::Modules(args) => commands::modules::run(args, config, &cwd).await,
        Command::Version => commands::version::run().await,
    }
}
