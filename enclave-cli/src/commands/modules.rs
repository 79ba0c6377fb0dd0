//! `enclave modules` command - List the schema module registry.

use std::collections::HashMap;
use std::path::Path;

use enclave_schema::{SchemaModule, SchemaRegistry};

use crate::cli::ModulesArgs;
use crate::config::Config;
use crate::error::CliResult;
use crate::output::{self, Tone, field, note};
use crate::services::load_modules;

/// Run the modules command
pub async fn run(args: ModulesArgs, config: Config, cwd: &Path) -> CliResult<()> {
    output::title("Schema Modules");

    let dir = args.dir.unwrap_or(config.schema.modules_dir);
    let modules = load_modules(&dir, cwd).await?;
    let statements: HashMap<String, usize> = modules
        .iter()
        .map(|m| (m.name().to_string(), m.sql().len()))
        .collect();
    let registry = SchemaRegistry::builder().extend_sql(modules).build()?;

    field("Directory", dir.display());
    field("Modules", registry.len());
    if !config.schema.critical_relations.is_empty() {
        field("Critical", config.schema.critical_relations.join(", "));
    }
    output::blank();

    for module in registry.modules() {
        let requires = module.required_after();
        let count = statements.get(module.name()).copied().unwrap_or_default();
        let mut line = format!(
            "{:>4}  {}  [{} statement{}]",
            module.rank(),
            module.name(),
            count,
            if count == 1 { "" } else { "s" }
        );
        if !requires.is_empty() {
            line.push_str(&format!("  (requires {})", requires.join(", ")));
        }
        output::bullet(&line);
    }

    output::blank();
    if registry.warnings().is_empty() {
        note(Tone::Good, "All statements are idempotent");
    } else {
        output::subheading("Lint warnings");
        for warning in registry.warnings() {
            note(Tone::Pending, &warning.to_string());
        }
    }
    Ok(())
}
