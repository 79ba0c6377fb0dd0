//! # enclave-schema
//!
//! Schema modules for enclave tenant databases.
//!
//! This crate provides:
//! - [`SchemaModule`]: a named, ranked, idempotent unit of DDL
//! - [`SqlModule`]: a module built from plain SQL statements, with an idempotency lint
//! - [`SchemaRegistry`]: the static, rank-ordered module set
//! - [`SchemaOrchestrator`]: applies the registry to one database and reports the outcome
//! - [`ModuleDirectory`]: loads `<rank>_<name>.sql` files into a registry
//! - [`SqlStateError`]: SQLSTATE-based classification of "missing object" failures
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌────────────────┐     ┌────────────────────┐
//! │ ModuleDirectory  │────▶│ SchemaRegistry │────▶│ SchemaOrchestrator │
//! └──────────────────┘     └────────────────┘     └────────────────────┘
//!                                                          │
//!                                                          ▼
//!                                                 ┌────────────────────┐
//!                                                 │  SchemaExecutor    │
//!                                                 │ (one tenant conn)  │
//!                                                 └────────────────────┘
//! ```
//!
//! There is no version table. Every module is safe to re-run, so a database
//! is brought up to date by applying the whole registry again.
//!
//! ## Example
//!
//! ```rust,ignore
//! use enclave_schema::{OrchestratorConfig, SchemaOrchestrator, SchemaRegistry, SqlModule};
//!
//! let registry = SchemaRegistry::builder()
//!     .register_sql(
//!         SqlModule::new("identity", 0)
//!             .statement("CREATE TABLE IF NOT EXISTS users (id BIGSERIAL PRIMARY KEY)"),
//!     )
//!     .register_sql(
//!         SqlModule::new("billing", 1)
//!             .statement("CREATE TABLE IF NOT EXISTS invoices (id BIGSERIAL PRIMARY KEY)"),
//!     )
//!     .build()?;
//!
//! let orchestrator = SchemaOrchestrator::new(
//!     OrchestratorConfig::new().critical_relations(["users", "invoices"]),
//! );
//! let result = orchestrator.apply(&conn, &registry).await;
//! println!("{}", result.summary());
//! ```

pub mod error;
pub mod executor;
pub mod file;
pub mod module;
pub mod orchestrator;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports
pub use error::{SchemaError, SchemaResult, SqlStateError, sqlstate};
pub use executor::{SchemaExecutor, missing_from};
pub use file::{ModuleDirectory, parse_module, split_statements};
pub use module::{LintWarning, SchemaModule, SqlModule};
pub use orchestrator::{ApplyResult, OrchestratorConfig, SchemaOrchestrator, UnmetRequirement};
pub use registry::{SchemaRegistry, SchemaRegistryBuilder};
