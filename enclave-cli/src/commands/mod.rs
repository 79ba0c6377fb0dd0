//! CLI command implementations.

pub mod deprovision;
pub mod migrate_all;
pub mod modules;
pub mod provision;
pub mod repair;
pub mod status;
pub mod version;
