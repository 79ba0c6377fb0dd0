//! Enclave CLI - operator commands for tenant databases.
//!
//! This crate provides the `enclave` binary for provisioning, repairing and
//! inspecting database-per-tenant deployments.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod services;
