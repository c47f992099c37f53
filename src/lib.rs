//! Forgeroot - build orchestrator for mobile and embedded Linux distributions
//!
//! Resolves package definitions into a build order, decides what is stale,
//! picks native, emulated or cross builds per target and runs the build
//! tool inside per-architecture chroots.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Resolution, rebuild decisions, planning and scheduling
//! - [`infra`] - Chroots, mounts, build processes, artifact index
//! - [`config`] - Defaults and the configuration file
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
