//! Core build orchestration logic
//!
//! Everything here is deterministic given its inputs. Mounts, processes and
//! the artifact index live in [`crate::infra`] and are reached through the
//! traits declared in this module tree.
//!
//! # Submodules
//!
//! - [`arch`] - Architecture names and applicability lists
//! - [`version`] - Version comparison and constraints
//! - [`package`] - Package definition handling
//! - [`graph`] - Package graph store
//! - [`resolver`] - Dependency resolution into build order
//! - [`rebuild`] - Rebuild decisions and pkgrel auto-bump
//! - [`strategy`] - Native, emulated or cross build selection
//! - [`context`] - Run-scoped settings and work directory layout
//! - [`build_env`] - Environment passed to the build tool
//! - [`plan`] - Build plan creation
//! - [`scheduler`] - Job dispatch over chroots
//! - [`report`] - Per-target outcomes and exit codes
//! - [`pkgrel_bump`] - pkgrel bump planning

pub mod arch;
pub mod build_env;
pub mod context;
pub mod graph;
pub mod package;
pub mod pkgrel_bump;
pub mod plan;
pub mod rebuild;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod strategy;
pub mod version;
