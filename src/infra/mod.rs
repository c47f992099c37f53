//! Infrastructure layer
//!
//! Handles all side effects: the filesystem, mounts, child processes and
//! lock files.

pub mod artifacts;
pub mod chroot;
pub mod dirs;
pub mod executor;
pub mod lockfile;
pub mod mounts;
pub mod recipes;
pub mod toolchain;
