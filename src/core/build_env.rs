//! Build environment setup
//!
//! Environment handed to the build tool inside the chroot: `CARCH`,
//! `CBUILD`, `CHOST`, `CROSS_COMPILE` (cross builds only), `JOBS`,
//! `PKGREL`, `SRCDIR` and `PKGDEST`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::arch::Arch;
use crate::core::strategy::BuildStrategy;

/// Build environment for a package.
///
/// Native and emulated builds run on a machine of the target arch (real or
/// translated), so `CBUILD` equals `CHOST`. Cross builds run on the host
/// and set `CROSS_COMPILE` to the target toolchain prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildEnvironment {
    /// Target architecture name (e.g., "aarch64")
    pub carch: String,
    /// Triple of the machine running the build
    pub cbuild: String,
    /// Triple of the machine the package runs on
    pub chost: String,
    /// Toolchain prefix for cross builds (e.g., "aarch64-alpine-linux-musl-")
    pub cross_compile: Option<String>,
    /// Number of parallel jobs
    pub jobs: usize,
    /// Package release number the artifact is built with
    pub pkgrel: u32,
    /// Package definition directory, as seen inside the chroot
    pub srcdir: PathBuf,
    /// Output directory for built packages, as seen inside the chroot
    pub pkgdest: PathBuf,
    /// Additional environment variables
    pub extra_env: HashMap<String, String>,
}

impl BuildEnvironment {
    /// Create the environment for building for `target` with `strategy`
    pub fn new(target: Arch, host: Arch, strategy: BuildStrategy, srcdir: PathBuf, pkgdest: PathBuf) -> Self {
        let (cbuild, cross_compile) = match strategy {
            BuildStrategy::Native | BuildStrategy::Emulated => (target.triple(), None),
            BuildStrategy::Cross => (host.triple(), Some(format!("{}-", target.triple()))),
        };
        Self {
            carch: target.as_str().to_string(),
            cbuild: cbuild.to_string(),
            chost: target.triple().to_string(),
            cross_compile,
            jobs: num_cpus::get(),
            pkgrel: 0,
            srcdir,
            pkgdest,
            extra_env: HashMap::new(),
        }
    }

    /// Set the number of parallel jobs
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Set the package release number
    #[must_use]
    pub fn with_pkgrel(mut self, pkgrel: u32) -> Self {
        self.pkgrel = pkgrel;
        self
    }

    /// Add an extra environment variable
    #[must_use]
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.extra_env.insert(key.to_string(), value.to_string());
        self
    }

    /// Convert to environment variable map for process execution
    pub fn to_env_map(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();

        env.insert("CARCH".to_string(), self.carch.clone());
        env.insert("CBUILD".to_string(), self.cbuild.clone());
        env.insert("CHOST".to_string(), self.chost.clone());
        env.insert("JOBS".to_string(), self.jobs.to_string());
        env.insert("PKGREL".to_string(), self.pkgrel.to_string());
        env.insert("SRCDIR".to_string(), self.srcdir.display().to_string());
        env.insert("PKGDEST".to_string(), self.pkgdest.display().to_string());

        if let Some(ref prefix) = self.cross_compile {
            env.insert("CROSS_COMPILE".to_string(), prefix.clone());
        }

        for (key, value) in &self.extra_env {
            env.insert(key.clone(), value.clone());
        }

        env
    }
}
