//! Run-scoped context
//!
//! Everything a run needs to know about its environment, threaded
//! explicitly into the planner, scheduler and chroot manager. Independent
//! contexts can coexist in one process (tests rely on this).

use std::path::PathBuf;
use std::time::Duration;

use crate::config::defaults;
use crate::core::arch::Arch;
use crate::core::rebuild::RebuildMode;
use crate::core::strategy::StrategyMode;

/// Run configuration and on-disk layout
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Architecture of the build machine
    pub host: Arch,
    /// Architecture requested for this run
    pub target: Arch,
    pub rebuild_mode: RebuildMode,
    pub strategy_mode: StrategyMode,
    /// Root of chroots, packages, logs and locks
    pub work_dir: PathBuf,
    /// Package definitions tree
    pub aports_dir: PathBuf,
    /// Maximum concurrently running build jobs
    pub max_jobs: usize,
    /// Parallelism handed to the build tool (`JOBS`)
    pub build_jobs: usize,
    /// Command executed inside the chroot
    pub build_command: Vec<String>,
    pub build_timeout: Option<Duration>,
    /// Interval between lock file polls while waiting for another process
    pub lock_poll: Duration,
    /// Directory holding static qemu user-mode emulators
    pub emulator_dir: PathBuf,
    /// Remove chroot trees at the end of the run instead of unmounting
    pub destroy_on_exit: bool,
}

impl RunContext {
    /// Context with default settings
    pub fn new(host: Arch, target: Arch, work_dir: impl Into<PathBuf>, aports_dir: impl Into<PathBuf>) -> Self {
        Self {
            host,
            target,
            rebuild_mode: RebuildMode::Normal,
            strategy_mode: StrategyMode::Normal,
            work_dir: work_dir.into(),
            aports_dir: aports_dir.into(),
            max_jobs: defaults::DEFAULT_MAX_JOBS,
            build_jobs: num_cpus::get(),
            build_command: defaults::DEFAULT_BUILD_COMMAND
                .iter()
                .map(ToString::to_string)
                .collect(),
            build_timeout: None,
            lock_poll: Duration::from_millis(defaults::DEFAULT_LOCK_POLL_MS),
            emulator_dir: PathBuf::from(defaults::DEFAULT_EMULATOR_DIR),
            destroy_on_exit: false,
        }
    }

    /// Set the rebuild mode
    #[must_use]
    pub fn with_rebuild_mode(mut self, mode: RebuildMode) -> Self {
        self.rebuild_mode = mode;
        self
    }

    /// Set the strategy mode
    #[must_use]
    pub fn with_strategy_mode(mut self, mode: StrategyMode) -> Self {
        self.strategy_mode = mode;
        self
    }

    /// Set the maximum number of concurrent jobs (at least one)
    #[must_use]
    pub fn with_max_jobs(mut self, jobs: usize) -> Self {
        self.max_jobs = jobs.max(1);
        self
    }

    /// Set the lock poll interval
    #[must_use]
    pub fn with_lock_poll(mut self, poll: Duration) -> Self {
        self.lock_poll = poll;
        self
    }

    /// Set the build command
    #[must_use]
    pub fn with_build_command(mut self, command: Vec<String>) -> Self {
        self.build_command = command;
        self
    }

    /// Set the build timeout
    #[must_use]
    pub fn with_build_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.build_timeout = timeout;
        self
    }

    /// Set the emulator directory
    #[must_use]
    pub fn with_emulator_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.emulator_dir = dir.into();
        self
    }

    /// Destroy chroots at the end of the run
    #[must_use]
    pub fn with_destroy_on_exit(mut self, destroy: bool) -> Self {
        self.destroy_on_exit = destroy;
        self
    }

    /// Chroot name for `arch` (`native` or `buildroot_<arch>`)
    pub fn chroot_name(&self, arch: Arch) -> String {
        if arch == self.host {
            "native".to_string()
        } else {
            format!("buildroot_{arch}")
        }
    }

    /// Root of the chroot tree for `arch`
    pub fn chroot_dir(&self, arch: Arch) -> PathBuf {
        self.work_dir.join(format!("chroot_{}", self.chroot_name(arch)))
    }

    /// Lock file guarding the chroot for `arch`
    pub fn chroot_lock_path(&self, arch: Arch) -> PathBuf {
        self.work_dir.join(format!("chroot_{}.lock", self.chroot_name(arch)))
    }

    /// Directory holding built packages
    pub fn packages_dir(&self) -> PathBuf {
        self.work_dir.join("packages")
    }

    /// Built packages for one architecture
    pub fn arch_packages_dir(&self, arch: Arch) -> PathBuf {
        self.packages_dir().join(arch.as_str())
    }

    /// Persisted artifact index
    pub fn artifact_index_path(&self) -> PathBuf {
        self.packages_dir().join("index.json")
    }

    /// Build log of a package
    pub fn log_path(&self, package: &str, arch: Arch) -> PathBuf {
        self.work_dir
            .join("logs")
            .join(arch.as_str())
            .join(format!("{package}.log"))
    }
}
