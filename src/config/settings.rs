//! Configuration file handling
//!
//! Reads `config.toml` from the config directory (or the path given with
//! `--config`). A missing file yields defaults; an invalid one is an error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::context::RunContext;
use crate::error::ConfigError;

/// forgeroot configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Build options
    #[serde(default)]
    pub build: BuildSettings,

    /// Chroot options
    #[serde(default)]
    pub chroot: ChrootSettings,

    /// Directory overrides
    #[serde(default)]
    pub paths: PathSettings,
}

/// Build options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Maximum concurrently running build jobs
    pub jobs: Option<usize>,

    /// Command run inside the chroot
    pub command: Option<Vec<String>>,

    /// Build timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Chroot options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChrootSettings {
    /// Lock poll interval in milliseconds
    pub lock_poll_ms: Option<u64>,

    /// Destroy chroots at the end of each run
    pub destroy_on_exit: Option<bool>,

    /// Directory holding static qemu emulators
    pub emulator_dir: Option<PathBuf>,
}

/// Directory overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSettings {
    /// Work directory
    pub work: Option<PathBuf>,

    /// Package definitions directory
    pub aports: Option<PathBuf>,
}

impl Settings {
    /// Load settings from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let settings: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build.jobs == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "build.jobs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.build.command.as_ref().is_some_and(Vec::is_empty) {
            return Err(ConfigError::InvalidValue {
                key: "build.command".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.chroot.lock_poll_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "chroot.lock_poll_ms".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Fold the file values into a run context
    #[must_use]
    pub fn apply(&self, mut ctx: RunContext) -> RunContext {
        if let Some(jobs) = self.build.jobs {
            ctx = ctx.with_max_jobs(jobs);
        }
        if let Some(command) = &self.build.command {
            ctx = ctx.with_build_command(command.clone());
        }
        if let Some(secs) = self.build.timeout_secs {
            ctx = ctx.with_build_timeout(Some(Duration::from_secs(secs)));
        }
        if let Some(ms) = self.chroot.lock_poll_ms {
            ctx = ctx.with_lock_poll(Duration::from_millis(ms));
        }
        if let Some(destroy) = self.chroot.destroy_on_exit {
            ctx = ctx.with_destroy_on_exit(destroy);
        }
        if let Some(dir) = &self.chroot.emulator_dir {
            ctx = ctx.with_emulator_dir(dir.clone());
        }
        ctx
    }
}
