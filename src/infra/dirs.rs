//! Platform-specific directory management
//!
//! Provides the config, work and package definition directories.
//! Follows the XDG Base Directory Specification on Linux.
//!
//! Environment variables override the configuration file and the defaults:
//! - `FORGEROOT_CONFIG_DIR` - Override config directory
//! - `FORGEROOT_WORK_DIR` - Override work directory (chroots, packages, logs)
//! - `FORGEROOT_APORTS` - Override package definitions directory

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::defaults::CONFIG_FILE;

/// Environment variable names for directory overrides
pub const ENV_CONFIG_DIR: &str = "FORGEROOT_CONFIG_DIR";
pub const ENV_WORK_DIR: &str = "FORGEROOT_WORK_DIR";
pub const ENV_APORTS: &str = "FORGEROOT_APORTS";

/// Application name used in directory paths
const APP_NAME: &str = "forgeroot";

/// Subdirectory of the work directory holding package definitions by default
const APORTS_SUBDIR: &str = "aports";

/// Directory provider for forgeroot
#[derive(Debug, Clone)]
pub struct ForgerootDirs {
    config_dir: PathBuf,
    work_dir: PathBuf,
    aports_dir: PathBuf,
}

impl ForgerootDirs {
    /// Directories from environment variables and platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self::with_configured(None, None)
    }

    /// Directories where configured values fill in for unset environment variables
    #[must_use]
    pub fn with_configured(work_dir: Option<&Path>, aports_dir: Option<&Path>) -> Self {
        let work_dir = env_path(ENV_WORK_DIR)
            .or_else(|| work_dir.map(Path::to_path_buf))
            .unwrap_or_else(Self::platform_work_dir);
        let aports_dir = env_path(ENV_APORTS)
            .or_else(|| aports_dir.map(Path::to_path_buf))
            .unwrap_or_else(|| work_dir.join(APORTS_SUBDIR));

        Self {
            config_dir: env_path(ENV_CONFIG_DIR).unwrap_or_else(Self::platform_config_dir),
            work_dir,
            aports_dir,
        }
    }

    /// Create the work directory and make both data directories canonical
    ///
    /// Mount points are compared against the kernel mount table, which only
    /// holds absolute paths with symlinks resolved. A missing package
    /// definitions directory is kept as given and reported when loading.
    pub fn resolve(self) -> io::Result<Self> {
        fs::create_dir_all(&self.work_dir)?;
        let work_dir = fs::canonicalize(&self.work_dir)?;
        let aports_dir = if self.aports_dir.exists() {
            fs::canonicalize(&self.aports_dir)?
        } else {
            self.aports_dir
        };
        Ok(Self {
            config_dir: self.config_dir,
            work_dir,
            aports_dir,
        })
    }

    /// Get the config directory path
    ///
    /// - Linux: `$XDG_CONFIG_HOME/forgeroot` or `~/.config/forgeroot`
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Get the work directory path
    ///
    /// - Linux: `$XDG_DATA_HOME/forgeroot` or `~/.local/share/forgeroot`
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone()
    }

    /// Get the package definitions directory
    #[must_use]
    pub fn aports_dir(&self) -> PathBuf {
        self.aports_dir.clone()
    }

    /// Get the config file path
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Get platform-specific config directory
    fn platform_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                // Fallback to home directory
                dirs::home_dir()
                    .map(|h| h.join(".config").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
            })
    }

    /// Get platform-specific work directory
    fn platform_work_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".local").join("share").join(APP_NAME))
                    .unwrap_or_else(|| {
                        PathBuf::from(".")
                            .join(".local")
                            .join("share")
                            .join(APP_NAME)
                    })
            })
    }
}

impl Default for ForgerootDirs {
    fn default() -> Self {
        Self::new()
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_new_creates_instance() {
        let dirs = ForgerootDirs::new();
        assert!(!dirs.config_dir().as_os_str().is_empty());
        assert!(!dirs.work_dir().as_os_str().is_empty());
        assert!(!dirs.aports_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_config_path_is_under_config_dir() {
        let dirs = ForgerootDirs::new();
        assert!(dirs.config_path().starts_with(dirs.config_dir()));
        assert!(dirs.config_path().ends_with("config.toml"));
    }

    #[test]
    fn test_configured_values_used_without_env() {
        if env::var_os(ENV_WORK_DIR).is_some() || env::var_os(ENV_APORTS).is_some() {
            return;
        }
        let dirs = ForgerootDirs::with_configured(Some(Path::new("/srv/work")), None);
        assert_eq!(dirs.work_dir(), PathBuf::from("/srv/work"));
        assert_eq!(dirs.aports_dir(), PathBuf::from("/srv/work/aports"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_canonicalizes_symlinked_work_dir() {
        if env::var_os(ENV_WORK_DIR).is_some() || env::var_os(ENV_APORTS).is_some() {
            return;
        }
        let temp = tempfile::TempDir::new().unwrap();
        let real = temp.path().join("real");
        fs::create_dir_all(real.join("aports")).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let dirs = ForgerootDirs::with_configured(Some(&link), None).resolve().unwrap();
        let canonical = fs::canonicalize(&real).unwrap();
        assert_eq!(dirs.work_dir(), canonical);
        assert_eq!(dirs.aports_dir(), canonical.join("aports"));
    }

    #[test]
    fn test_resolve_creates_work_dir() {
        if env::var_os(ENV_WORK_DIR).is_some() || env::var_os(ENV_APORTS).is_some() {
            return;
        }
        let temp = tempfile::TempDir::new().unwrap();
        let work = temp.path().join("new").join("work");

        let dirs = ForgerootDirs::with_configured(Some(&work), None).resolve().unwrap();
        assert!(work.is_dir());
        assert!(dirs.work_dir().is_absolute());
        assert!(!dirs.aports_dir().exists());
    }
}
