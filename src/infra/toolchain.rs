//! Cross toolchain detection
//!
//! Looks up `<triple>-gcc` for the target arch, either on `PATH` or in an
//! explicit search directory.

use std::path::PathBuf;

use crate::core::arch::Arch;
use crate::core::strategy::ToolchainProbe;

/// Toolchain probe backed by the filesystem
#[derive(Debug, Default, Clone)]
pub struct SystemToolchainProbe {
    /// Directories searched instead of `PATH`
    search_dirs: Vec<PathBuf>,
}

impl SystemToolchainProbe {
    /// Probe searching `PATH`
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe searching only `dirs`
    pub fn with_search_dirs(dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs: dirs }
    }

    /// Compiler binary name for `target`
    pub fn compiler_name(target: Arch) -> String {
        format!("{}-gcc", target.triple())
    }

    fn find(&self, binary: &str) -> Option<PathBuf> {
        if self.search_dirs.is_empty() {
            return which::which(binary).ok();
        }
        self.search_dirs
            .iter()
            .map(|dir| dir.join(binary))
            .find(|path| path.is_file())
    }
}

impl ToolchainProbe for SystemToolchainProbe {
    fn has_cross_toolchain(&self, host: Arch, target: Arch) -> bool {
        let compiler = Self::compiler_name(target);
        match self.find(&compiler) {
            Some(path) => {
                tracing::debug!("Cross toolchain {host} -> {target}: {}", path.display());
                true
            }
            None => {
                tracing::debug!("Cross toolchain {host} -> {target}: {compiler} not found");
                false
            }
        }
    }
}
