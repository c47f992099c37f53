//! Test utilities
//!
//! Proptest generators and an in-memory mount backend for unit tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::infra::mounts::{MountBackend, MountSpec};

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    use crate::core::arch::Arch;

    /// Generate a valid package name
    pub fn package_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,30}[a-z0-9]?".prop_filter("Name must not be empty", |s| !s.is_empty())
    }

    /// Generate a valid package version
    pub fn package_version() -> impl Strategy<Value = String> {
        (0u32..100, 0u32..100, proptest::option::of(0u32..100)).prop_map(|(major, minor, patch)| match patch {
            Some(patch) => format!("{major}.{minor}.{patch}"),
            None => format!("{major}.{minor}"),
        })
    }

    /// Generate a known architecture
    pub fn arch() -> impl Strategy<Value = Arch> {
        proptest::sample::select(Arch::ALL.to_vec())
    }
}

#[derive(Debug, Default)]
struct MountLog {
    mounted: Vec<PathBuf>,
    unmounted: Vec<PathBuf>,
    attempts: usize,
    mounts: usize,
    fail_on: Option<String>,
    fail_unmount: bool,
    binfmt: Vec<String>,
}

/// Mount backend that records operations instead of performing them
#[derive(Debug, Default)]
pub struct RecordingMounts {
    log: Mutex<MountLog>,
}

impl RecordingMounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail mounts whose target ends with `component`
    pub fn fail_on(&self, component: &str) {
        self.log.lock().unwrap().fail_on = Some(component.to_string());
    }

    pub fn clear_failure(&self) {
        self.log.lock().unwrap().fail_on = None;
    }

    pub fn fail_unmount(&self, fail: bool) {
        self.log.lock().unwrap().fail_unmount = fail;
    }

    pub fn register_binfmt(&self, qemu_name: &str) {
        self.log.lock().unwrap().binfmt.push(qemu_name.to_string());
    }

    /// Successful mounts so far
    pub fn mount_count(&self) -> usize {
        self.log.lock().unwrap().mounts
    }

    /// Mount calls so far, including failed ones
    pub fn attempts(&self) -> usize {
        self.log.lock().unwrap().attempts
    }

    /// Record a mount made outside the chroot manager
    pub fn add_mount(&self, target: PathBuf) {
        self.log.lock().unwrap().mounted.push(target);
    }

    pub fn mounted(&self) -> Vec<PathBuf> {
        self.log.lock().unwrap().mounted.clone()
    }

    /// Unmounted targets, in order
    pub fn unmounted(&self) -> Vec<PathBuf> {
        self.log.lock().unwrap().unmounted.clone()
    }
}

impl MountBackend for RecordingMounts {
    fn mount(&self, spec: &MountSpec) -> Result<(), String> {
        let mut log = self.log.lock().unwrap();
        log.attempts += 1;
        if let Some(component) = &log.fail_on {
            if spec.target.ends_with(component) {
                return Err(format!("mount {} refused", spec.target.display()));
            }
        }
        log.mounts += 1;
        log.mounted.push(spec.target.clone());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), String> {
        let mut log = self.log.lock().unwrap();
        if log.fail_unmount {
            return Err("target is busy".to_string());
        }
        log.mounted.retain(|m| m != target);
        log.unmounted.push(target.to_path_buf());
        Ok(())
    }

    fn is_mounted(&self, target: &Path) -> bool {
        self.log.lock().unwrap().mounted.iter().any(|m| m == target)
    }

    fn mounts_under(&self, root: &Path) -> Vec<PathBuf> {
        let log = self.log.lock().unwrap();
        log.mounted.iter().filter(|m| m.starts_with(root)).cloned().collect()
    }

    fn binfmt_registered(&self, qemu_name: &str) -> bool {
        self.log.lock().unwrap().binfmt.iter().any(|b| b == qemu_name)
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use crate::core::version;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_package_name_generator(name in package_name()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn test_package_version_generator(v in package_version()) {
            prop_assert!(version::is_valid(&v));
        }
    }
}
