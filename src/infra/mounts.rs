//! Mount primitives
//!
//! The chroot manager performs every mount through [`MountBackend`]. The
//! system implementation shells out to `mount`/`umount` and reads
//! `/proc/mounts`; tests substitute a recording fake.

use std::path::{Path, PathBuf};
use std::process::Command;

/// What a mount step attaches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    /// Pseudo filesystem (`proc`, `sysfs`)
    Filesystem(&'static str),
    /// Bind mount of a host directory
    Bind(PathBuf),
}

/// A single mount operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: MountSource,
    /// Absolute mount point
    pub target: PathBuf,
    pub read_only: bool,
}

impl MountSpec {
    /// Mount a pseudo filesystem
    pub fn filesystem(fstype: &'static str, target: PathBuf) -> Self {
        Self {
            source: MountSource::Filesystem(fstype),
            target,
            read_only: false,
        }
    }

    /// Create a read-write bind mount
    pub fn bind(source: PathBuf, target: PathBuf) -> Self {
        Self {
            source: MountSource::Bind(source),
            target,
            read_only: false,
        }
    }

    /// Create a read-only bind mount
    pub fn bind_read_only(source: PathBuf, target: PathBuf) -> Self {
        Self {
            read_only: true,
            ..Self::bind(source, target)
        }
    }

    /// Arguments for the `mount` command
    pub fn mount_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match &self.source {
            MountSource::Filesystem(fstype) => {
                args.push("-t".to_string());
                args.push((*fstype).to_string());
                args.push((*fstype).to_string());
            }
            MountSource::Bind(source) => {
                args.push("--bind".to_string());
                if self.read_only {
                    args.push("-o".to_string());
                    args.push("ro".to_string());
                }
                args.push(source.display().to_string());
            }
        }
        args.push(self.target.display().to_string());
        args
    }
}

/// OS-level mount operations
pub trait MountBackend: Send + Sync {
    /// Perform a mount
    fn mount(&self, spec: &MountSpec) -> Result<(), String>;

    /// Unmount a mount point
    fn unmount(&self, target: &Path) -> Result<(), String>;

    /// Whether something is mounted at `target`
    fn is_mounted(&self, target: &Path) -> bool;

    /// Mount points at or below `root`
    fn mounts_under(&self, root: &Path) -> Vec<PathBuf>;

    /// Whether a binfmt_misc handler for `qemu-<name>` is registered
    fn binfmt_registered(&self, qemu_name: &str) -> bool;
}

/// Mount backend using the system `mount` tools
#[derive(Debug, Clone)]
pub struct SystemMounts {
    mounts_table: PathBuf,
    binfmt_dir: PathBuf,
}

impl Default for SystemMounts {
    fn default() -> Self {
        Self {
            mounts_table: PathBuf::from("/proc/mounts"),
            binfmt_dir: PathBuf::from("/proc/sys/fs/binfmt_misc"),
        }
    }
}

impl SystemMounts {
    /// Create a backend reading the standard kernel tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend reading the given mount table and binfmt_misc directory
    pub fn with_tables(mounts_table: PathBuf, binfmt_dir: PathBuf) -> Self {
        Self {
            mounts_table,
            binfmt_dir,
        }
    }

    fn mount_points(&self) -> Vec<PathBuf> {
        std::fs::read_to_string(&self.mounts_table)
            .map(|table| mount_points(&table).collect())
            .unwrap_or_default()
    }

    fn run(program: &str, args: &[String]) -> Result<(), String> {
        tracing::debug!("Running {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| format!("failed to run {program}: {e}"))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

impl MountBackend for SystemMounts {
    fn mount(&self, spec: &MountSpec) -> Result<(), String> {
        Self::run("mount", &spec.mount_args())
    }

    fn unmount(&self, target: &Path) -> Result<(), String> {
        Self::run("umount", &[target.display().to_string()])
    }

    fn is_mounted(&self, target: &Path) -> bool {
        let target = kernel_path(target);
        self.mount_points().iter().any(|point| *point == target)
    }

    fn mounts_under(&self, root: &Path) -> Vec<PathBuf> {
        let root = kernel_path(root);
        self.mount_points()
            .into_iter()
            .filter(|point| point.starts_with(&root))
            .collect()
    }

    fn binfmt_registered(&self, qemu_name: &str) -> bool {
        self.binfmt_dir.join(format!("qemu-{qemu_name}")).exists()
    }
}

/// Mount points listed in a `/proc/mounts` style table
pub fn mount_points(table: &str) -> impl Iterator<Item = PathBuf> + '_ {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        // Spaces in mount points are octal escaped
        .map(|point| PathBuf::from(point.replace("\\040", " ")))
}

/// The path as the kernel records it: absolute with symlinks resolved
///
/// Paths that do not exist cannot be mount points and are returned as given.
fn kernel_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
