//! Chroot lifecycle management
//!
//! One chroot per architecture: `chroot_native` for the host, one
//! `chroot_buildroot_<arch>` per foreign architecture. A chroot is used by
//! one build job at a time; in-process callers queue on a per-arch async
//! mutex, other processes are kept out by a `flock`ed lock file.
//!
//! State machine: `Uninitialized -> Mounted -> InUse -> Idle -> ...`, with
//! `Destroyed` only reachable through [`ChrootManager::destroy`].

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::defaults::{CHROOT_APORTS_DIR, CHROOT_PACKAGES_DIR, MOUNT_MARKER};
use crate::core::arch::Arch;
use crate::core::context::RunContext;
use crate::error::ChrootError;
use crate::infra::lockfile::LockFile;
use crate::infra::mounts::{MountBackend, MountSource, MountSpec};

/// Lifecycle state of a chroot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChrootState {
    Uninitialized,
    Mounted,
    InUse,
    Idle,
    Destroyed,
}

impl fmt::Display for ChrootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Mounted => "mounted",
            Self::InUse => "in use",
            Self::Idle => "idle",
            Self::Destroyed => "destroyed",
        })
    }
}

/// A per-architecture sandbox tree
#[derive(Debug)]
pub struct Chroot {
    name: String,
    arch: Arch,
    root: PathBuf,
    lock_path: PathBuf,
    state: ChrootState,
}

impl Chroot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> ChrootState {
        self.state
    }

    fn marker_path(&self) -> PathBuf {
        self.root.join(MOUNT_MARKER)
    }
}

/// Exclusive use of a chroot, returned to `Idle` on drop
#[derive(Debug)]
pub struct ChrootLease {
    // Declared before the guard so the file lock goes first
    _lock: LockFile,
    guard: OwnedMutexGuard<Chroot>,
}

impl ChrootLease {
    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    pub fn arch(&self) -> Arch {
        self.guard.arch()
    }

    pub fn name(&self) -> &str {
        self.guard.name()
    }

    pub fn state(&self) -> ChrootState {
        self.guard.state()
    }
}

impl Drop for ChrootLease {
    fn drop(&mut self) {
        if self.guard.state == ChrootState::InUse {
            self.guard.state = ChrootState::Idle;
            tracing::debug!("Released chroot '{}'", self.guard.name);
        }
    }
}

/// Summary of an on-disk chroot, for `chroot list`
#[derive(Debug, Clone, Serialize)]
pub struct ChrootInfo {
    pub name: String,
    pub arch: Arch,
    pub path: PathBuf,
    pub mounted: bool,
    pub locked: bool,
}

struct Slot {
    chroot: Arc<AsyncMutex<Chroot>>,
    /// Setup failure, replayed to later acquirers of the same arch
    failure: Mutex<Option<ChrootError>>,
}

impl Slot {
    fn failure(&self) -> Option<ChrootError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_failure(&self, error: Option<ChrootError>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }
}

enum Undo {
    Unmount(PathBuf),
    Remove(PathBuf),
}

/// Unwinds completed setup steps in reverse unless committed
struct SetupGuard<'a> {
    backend: &'a dyn MountBackend,
    chroot: &'a str,
    undo: Vec<Undo>,
    committed: bool,
}

impl<'a> SetupGuard<'a> {
    fn new(backend: &'a dyn MountBackend, chroot: &'a str) -> Self {
        Self {
            backend,
            chroot,
            undo: Vec::new(),
            committed: false,
        }
    }

    fn push(&mut self, undo: Undo) {
        self.undo.push(undo);
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for undo in self.undo.iter().rev() {
            match undo {
                Undo::Unmount(target) => {
                    tracing::debug!("Unwinding mount {} of '{}'", target.display(), self.chroot);
                    if let Err(e) = self.backend.unmount(target) {
                        tracing::warn!("Failed to unmount {}: {e}", target.display());
                    }
                }
                Undo::Remove(path) => {
                    if let Err(e) = fs::remove_file(path) {
                        tracing::warn!("Failed to remove {}: {e}", path.display());
                    }
                }
            }
        }
    }
}

/// Owns every chroot of a run
pub struct ChrootManager {
    ctx: Arc<RunContext>,
    backend: Arc<dyn MountBackend>,
    /// Recorded in lock files for diagnostics
    command: String,
    slots: Mutex<HashMap<Arch, Arc<Slot>>>,
}

impl fmt::Debug for ChrootManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChrootManager")
            .field("work_dir", &self.ctx.work_dir)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl ChrootManager {
    /// Create a manager for a run
    pub fn new(ctx: Arc<RunContext>, backend: Arc<dyn MountBackend>) -> Self {
        Self {
            ctx,
            backend,
            command: std::env::args().collect::<Vec<_>>().join(" "),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, arch: Arch) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(arch)
            .or_insert_with(|| {
                Arc::new(Slot {
                    chroot: Arc::new(AsyncMutex::new(Chroot {
                        name: self.ctx.chroot_name(arch),
                        arch,
                        root: self.ctx.chroot_dir(arch),
                        lock_path: self.ctx.chroot_lock_path(arch),
                        state: ChrootState::Uninitialized,
                    })),
                    failure: Mutex::new(None),
                })
            })
            .clone()
    }

    fn active_arches(&self) -> Vec<Arch> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut arches: Vec<Arch> = slots.keys().copied().collect();
        arches.sort();
        arches
    }

    /// Acquire exclusive use of the chroot for `arch`, mounting it if needed
    ///
    /// Blocks while another job holds it.
    pub async fn acquire(&self, arch: Arch) -> Result<ChrootLease, ChrootError> {
        let slot = self.slot(arch);
        if let Some(error) = slot.failure() {
            return Err(error);
        }

        let mut guard = slot.chroot.clone().lock_owned().await;
        if let Some(error) = slot.failure() {
            return Err(error);
        }

        let lock = LockFile::acquire(&guard.lock_path, &self.command, self.ctx.lock_poll)
            .await
            .map_err(|e| ChrootError::Lock {
                chroot: guard.name.clone(),
                path: guard.lock_path.clone(),
                error: e.to_string(),
            })?;

        if guard.state == ChrootState::Destroyed {
            guard.state = ChrootState::Uninitialized;
        }

        if self.is_ready(&guard) {
            if guard.state == ChrootState::Uninitialized {
                tracing::debug!("Chroot '{}' already mounted, reusing", guard.name);
                guard.state = ChrootState::Mounted;
            }
        } else if let Err(error) = self.setup(&mut guard) {
            tracing::error!("{error}");
            guard.state = ChrootState::Uninitialized;
            slot.set_failure(Some(error.clone()));
            return Err(error);
        }

        guard.state = ChrootState::InUse;
        tracing::debug!("Acquired chroot '{}'", guard.name);
        Ok(ChrootLease { _lock: lock, guard })
    }

    /// Return a chroot to `Idle`; mounts stay in place
    pub fn release(&self, lease: ChrootLease) {
        drop(lease);
    }

    /// Current state of the chroot for `arch`
    ///
    /// Waits while the chroot is leased.
    pub async fn state(&self, arch: Arch) -> ChrootState {
        self.slot(arch).chroot.lock().await.state
    }

    /// Unmount and remove the chroot for `arch`, including its lock file
    pub async fn destroy(&self, arch: Arch) -> Result<(), ChrootError> {
        let slot = self.slot(arch);
        let mut guard = slot.chroot.clone().lock_owned().await;
        let lock = LockFile::acquire(&guard.lock_path, &self.command, self.ctx.lock_poll)
            .await
            .map_err(|e| ChrootError::Lock {
                chroot: guard.name.clone(),
                path: guard.lock_path.clone(),
                error: e.to_string(),
            })?;

        tracing::info!("Destroying chroot '{}'", guard.name);
        self.unmount_all(&guard)?;

        let remaining = self.backend.mounts_under(&guard.root);
        if !remaining.is_empty() {
            let points: Vec<String> = remaining.iter().map(|p| p.display().to_string()).collect();
            return Err(ChrootError::Teardown {
                chroot: guard.name.clone(),
                error: format!("refusing to remove {}, still mounted: {}", guard.root.display(), points.join(", ")),
            });
        }

        let teardown = |error: io::Error| ChrootError::Teardown {
            chroot: guard.name.clone(),
            error: error.to_string(),
        };
        if guard.root.exists() {
            fs::remove_dir_all(&guard.root).map_err(teardown)?;
        }
        match fs::remove_file(&guard.lock_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(teardown(e)),
            _ => {}
        }
        drop(lock);

        guard.state = ChrootState::Destroyed;
        slot.set_failure(None);
        Ok(())
    }

    /// Unmount every chroot used in this run, keeping the trees
    pub async fn shutdown(&self) -> Result<(), ChrootError> {
        let mut first_error = None;
        for arch in self.active_arches() {
            let slot = self.slot(arch);
            let mut guard = slot.chroot.clone().lock_owned().await;
            if matches!(guard.state, ChrootState::Uninitialized | ChrootState::Destroyed) {
                continue;
            }
            let result = match LockFile::acquire(&guard.lock_path, &self.command, self.ctx.lock_poll).await {
                Ok(_lock) => self.unmount_all(&guard),
                Err(e) => Err(ChrootError::Lock {
                    chroot: guard.name.clone(),
                    path: guard.lock_path.clone(),
                    error: e.to_string(),
                }),
            };
            match result {
                Ok(()) => guard.state = ChrootState::Uninitialized,
                Err(e) => {
                    tracing::warn!("{e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// End-of-run cleanup: destroy or unmount, as configured
    pub async fn finish(&self) -> Result<(), ChrootError> {
        if !self.ctx.destroy_on_exit {
            return self.shutdown().await;
        }
        let mut first_error = None;
        for arch in self.active_arches() {
            if let Err(e) = self.destroy(arch).await {
                tracing::warn!("{e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// On-disk chroots of every architecture
    pub fn list(&self) -> Vec<ChrootInfo> {
        Arch::ALL
            .into_iter()
            .filter_map(|arch| {
                let path = self.ctx.chroot_dir(arch);
                if !path.exists() {
                    return None;
                }
                let mounted = path.join(MOUNT_MARKER).exists()
                    && self.backend.is_mounted(&path.join("proc"));
                Some(ChrootInfo {
                    name: self.ctx.chroot_name(arch),
                    arch,
                    locked: LockFile::is_locked(&self.ctx.chroot_lock_path(arch)),
                    path,
                    mounted,
                })
            })
            .collect()
    }

    fn is_ready(&self, chroot: &Chroot) -> bool {
        chroot.marker_path().exists() && self.backend.is_mounted(&chroot.root.join("proc"))
    }

    fn mount_plan(&self, chroot: &Chroot) -> Vec<(&'static str, MountSpec)> {
        let root = &chroot.root;
        vec![
            ("proc", MountSpec::filesystem("proc", root.join("proc"))),
            ("sysfs", MountSpec::filesystem("sysfs", root.join("sys"))),
            ("dev", MountSpec::bind(PathBuf::from("/dev"), root.join("dev"))),
            (
                "packages",
                MountSpec::bind(self.ctx.packages_dir(), root.join(CHROOT_PACKAGES_DIR)),
            ),
            (
                "aports",
                MountSpec::bind_read_only(self.ctx.aports_dir.clone(), root.join(CHROOT_APORTS_DIR)),
            ),
        ]
    }

    fn setup(&self, chroot: &mut Chroot) -> Result<(), ChrootError> {
        let name = chroot.name.clone();
        let failed = |step: &str, error: String| ChrootError::Setup {
            chroot: name.clone(),
            step: step.to_string(),
            error,
        };

        tracing::info!("Setting up chroot '{}' at {}", chroot.name, chroot.root.display());
        fs::create_dir_all(&chroot.root).map_err(|e| failed("create", e.to_string()))?;
        fs::create_dir_all(self.ctx.packages_dir()).map_err(|e| failed("create", e.to_string()))?;

        let mut guard = SetupGuard::new(self.backend.as_ref(), &name);
        for (step, spec) in self.mount_plan(chroot) {
            fs::create_dir_all(&spec.target).map_err(|e| failed(step, e.to_string()))?;
            if self.backend.is_mounted(&spec.target) {
                tracing::debug!("{} already mounted", spec.target.display());
                continue;
            }
            if let MountSource::Bind(source) = &spec.source {
                if !source.exists() {
                    return Err(failed(step, format!("{} does not exist", source.display())));
                }
            }
            self.backend.mount(&spec).map_err(|e| failed(step, e))?;
            guard.push(Undo::Unmount(spec.target.clone()));
            tracing::debug!("Mounted {step} at {}", spec.target.display());
        }

        if chroot.arch != self.ctx.host {
            let qemu = chroot.arch.qemu_name();
            if !self.backend.binfmt_registered(qemu) {
                return Err(ChrootError::Emulator {
                    arch: chroot.arch.to_string(),
                    reason: format!("binfmt_misc handler 'qemu-{qemu}' is not registered"),
                });
            }

            let file = format!("qemu-{qemu}-static");
            let source = self.ctx.emulator_dir.join(&file);
            if !source.exists() {
                return Err(ChrootError::Emulator {
                    arch: chroot.arch.to_string(),
                    reason: format!("{} not found", source.display()),
                });
            }
            let bin_dir = chroot.root.join("usr").join("bin");
            fs::create_dir_all(&bin_dir).map_err(|e| failed("install-emulator", e.to_string()))?;
            let dest = bin_dir.join(&file);
            fs::copy(&source, &dest).map_err(|e| failed("install-emulator", e.to_string()))?;
            guard.push(Undo::Remove(dest));
            tracing::debug!("Installed {file} into '{}'", chroot.name);
        }

        fs::write(chroot.marker_path(), chroot.arch.as_str()).map_err(|e| failed("marker", e.to_string()))?;
        guard.commit();

        chroot.state = ChrootState::Mounted;
        tracing::info!("Chroot '{}' mounted", chroot.name);
        Ok(())
    }

    fn unmount_all(&self, chroot: &Chroot) -> Result<(), ChrootError> {
        let mut errors = Vec::new();
        for (step, spec) in self.mount_plan(chroot).into_iter().rev() {
            if !self.backend.is_mounted(&spec.target) {
                continue;
            }
            match self.backend.unmount(&spec.target) {
                Ok(()) => tracing::debug!("Unmounted {step} of '{}'", chroot.name),
                Err(e) => errors.push(format!("{}: {e}", spec.target.display())),
            }
        }

        if !errors.is_empty() {
            return Err(ChrootError::Teardown {
                chroot: chroot.name.clone(),
                error: errors.join("; "),
            });
        }

        let marker = chroot.marker_path();
        if marker.exists() {
            fs::remove_file(&marker).map_err(|e| ChrootError::Teardown {
                chroot: chroot.name.clone(),
                error: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingMounts;
    use std::time::Duration;
    use tempfile::TempDir;

    const HOST: Arch = Arch::X86_64;

    struct Fixture {
        _temp: TempDir,
        ctx: Arc<RunContext>,
        mounts: Arc<RecordingMounts>,
        manager: ChrootManager,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let aports = temp.path().join("aports");
        let emulators = temp.path().join("emulators");
        fs::create_dir_all(&aports).unwrap();
        fs::create_dir_all(&emulators).unwrap();
        fs::write(emulators.join("qemu-aarch64-static"), b"qemu").unwrap();

        let ctx = Arc::new(
            RunContext::new(HOST, HOST, temp.path().join("work"), aports)
                .with_lock_poll(Duration::from_millis(5))
                .with_emulator_dir(emulators),
        );
        let mounts = Arc::new(RecordingMounts::new());
        let manager = ChrootManager::new(ctx.clone(), mounts.clone());
        Fixture {
            _temp: temp,
            ctx,
            mounts,
            manager,
        }
    }

    #[tokio::test]
    async fn test_acquire_mounts_and_release_idles() {
        let f = fixture();
        let lease = f.manager.acquire(HOST).await.unwrap();
        assert_eq!(lease.state(), ChrootState::InUse);
        assert_eq!(lease.name(), "native");
        assert!(lease.root().join(MOUNT_MARKER).exists());
        assert_eq!(f.mounts.mount_count(), 5);

        f.manager.release(lease);
        assert_eq!(f.manager.state(HOST).await, ChrootState::Idle);
    }

    #[tokio::test]
    async fn test_mount_is_idempotent() {
        let f = fixture();
        drop(f.manager.acquire(HOST).await.unwrap());
        drop(f.manager.acquire(HOST).await.unwrap());
        assert_eq!(f.mounts.mount_count(), 5);

        // A second manager (next invocation) adopts the mounted tree
        let other = ChrootManager::new(f.ctx.clone(), f.mounts.clone());
        drop(other.acquire(HOST).await.unwrap());
        assert_eq!(f.mounts.mount_count(), 5);
    }

    #[tokio::test]
    async fn test_failed_step_unwinds_in_reverse() {
        let f = fixture();
        f.mounts.fail_on("dev");

        let err = f.manager.acquire(HOST).await.unwrap_err();
        assert!(matches!(err, ChrootError::Setup { ref step, .. } if step == "dev"));

        let root = f.ctx.chroot_dir(HOST);
        assert_eq!(
            f.mounts.unmounted(),
            [root.join("sys"), root.join("proc")],
            "proc and sysfs are unmounted in reverse order"
        );
        assert!(f.mounts.mounted().is_empty());
        assert!(!root.join(MOUNT_MARKER).exists());
    }

    #[tokio::test]
    async fn test_setup_failure_is_cached() {
        let f = fixture();
        f.mounts.fail_on("proc");
        assert!(f.manager.acquire(HOST).await.is_err());

        f.mounts.clear_failure();
        assert!(f.manager.acquire(HOST).await.is_err());
        assert_eq!(f.mounts.attempts(), 1);
    }

    #[tokio::test]
    async fn test_foreign_chroot_installs_emulator() {
        let f = fixture();
        f.mounts.register_binfmt("aarch64");
        let lease = f.manager.acquire(Arch::Aarch64).await.unwrap();
        assert_eq!(lease.name(), "buildroot_aarch64");
        assert!(lease.root().join("usr/bin/qemu-aarch64-static").exists());
    }

    #[tokio::test]
    async fn test_foreign_chroot_without_binfmt_fails_and_unwinds() {
        let f = fixture();
        let err = f.manager.acquire(Arch::Aarch64).await.unwrap_err();
        assert!(matches!(err, ChrootError::Emulator { .. }));
        assert!(f.mounts.mounted().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_removes_tree_and_lock() {
        let f = fixture();
        drop(f.manager.acquire(HOST).await.unwrap());
        let root = f.ctx.chroot_dir(HOST);
        let lock = f.ctx.chroot_lock_path(HOST);
        assert!(lock.exists());

        f.manager.destroy(HOST).await.unwrap();
        assert!(!root.exists());
        assert!(!lock.exists());
        assert!(f.mounts.mounted().is_empty());
        assert_eq!(f.manager.state(HOST).await, ChrootState::Destroyed);
    }

    #[tokio::test]
    async fn test_destroy_keeps_tree_when_unmount_fails() {
        let f = fixture();
        drop(f.manager.acquire(HOST).await.unwrap());
        f.mounts.fail_unmount(true);

        let err = f.manager.destroy(HOST).await.unwrap_err();
        assert!(matches!(err, ChrootError::Teardown { .. }));
        assert!(f.ctx.chroot_dir(HOST).exists());
    }

    #[tokio::test]
    async fn test_destroy_refuses_tree_with_live_mounts() {
        let f = fixture();
        drop(f.manager.acquire(HOST).await.unwrap());
        let root = f.ctx.chroot_dir(HOST);
        f.mounts.add_mount(root.join("mnt/extra"));

        let err = f.manager.destroy(HOST).await.unwrap_err();
        assert!(matches!(err, ChrootError::Teardown { ref error, .. } if error.contains("still mounted")));
        assert!(root.exists());
        assert!(f.ctx.packages_dir().exists());
    }

    #[tokio::test]
    async fn test_shutdown_unmounts_but_keeps_tree() {
        let f = fixture();
        drop(f.manager.acquire(HOST).await.unwrap());
        f.manager.shutdown().await.unwrap();

        assert!(f.mounts.mounted().is_empty());
        assert!(f.ctx.chroot_dir(HOST).exists());
        assert_eq!(f.manager.state(HOST).await, ChrootState::Uninitialized);
    }

    #[tokio::test]
    async fn test_list_reports_trees() {
        let f = fixture();
        let lease = f.manager.acquire(HOST).await.unwrap();
        let infos = f.manager.list();
        assert_eq!(infos.len(), 1);
        assert!(infos[0].mounted);
        assert!(infos[0].locked);
        drop(lease);
        assert!(!f.manager.list()[0].locked);
    }
}
