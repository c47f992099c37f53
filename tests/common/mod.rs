//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests: a temporary
//! work/aports tree, package definition fixtures, a scripted build executor
//! and an in-memory mount backend.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use forgeroot::core::arch::Arch;
use forgeroot::core::context::RunContext;
use forgeroot::core::plan::BuildPlan;
use forgeroot::core::report::BuildReport;
use forgeroot::core::resolver::BuildTarget;
use forgeroot::core::scheduler::Scheduler;
use forgeroot::core::strategy::ToolchainProbe;
use forgeroot::error::BuildExecutionError;
use forgeroot::infra::artifacts::ArtifactStore;
use forgeroot::infra::chroot::ChrootManager;
use forgeroot::infra::executor::{BuildExecutor, BuildOutput, BuildRequest};
use forgeroot::infra::mounts::{MountBackend, MountSpec};
use forgeroot::infra::recipes;

/// Host architecture used by every scheduler test
pub const HOST: Arch = Arch::X86_64;

/// A foreign architecture
pub const FOREIGN: Arch = Arch::Aarch64;

/// Test project context
///
/// Creates a temporary directory holding the work directory, the package
/// definitions and a directory of fake qemu emulators.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        let project = Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        };
        project.create_dir("work");
        project.create_dir("aports");
        project.create_dir("emulators");
        project
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn aports_dir(&self) -> PathBuf {
        self.dir.path().join("aports")
    }

    pub fn emulator_dir(&self) -> PathBuf {
        self.dir.path().join("emulators")
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test project
    pub fn create_dir(&self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path).expect("Failed to create directory");
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Write `aports/main/<name>/package.toml`
    ///
    /// `extra` holds additional `[package]` keys; `arch = ["all"]` is added
    /// unless it sets `arch` itself.
    pub fn add_package(&self, name: &str, extra: &str) {
        self.create_file(&format!("aports/main/{name}/package.toml"), &package_toml(name, extra));
    }

    /// Install a fake static emulator for `arch`
    pub fn add_emulator(&self, arch: Arch) {
        self.create_file(&format!("emulators/qemu-{}-static", arch.qemu_name()), "#!/bin/false\n");
    }

    /// Run context for this project
    pub fn context(&self, target: Arch) -> RunContext {
        RunContext::new(HOST, target, self.work_dir(), self.aports_dir())
            .with_lock_poll(Duration::from_millis(10))
            .with_emulator_dir(self.emulator_dir())
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Package definition with version 1.0
pub fn package_toml(name: &str, extra: &str) -> String {
    let arch = if extra.contains("arch =") { "" } else { "arch = [\"all\"]\n" };
    format!("[package]\nname = \"{name}\"\nversion = \"1.0\"\n{arch}{extra}\n")
}

/// Sample package definition TOML for testing
pub const SAMPLE_PACKAGE: &str = r#"
[package]
name = "zlib"
version = "1.3.1"
pkgrel = 2
arch = ["all", "!s390x"]
build_depends = ["musl-dev"]

[source.checksums]
"zlib-1.3.1.tar.gz" = "9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23"
"#;

/// Toolchain probe with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub bool);

impl ToolchainProbe for FixedProbe {
    fn has_cross_toolchain(&self, _host: Arch, _target: Arch) -> bool {
        self.0
    }
}

/// What the fake executor does for a package
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Succeed,
    Fail(i32),
    /// Succeed after a delay, unless cancelled first
    Sleep(Duration),
    /// Run until cancelled
    Hang,
}

/// Build executor following per-package scripts
#[derive(Debug, Default)]
pub struct FakeExecutor {
    scripts: Mutex<HashMap<String, Script>>,
    started: Mutex<Vec<BuildRequest>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, package: &str, script: Script) {
        self.scripts.lock().unwrap().insert(package.to_string(), script);
    }

    /// Requests in the order builds started
    pub fn requests(&self) -> Vec<BuildRequest> {
        self.started.lock().unwrap().clone()
    }

    /// Targets in the order builds started
    pub fn started(&self) -> Vec<BuildTarget> {
        self.requests().into_iter().map(|r| r.target).collect()
    }

    pub fn built(&self, package: &str) -> bool {
        self.started().iter().any(|t| t.package == package)
    }

    /// Highest number of simultaneously running builds
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Sleep for `limit` (forever if `None`); false when cancelled first
    fn wait(cancel: &CancellationToken, limit: Option<Duration>) -> bool {
        let started = Instant::now();
        while limit.map_or(true, |limit| started.elapsed() < limit) {
            if cancel.is_cancelled() {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl BuildExecutor for FakeExecutor {
    fn execute(&self, request: &BuildRequest, cancel: &CancellationToken) -> Result<BuildOutput, BuildExecutionError> {
        self.started.lock().unwrap().push(request.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.target.package)
            .copied()
            .unwrap_or(Script::Succeed);
        let package = request.target.package.clone();

        let result = match script {
            Script::Succeed => Ok(()),
            Script::Fail(code) => Err(BuildExecutionError::NonZeroExit {
                package,
                code,
                log: request.log_path.clone(),
            }),
            Script::Sleep(duration) => {
                if Self::wait(cancel, Some(duration)) {
                    Ok(())
                } else {
                    Err(BuildExecutionError::Cancelled { package })
                }
            }
            Script::Hang => {
                Self::wait(cancel, None);
                Err(BuildExecutionError::Cancelled { package })
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result.map(|()| BuildOutput {
            log_path: request.log_path.clone(),
            duration: Duration::from_millis(1),
        })
    }
}

/// Mount backend keeping mounts in memory
#[derive(Debug, Default)]
pub struct FakeMounts {
    mounted: Mutex<HashSet<PathBuf>>,
    mounts: AtomicUsize,
    fail_on: Mutex<Option<String>>,
    binfmt: Mutex<HashSet<String>>,
}

impl FakeMounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse mounts whose target ends with `component`
    pub fn fail_on(&self, component: &str) {
        *self.fail_on.lock().unwrap() = Some(component.to_string());
    }

    pub fn register_binfmt(&self, arch: Arch) {
        self.binfmt.lock().unwrap().insert(arch.qemu_name().to_string());
    }

    /// Successful mounts so far
    pub fn mount_count(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    /// Mount points currently below `root`
    pub fn mounted_under(&self, root: &Path) -> usize {
        self.mounts_under(root).len()
    }
}

impl MountBackend for FakeMounts {
    fn mount(&self, spec: &MountSpec) -> Result<(), String> {
        if let Some(component) = self.fail_on.lock().unwrap().as_deref() {
            if spec.target.ends_with(component) {
                return Err(format!("mount {} refused", spec.target.display()));
            }
        }
        self.mounted.lock().unwrap().insert(spec.target.clone());
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), String> {
        self.mounted.lock().unwrap().remove(target);
        Ok(())
    }

    fn is_mounted(&self, target: &Path) -> bool {
        self.mounted.lock().unwrap().contains(target)
    }

    fn mounts_under(&self, root: &Path) -> Vec<PathBuf> {
        let mounted = self.mounted.lock().unwrap();
        mounted.iter().filter(|m| m.starts_with(root)).cloned().collect()
    }

    fn binfmt_registered(&self, qemu_name: &str) -> bool {
        self.binfmt.lock().unwrap().contains(qemu_name)
    }
}

/// Everything needed to drive scheduler runs against a test project
pub struct Harness {
    pub project: TestProject,
    pub mounts: Arc<FakeMounts>,
    pub executor: Arc<FakeExecutor>,
    pub probe: FixedProbe,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            project: TestProject::new(),
            mounts: Arc::new(FakeMounts::new()),
            executor: Arc::new(FakeExecutor::new()),
            probe: FixedProbe(false),
        }
    }

    /// Open the project's artifact index
    pub fn artifacts(&self) -> ArtifactStore {
        let ctx = self.project.context(HOST);
        ArtifactStore::open(&ctx.artifact_index_path()).expect("Failed to open artifact index")
    }

    /// Plan a build of `packages`
    pub async fn plan(&self, ctx: &RunContext, packages: &[&str]) -> BuildPlan {
        let graph = recipes::load_graph(&ctx.aports_dir).expect("Failed to load packages");
        let records = self.artifacts().records().await;
        BuildPlan::create(ctx, &graph, packages, &records, &self.probe).expect("Failed to plan")
    }

    /// Chroot manager sharing this harness's mounts
    pub fn chroots(&self, ctx: &Arc<RunContext>) -> Arc<ChrootManager> {
        Arc::new(ChrootManager::new(ctx.clone(), self.mounts.clone()))
    }

    /// Plan and run `packages`
    pub async fn run(&self, ctx: RunContext, packages: &[&str]) -> BuildReport {
        self.run_with(ctx, packages, CancellationToken::new()).await.0
    }

    /// Plan and run `packages` with an external cancellation token
    pub async fn run_with(
        &self,
        ctx: RunContext,
        packages: &[&str],
        cancel: CancellationToken,
    ) -> (BuildReport, Arc<ChrootManager>) {
        let plan = self.plan(&ctx, packages).await;
        let ctx = Arc::new(ctx);
        let chroots = self.chroots(&ctx);
        let executor: Arc<dyn BuildExecutor> = self.executor.clone();
        let scheduler = Scheduler::new(ctx, chroots.clone(), executor, Arc::new(self.artifacts()));
        let report = scheduler.run(&plan, cancel).await;
        (report, chroots)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
