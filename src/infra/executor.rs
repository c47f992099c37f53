//! Build tool execution
//!
//! [`BuildExecutor`] is a blocking call made on a worker thread. The chroot
//! implementation runs the configured build command inside the chroot,
//! writes its output to the job log and kills it on cancellation or timeout.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::resolver::BuildTarget;
use crate::core::strategy::BuildStrategy;
use crate::error::BuildExecutionError;

/// Everything needed to run one build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub target: BuildTarget,
    pub version: String,
    pub pkgrel: u32,
    pub strategy: BuildStrategy,
    /// Root of the leased chroot
    pub chroot_root: PathBuf,
    /// Working directory inside the chroot
    pub workdir: PathBuf,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    /// Host path of the build log
    pub log_path: PathBuf,
    pub timeout: Option<Duration>,
}

/// Result of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub log_path: PathBuf,
    pub duration: Duration,
}

/// Runs builds
pub trait BuildExecutor: Send + Sync {
    /// Run a build to completion, or until `cancel` fires
    fn execute(&self, request: &BuildRequest, cancel: &CancellationToken) -> Result<BuildOutput, BuildExecutionError>;
}

/// Executes builds with `chroot(8)`
#[derive(Debug, Clone)]
pub struct ChrootExecutor {
    poll: Duration,
}

impl Default for ChrootExecutor {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(100),
        }
    }
}

impl ChrootExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full argument vector passed to `chroot`
    pub fn chroot_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            request.chroot_root.display().to_string(),
            "/bin/sh".to_string(),
            "-c".to_string(),
            "cd \"$1\" && shift && exec \"$@\"".to_string(),
            "sh".to_string(),
            request.workdir.display().to_string(),
        ];
        args.extend(request.command.iter().cloned());
        args
    }
}

impl BuildExecutor for ChrootExecutor {
    fn execute(&self, request: &BuildRequest, cancel: &CancellationToken) -> Result<BuildOutput, BuildExecutionError> {
        let package = request.target.package.clone();
        let spawn_error = |error: String| BuildExecutionError::Spawn {
            package: package.clone(),
            error,
        };

        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent).map_err(|e| spawn_error(e.to_string()))?;
        }
        let log = File::create(&request.log_path).map_err(|e| spawn_error(e.to_string()))?;
        let log_err = log.try_clone().map_err(|e| spawn_error(e.to_string()))?;

        tracing::debug!(
            "Running {} in {} for {}",
            request.command.join(" "),
            request.chroot_root.display(),
            request.target
        );
        let started = Instant::now();
        let mut child = Command::new("chroot")
            .args(Self::chroot_args(request))
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    if status.success() {
                        return Ok(BuildOutput {
                            log_path: request.log_path.clone(),
                            duration: started.elapsed(),
                        });
                    }
                    return Err(BuildExecutionError::NonZeroExit {
                        package: request.target.package.clone(),
                        code: status.code().unwrap_or(-1),
                        log: request.log_path.clone(),
                    });
                }
                Ok(None) => {}
                Err(e) => return Err(spawn_error(e.to_string())),
            }

            if cancel.is_cancelled() {
                tracing::warn!("Killing build of {}", request.target);
                let _ = child.kill();
                let _ = child.wait();
                return Err(BuildExecutionError::Cancelled {
                    package: request.target.package.clone(),
                });
            }
            if let Some(timeout) = request.timeout {
                if started.elapsed() >= timeout {
                    tracing::warn!("Build of {} exceeded {}s", request.target, timeout.as_secs());
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(BuildExecutionError::TimedOut {
                        package: request.target.package.clone(),
                        secs: timeout.as_secs(),
                    });
                }
            }
            thread::sleep(self.poll);
        }
    }
}
