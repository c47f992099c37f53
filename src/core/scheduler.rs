//! Build scheduler
//!
//! Walks the plan in order and dispatches ready jobs onto a bounded set of
//! tasks. A job is ready once every in-plan dependency is terminal; a
//! failed or blocked dependency skips it instead. Jobs sharing a chroot
//! serialize on the chroot lease, independent arches run side by side.
//!
//! Cancellation stops dispatch at once. Running builds are killed by the
//! executor and, like every job never started, stay queued.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::defaults::{CHROOT_APORTS_DIR, CHROOT_PACKAGES_DIR};
use crate::core::arch::Arch;
use crate::core::build_env::BuildEnvironment;
use crate::core::context::RunContext;
use crate::core::plan::{BuildJob, BuildPlan, JobState};
use crate::core::rebuild::ArtifactRecord;
use crate::core::report::{BuildReport, Outcome, TargetReport};
use crate::core::resolver::BuildTarget;
use crate::core::strategy::BuildStrategy;
use crate::error::{BuildExecutionError, ChrootError};
use crate::infra::artifacts::ArtifactStore;
use crate::infra::chroot::ChrootManager;
use crate::infra::executor::{BuildExecutor, BuildRequest};

/// Progress notification for observers (progress bars, logs)
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started { target: BuildTarget, strategy: BuildStrategy },
    Finished { target: BuildTarget, outcome: Outcome },
}

/// Callback receiving [`JobEvent`]s
pub type JobObserver = Arc<dyn Fn(&JobEvent) + Send + Sync>;

enum JobResult {
    Succeeded { pkgrel: u32, log: PathBuf },
    Failed { reason: String },
    ChrootFailed { arch: Arch, error: ChrootError },
    Interrupted,
}

/// Shared pieces handed to every job task
#[derive(Clone)]
struct Workers {
    ctx: Arc<RunContext>,
    chroots: Arc<ChrootManager>,
    executor: Arc<dyn BuildExecutor>,
    artifacts: Arc<ArtifactStore>,
}

/// Per-run bookkeeping
struct RunState {
    states: Vec<JobState>,
    outcomes: Vec<Option<Outcome>>,
    started: Vec<Option<Instant>>,
    durations: Vec<Option<u64>>,
    aborted: Option<String>,
    cancelled: bool,
}

/// Drives a build plan to completion
pub struct Scheduler {
    workers: Workers,
    observer: Option<JobObserver>,
}

impl Scheduler {
    /// Create a scheduler
    pub fn new(
        ctx: Arc<RunContext>,
        chroots: Arc<ChrootManager>,
        executor: Arc<dyn BuildExecutor>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            workers: Workers {
                ctx,
                chroots,
                executor,
                artifacts,
            },
            observer: None,
        }
    }

    /// Receive job events
    #[must_use]
    pub fn with_observer(mut self, observer: JobObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn notify(&self, event: JobEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    /// Run every job of `plan`
    pub async fn run(&self, plan: &BuildPlan, cancel: CancellationToken) -> BuildReport {
        let n = plan.len();
        let mut run = RunState {
            states: vec![JobState::Queued; n],
            outcomes: vec![None; n],
            started: vec![None; n],
            durations: vec![None; n],
            aborted: None,
            cancelled: false,
        };
        let mut running: JoinSet<(usize, JobResult)> = JoinSet::new();

        loop {
            if cancel.is_cancelled() && !run.cancelled {
                run.cancelled = true;
                tracing::warn!("Run cancelled, no further jobs are dispatched");
            }
            if !run.cancelled && run.aborted.is_none() {
                self.dispatch(plan, &mut run, &mut running, &cancel);
            }
            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(Ok((index, result))) => self.complete(plan, &mut run, index, result),
                    Some(Err(e)) => tracing::error!("Build task failed: {e}"),
                    None => {}
                },
                () = cancel.cancelled(), if !run.cancelled => {
                    run.cancelled = true;
                    tracing::warn!("Run cancelled, waiting for running builds to stop");
                }
            }
        }

        if run.aborted.is_some() {
            self.block_dependents(plan, &mut run);
            if let Err(e) = self.workers.chroots.destroy(self.workers.ctx.host).await {
                tracing::warn!("Failed to destroy native chroot after setup failure: {e}");
            }
        }

        self.report(plan, run)
    }

    fn dispatch(
        &self,
        plan: &BuildPlan,
        run: &mut RunState,
        running: &mut JoinSet<(usize, JobResult)>,
        cancel: &CancellationToken,
    ) {
        for (index, job) in plan.jobs().iter().enumerate() {
            if run.states[index] != JobState::Queued {
                continue;
            }

            if let Some(by) = blocked_by(plan, run, job) {
                tracing::warn!("{}: SKIPPED (blocked-by: {by})", job.target);
                self.finish(run, index, job, JobState::Skipped, Outcome::Blocked { by });
                continue;
            }
            if job
                .deps()
                .any(|dep| matches!(run.states[dep], JobState::Queued | JobState::Running))
            {
                continue;
            }

            if !job.decision.decision.is_build() {
                self.finish(run, index, job, JobState::Skipped, Outcome::UpToDate);
                continue;
            }

            let strategy = match &job.strategy {
                Some(Ok(strategy)) => *strategy,
                Some(Err(e)) => {
                    tracing::error!("{}: FAILED ({e})", job.target);
                    let reason = e.to_string();
                    self.finish(run, index, job, JobState::Failed, Outcome::Failed { reason });
                    continue;
                }
                None => {
                    let reason = "no build strategy".to_string();
                    self.finish(run, index, job, JobState::Failed, Outcome::Failed { reason });
                    continue;
                }
            };

            if running.len() >= self.workers.ctx.max_jobs {
                continue;
            }

            tracing::info!("{}: building ({strategy})", job.target);
            run.states[index] = JobState::Running;
            run.started[index] = Some(Instant::now());
            self.notify(JobEvent::Started {
                target: job.target.clone(),
                strategy,
            });

            let workers = self.workers.clone();
            let job = job.clone();
            let cancel = cancel.clone();
            running.spawn(async move {
                let result = workers.run_job(&job, strategy, &cancel).await;
                (index, result)
            });
        }
    }

    /// Mark queued jobs below a failed or blocked job as blocked
    ///
    /// Used once dispatching has stopped early. Plan order is topological,
    /// so one pass reaches every transitive dependent; jobs without a failed
    /// ancestor stay queued.
    fn block_dependents(&self, plan: &BuildPlan, run: &mut RunState) {
        for (index, job) in plan.jobs().iter().enumerate() {
            if run.states[index] != JobState::Queued {
                continue;
            }
            if let Some(by) = blocked_by(plan, run, job) {
                tracing::warn!("{}: SKIPPED (blocked-by: {by})", job.target);
                self.finish(run, index, job, JobState::Skipped, Outcome::Blocked { by });
            }
        }
    }

    fn complete(&self, plan: &BuildPlan, run: &mut RunState, index: usize, result: JobResult) {
        let job = &plan.jobs()[index];
        run.durations[index] = run.started[index].map(|s| u64::try_from(s.elapsed().as_millis()).unwrap_or(u64::MAX));

        match result {
            JobResult::Succeeded { pkgrel, log } => {
                tracing::info!("{}: SUCCEEDED (pkgrel {pkgrel})", job.target);
                self.finish(run, index, job, JobState::Succeeded, Outcome::Succeeded { pkgrel, log });
            }
            JobResult::Failed { reason } => {
                tracing::error!("{}: FAILED ({reason})", job.target);
                self.finish(run, index, job, JobState::Failed, Outcome::Failed { reason });
            }
            JobResult::ChrootFailed { arch, error } => {
                let reason = error.to_string();
                tracing::error!("{}: FAILED ({reason})", job.target);
                if arch == self.workers.ctx.host && run.aborted.is_none() {
                    tracing::error!("Native chroot unusable, stopping the run");
                    run.aborted = Some(reason.clone());
                }
                self.finish(run, index, job, JobState::Failed, Outcome::Failed { reason });
            }
            JobResult::Interrupted => {
                tracing::warn!("{}: interrupted", job.target);
                run.states[index] = JobState::Queued;
                run.outcomes[index] = Some(Outcome::Interrupted);
            }
        }
    }

    fn finish(&self, run: &mut RunState, index: usize, job: &BuildJob, state: JobState, outcome: Outcome) {
        run.states[index] = state;
        self.notify(JobEvent::Finished {
            target: job.target.clone(),
            outcome: outcome.clone(),
        });
        run.outcomes[index] = Some(outcome);
    }

    fn report(&self, plan: &BuildPlan, run: RunState) -> BuildReport {
        let targets = plan
            .jobs()
            .iter()
            .zip(run.states)
            .zip(run.outcomes)
            .zip(run.durations)
            .map(|(((job, state), outcome), duration_ms)| {
                let outcome = match (state, outcome) {
                    // A task that vanished without reporting
                    (JobState::Running, _) => Outcome::Failed {
                        reason: "build task aborted".to_string(),
                    },
                    (_, Some(outcome)) => outcome,
                    (_, None) => Outcome::Interrupted,
                };
                TargetReport {
                    target: job.target.clone(),
                    requested: job.requested,
                    strategy: job.strategy.as_ref().and_then(|s| s.as_ref().ok().copied()),
                    outcome,
                    duration_ms,
                }
            })
            .collect();

        BuildReport {
            targets,
            aborted: run.aborted,
            cancelled: run.cancelled,
        }
    }
}

impl Workers {
    async fn run_job(&self, job: &BuildJob, strategy: BuildStrategy, cancel: &CancellationToken) -> JobResult {
        let ctx = &self.ctx;
        let arch = job.target.arch;
        let chroot_arch = strategy.chroot_arch(arch, ctx.host);

        let lease = tokio::select! {
            lease = self.chroots.acquire(chroot_arch) => match lease {
                Ok(lease) => lease,
                Err(error) => return JobResult::ChrootFailed { arch: chroot_arch, error },
            },
            () = cancel.cancelled() => return JobResult::Interrupted,
        };

        let pkgrel = job.decision.effective_pkgrel;
        let srcdir = chroot_recipe_dir(&job.recipe_dir, &ctx.aports_dir);
        let pkgdest = Path::new("/").join(CHROOT_PACKAGES_DIR).join(arch.as_str());
        let env = BuildEnvironment::new(arch, ctx.host, strategy, srcdir.clone(), pkgdest)
            .with_jobs(ctx.build_jobs)
            .with_pkgrel(pkgrel);

        let request = BuildRequest {
            target: job.target.clone(),
            version: job.version.clone(),
            pkgrel,
            strategy,
            chroot_root: lease.root().to_path_buf(),
            workdir: srcdir,
            command: ctx.build_command.clone(),
            env: env.to_env_map(),
            log_path: ctx.log_path(&job.target.package, arch),
            timeout: ctx.build_timeout,
        };

        let executor = self.executor.clone();
        let token = cancel.clone();
        let result = tokio::task::spawn_blocking(move || executor.execute(&request, &token)).await;
        self.chroots.release(lease);

        match result {
            Ok(Ok(output)) => {
                let record = ArtifactRecord {
                    version: job.version.clone(),
                    pkgrel,
                    fingerprint: job.decision.fingerprint.clone(),
                    location: ctx.arch_packages_dir(arch),
                };
                match self.artifacts.record(&job.target, record).await {
                    Ok(()) => JobResult::Succeeded {
                        pkgrel,
                        log: output.log_path,
                    },
                    Err(e) => JobResult::Failed { reason: e.to_string() },
                }
            }
            Ok(Err(BuildExecutionError::Cancelled { .. })) => JobResult::Interrupted,
            Ok(Err(e)) => JobResult::Failed { reason: e.to_string() },
            Err(e) => JobResult::Failed {
                reason: format!("build worker failed: {e}"),
            },
        }
    }
}

/// Location of a package definition directory inside the chroot
/// Root cause blocking `job`: its first failed or blocked dependency
fn blocked_by(plan: &BuildPlan, run: &RunState, job: &BuildJob) -> Option<String> {
    job.deps().find_map(|dep| match (run.states[dep], &run.outcomes[dep]) {
        (JobState::Failed, _) => Some(plan.jobs()[dep].target.to_string()),
        (JobState::Skipped, Some(Outcome::Blocked { by })) => Some(by.clone()),
        _ => None,
    })
}

fn chroot_recipe_dir(recipe_dir: &Path, aports_dir: &Path) -> PathBuf {
    let relative = recipe_dir.strip_prefix(aports_dir).unwrap_or(recipe_dir);
    let relative = relative.strip_prefix("/").unwrap_or(relative);
    Path::new("/").join(CHROOT_APORTS_DIR).join(relative)
}
