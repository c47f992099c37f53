//! Build plan
//!
//! The plan is computed once per invocation, before any chroot is touched:
//! resolution, rebuild decisions and strategies for every target, in build
//! order. Only job states change afterwards, and those live in the
//! scheduler.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::core::context::RunContext;
use crate::core::graph::PackageGraph;
use crate::core::rebuild::{ArtifactLookup, RebuildDecision, RebuildEngine};
use crate::core::resolver::{BuildTarget, Resolver};
use crate::core::strategy::{select_strategy, BuildStrategy, ToolchainProbe};
use crate::error::{ForgerootError, StrategyError};

/// Build job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobState {
    /// Whether the job will not change state again in this run
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        })
    }
}

/// One target of the plan
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub target: BuildTarget,
    /// Named directly in the request
    pub requested: bool,
    pub version: String,
    /// Directory holding the package definition
    pub recipe_dir: PathBuf,
    pub decision: RebuildDecision,
    /// Only computed for targets that are built
    pub strategy: Option<Result<BuildStrategy, StrategyError>>,
    /// Plan indices of build-time dependencies
    pub build_deps: Vec<usize>,
    /// Plan indices of runtime dependencies
    pub run_deps: Vec<usize>,
}

impl BuildJob {
    /// Every in-plan dependency index
    pub fn deps(&self) -> impl Iterator<Item = usize> + '_ {
        self.build_deps.iter().chain(&self.run_deps).copied()
    }
}

/// Ordered, immutable sequence of build jobs
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    jobs: Vec<BuildJob>,
}

impl BuildPlan {
    /// Resolve, decide and select strategies for `requested`
    ///
    /// Resolution errors abort here, before any side effect.
    pub fn create<S: AsRef<str>>(
        ctx: &RunContext,
        graph: &PackageGraph,
        requested: &[S],
        artifacts: &impl ArtifactLookup,
        probe: &dyn ToolchainProbe,
    ) -> Result<Self, ForgerootError> {
        let resolution = Resolver::new(graph, ctx.host).resolve(requested, ctx.target)?;
        let decisions = RebuildEngine::new(ctx.rebuild_mode).decide_all(graph, &resolution, artifacts)?;

        let index: HashMap<&BuildTarget, usize> = resolution
            .targets
            .iter()
            .enumerate()
            .map(|(i, t)| (&t.target, i))
            .collect();
        let indices = |deps: &[BuildTarget]| -> Vec<usize> {
            deps.iter().filter_map(|d| index.get(d).copied()).collect()
        };

        let mut jobs = Vec::with_capacity(resolution.targets.len());
        for (resolved, decision) in resolution.targets.iter().zip(decisions) {
            let target = &resolved.target;
            let package = graph
                .get(&target.package)
                .ok_or_else(|| crate::error::PackageError::NotFound {
                    name: target.package.clone(),
                })?;

            let strategy = decision
                .decision
                .is_build()
                .then(|| select_strategy(package, target, ctx.host, ctx.strategy_mode, probe));

            jobs.push(BuildJob {
                target: target.clone(),
                requested: resolution.requested.contains(target),
                version: package.version.clone(),
                recipe_dir: package
                    .origin
                    .parent()
                    .map(PathBuf::from)
                    .unwrap_or_default(),
                decision,
                strategy,
                build_deps: indices(&resolved.build_deps),
                run_deps: indices(&resolved.run_deps),
            });
        }

        let plan = Self { jobs };
        tracing::info!(
            "Build plan: {} target(s), {} to build",
            plan.len(),
            plan.build_count()
        );
        Ok(plan)
    }

    /// Jobs in build order
    pub fn jobs(&self) -> &[BuildJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of jobs decided BUILD
    pub fn build_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.decision.decision.is_build())
            .count()
    }

    /// Plan index of a target
    pub fn index_of(&self, target: &BuildTarget) -> Option<usize> {
        self.jobs.iter().position(|j| &j.target == target)
    }

    /// Jobs whose pkgrel is auto-bumped, with the new value
    pub fn auto_bumps(&self) -> impl Iterator<Item = (&BuildJob, u32)> {
        self.jobs
            .iter()
            .filter_map(|j| j.decision.auto_bump.map(|pkgrel| (j, pkgrel)))
    }
}
