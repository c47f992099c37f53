//! Build command implementation
//!
//! Implements `forgeroot build`: load the package definitions, plan the run
//! and drive the scheduler over the chroots.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::Session;
use crate::cli::output::{self, OutputConfig};
use crate::core::arch::Arch;
use crate::core::plan::BuildPlan;
use crate::core::rebuild::RebuildMode;
use crate::core::scheduler::{JobEvent, Scheduler};
use crate::core::strategy::StrategyMode;
use crate::infra::artifacts::ArtifactStore;
use crate::infra::chroot::ChrootManager;
use crate::infra::executor::ChrootExecutor;
use crate::infra::mounts::SystemMounts;
use crate::infra::recipes;
use crate::infra::toolchain::SystemToolchainProbe;

/// Build options
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Requested packages
    pub packages: Vec<String>,
    /// Target architecture
    pub arch: Option<Arch>,
    /// Rebuild regardless of artifact state
    pub force: bool,
    /// Disallow emulation
    pub strict: bool,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
    /// Only print the plan
    pub dry_run: bool,
}

/// Execute the build command
pub async fn execute(session: &Session, options: BuildOptions, output: &OutputConfig) -> Result<i32> {
    let mut ctx = session.context(options.arch);
    if options.force {
        ctx = ctx.with_rebuild_mode(RebuildMode::Force);
    }
    if options.strict {
        ctx = ctx.with_strategy_mode(StrategyMode::Strict);
    }
    if let Some(jobs) = options.jobs {
        ctx = ctx.with_max_jobs(jobs);
    }
    tracing::info!("Building {} for {} on {}", options.packages.join(", "), ctx.target, ctx.host);

    let graph = recipes::load_graph(&ctx.aports_dir).context("Failed to load package definitions")?;
    let artifacts = ArtifactStore::open(&ctx.artifact_index_path()).context("Failed to open artifact index")?;
    let records = artifacts.records().await;
    let probe = SystemToolchainProbe::new();

    let plan = BuildPlan::create(&ctx, &graph, &options.packages, &records, &probe)
        .context("Failed to plan build")?;

    if options.dry_run {
        output::print_plan(&plan, output)?;
        return Ok(0);
    }

    for (job, pkgrel) in plan.auto_bumps() {
        tracing::info!("{}: building with auto-bumped pkgrel {pkgrel}", job.target);
    }

    let ctx = Arc::new(ctx);
    let chroots = Arc::new(ChrootManager::new(ctx.clone(), Arc::new(SystemMounts::new())));

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping builds");
            token.cancel();
        }
    });

    let mut scheduler = Scheduler::new(
        ctx.clone(),
        chroots.clone(),
        Arc::new(ChrootExecutor::new()),
        Arc::new(artifacts),
    );
    let bar = output.show_progress().then(|| output::create_build_bar(plan.len() as u64));
    if let Some(bar) = &bar {
        let bar = bar.clone();
        scheduler = scheduler.with_observer(Arc::new(move |event: &JobEvent| match event {
            JobEvent::Started { target, strategy } => bar.set_message(format!("{target} ({strategy})")),
            JobEvent::Finished { .. } => bar.inc(1),
        }));
    }

    let report = scheduler.run(&plan, cancel).await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if let Err(e) = chroots.finish().await {
        tracing::warn!("Chroot cleanup failed: {e}");
    }

    output::print_report(&report, output)?;
    Ok(report.exit_code())
}
