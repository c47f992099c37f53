//! Output formatting and progress indicators
//!
//! This module provides utilities for displaying progress bars,
//! status lines and JSON documents to the user.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::core::plan::BuildPlan;
use crate::core::rebuild::Decision;
use crate::core::report::{BuildReport, Outcome};

/// How command output is rendered
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    pub quiet: bool,
    pub json: bool,
    pub verbose: u8,
}

impl OutputConfig {
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self { quiet, json, verbose }
    }

    /// Default tracing directive for the verbosity flags
    pub fn log_directive(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    /// Whether human-readable progress should be drawn
    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.json
    }
}

/// Create a progress bar for build steps
pub fn create_build_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} targets ({msg})")
            .expect("Invalid progress bar template")
            .progress_chars("█▓▒░"),
    );
    pb
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}

fn prefix(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Succeeded { .. } | Outcome::UpToDate => status::SUCCESS,
        Outcome::Failed { .. } => status::ERROR,
        Outcome::Blocked { .. } | Outcome::Interrupted => status::WARNING,
    }
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the plan produced by `build --dry-run`
pub fn print_plan(plan: &BuildPlan, output: &OutputConfig) -> Result<()> {
    if output.json {
        let jobs: Vec<_> = plan
            .jobs()
            .iter()
            .map(|job| {
                serde_json::json!({
                    "target": job.target,
                    "requested": job.requested,
                    "decision": job.decision.decision,
                    "pkgrel": job.decision.effective_pkgrel,
                    "auto_bump": job.decision.auto_bump,
                    "strategy": job.strategy.as_ref().map(|s| match s {
                        Ok(strategy) => strategy.to_string(),
                        Err(e) => format!("error: {e}"),
                    }),
                })
            })
            .collect();
        return print_json(&jobs);
    }

    for (i, job) in plan.jobs().iter().enumerate() {
        let decision = match &job.decision.decision {
            Decision::Build(reason) => format!("BUILD ({reason})"),
            Decision::Skip => "SKIP (up-to-date)".to_string(),
        };
        let strategy = match &job.strategy {
            Some(Ok(strategy)) => strategy.to_string(),
            Some(Err(e)) => format!("unbuildable: {e}"),
            None => "-".to_string(),
        };
        println!(
            "{:>3}. {} {}-r{} {decision} [{strategy}]",
            i + 1,
            job.target,
            job.version,
            job.decision.effective_pkgrel
        );
    }
    if !output.quiet {
        println!();
        println!(
            "{} {} target(s), {} to build",
            status::INFO,
            plan.len(),
            plan.build_count()
        );
    }
    Ok(())
}

/// Print the outcome of a run
pub fn print_report(report: &BuildReport, output: &OutputConfig) -> Result<()> {
    if output.json {
        return print_json(report);
    }

    for line in &report.targets {
        if output.quiet && !line.outcome.is_problem() {
            continue;
        }
        println!("{} {}: {}", prefix(&line.outcome), line.target, line.outcome);
    }
    if let Some(reason) = &report.aborted {
        eprintln!("{} Run aborted: {reason}", status::ERROR);
    }
    if report.cancelled {
        eprintln!("{} Run interrupted", status::WARNING);
    }
    if !output.quiet {
        let built = report.count(|o| matches!(o, Outcome::Succeeded { .. }));
        let failed = report.count(|o| matches!(o, Outcome::Failed { .. }));
        let skipped = report.count(|o| matches!(o, Outcome::UpToDate | Outcome::Blocked { .. }));
        println!();
        println!("{built} built, {skipped} skipped, {failed} failed");
    }
    Ok(())
}

/// Print an error and its causes to stderr
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} Error: {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}
