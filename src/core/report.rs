//! Build report
//!
//! Every target of the plan ends up in the report with exactly one outcome,
//! whether or not the run completed.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::config::defaults::EXIT_INTERRUPTED;
use crate::core::plan::JobState;
use crate::core::resolver::BuildTarget;
use crate::core::strategy::BuildStrategy;

/// Final outcome of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Built and recorded
    Succeeded { pkgrel: u32, log: PathBuf },
    /// Nothing to do
    UpToDate,
    /// Not attempted because a dependency failed
    Blocked { by: String },
    /// Attempted (or unbuildable) and failed
    Failed { reason: String },
    /// Left queued by cancellation or an aborted run
    Interrupted,
}

impl Outcome {
    /// Job state this outcome corresponds to
    pub fn state(&self) -> JobState {
        match self {
            Self::Succeeded { .. } => JobState::Succeeded,
            Self::UpToDate | Self::Blocked { .. } => JobState::Skipped,
            Self::Failed { .. } => JobState::Failed,
            Self::Interrupted => JobState::Queued,
        }
    }

    /// Whether the outcome counts against the run
    pub fn is_problem(&self) -> bool {
        matches!(self, Self::Blocked { .. } | Self::Failed { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { pkgrel, log } => {
                write!(f, "SUCCEEDED (pkgrel {pkgrel}, log: {})", log.display())
            }
            Self::UpToDate => f.write_str("SKIPPED (up-to-date)"),
            Self::Blocked { by } => write!(f, "SKIPPED (blocked-by: {by})"),
            Self::Failed { reason } => write!(f, "FAILED ({reason})"),
            Self::Interrupted => f.write_str("QUEUED (interrupted)"),
        }
    }
}

/// Report line for one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: BuildTarget,
    pub requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<BuildStrategy>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Result of a scheduler run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub targets: Vec<TargetReport>,
    /// Reason dispatching stopped early (native chroot setup failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    /// Whether the run was cancelled
    pub cancelled: bool,
}

impl BuildReport {
    /// Outcome of `target`
    pub fn outcome(&self, target: &BuildTarget) -> Option<&Outcome> {
        self.targets
            .iter()
            .find(|t| &t.target == target)
            .map(|t| &t.outcome)
    }

    /// Outcome of a package in any architecture (first match)
    pub fn outcome_of(&self, package: &str) -> Option<&Outcome> {
        self.targets
            .iter()
            .find(|t| t.target.package == package)
            .map(|t| &t.outcome)
    }

    /// Count targets whose outcome matches `predicate`
    pub fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.targets.iter().filter(|t| predicate(&t.outcome)).count()
    }

    /// Whether every requested target succeeded or was up to date
    pub fn is_success(&self) -> bool {
        self.targets
            .iter()
            .filter(|t| t.requested)
            .all(|t| matches!(t.outcome, Outcome::Succeeded { .. } | Outcome::UpToDate))
    }

    /// Process exit code: 0 success, 1 failed or blocked, 130 interrupted
    pub fn exit_code(&self) -> i32 {
        if self.cancelled && self.count(|o| *o == Outcome::Interrupted) > 0 {
            return EXIT_INTERRUPTED;
        }
        if self.is_success() {
            0
        } else {
            1
        }
    }
}
