//! Rebuild decisions
//!
//! Decides, per build target, whether it has to be built in this run and
//! why. Decisions are made in build order so that the fact "this dependency
//! is being rebuilt" can flow forward to its dependents.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::core::graph::PackageGraph;
use crate::core::package::Package;
use crate::core::resolver::{BuildTarget, Resolution};
use crate::error::PackageError;

/// Rebuild mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildMode {
    /// Build only what is stale
    #[default]
    Normal,
    /// Build everything
    Force,
}

/// Persisted record of the last successful build of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub version: String,
    pub pkgrel: u32,
    pub fingerprint: String,
    pub location: PathBuf,
}

/// Read access to previously recorded artifacts
pub trait ArtifactLookup {
    /// Record for `target`, if it was ever built
    fn lookup(&self, target: &BuildTarget) -> Option<ArtifactRecord>;
}

impl ArtifactLookup for HashMap<BuildTarget, ArtifactRecord> {
    fn lookup(&self, target: &BuildTarget) -> Option<ArtifactRecord> {
        self.get(target).cloned()
    }
}

/// Why a target is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BuildReason {
    /// `--force`
    Forced,
    /// Never built before
    NoArtifact,
    /// Declared pkgrel exceeds the recorded one
    PkgrelIncreased { recorded: u32, declared: u32 },
    /// A build-time dependency is rebuilt in this run
    DependencyRebuilt { dependency: String },
    /// Build inputs changed
    FingerprintChanged,
}

impl fmt::Display for BuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => f.write_str("forced"),
            Self::NoArtifact => f.write_str("no previous artifact"),
            Self::PkgrelIncreased { recorded, declared } => {
                write!(f, "pkgrel increased ({recorded} -> {declared})")
            }
            Self::DependencyRebuilt { dependency } => {
                write!(f, "dependency '{dependency}' rebuilt")
            }
            Self::FingerprintChanged => f.write_str("build inputs changed"),
        }
    }
}

/// BUILD or SKIP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    Build(BuildReason),
    Skip,
}

impl Decision {
    /// Whether the target is built
    pub fn is_build(&self) -> bool {
        matches!(self, Self::Build(_))
    }
}

/// Full decision for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildDecision {
    pub target: BuildTarget,
    pub decision: Decision,
    /// Fingerprint of the current build inputs
    pub fingerprint: String,
    /// pkgrel the new artifact is built with (or the recorded one on skip)
    pub effective_pkgrel: u32,
    /// Set when the pkgrel was raised because a dependency is rebuilt
    pub auto_bump: Option<u32>,
}

/// Fingerprint of a target's build inputs
///
/// Covers name, version, arch, source checksums and the fingerprints of the
/// build-time dependencies. The pkgrel is not part of it.
pub fn fingerprint(package: &Package, target: &BuildTarget, dependencies: &[(&BuildTarget, &str)]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("name={}\n", package.name));
    hasher.update(format!("version={}\n", package.version));
    hasher.update(format!("arch={}\n", target.arch));
    for (file, sum) in &package.checksums {
        hasher.update(format!("source:{file}={sum}\n"));
    }

    let mut deps: Vec<_> = dependencies.iter().map(|(t, fp)| (t.key(), *fp)).collect();
    deps.sort();
    for (key, fp) in deps {
        hasher.update(format!("dep:{key}={fp}\n"));
    }
    hex::encode(hasher.finalize())
}

/// Rebuild decision engine
#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildEngine {
    mode: RebuildMode,
}

impl RebuildEngine {
    /// Create an engine for `mode`
    pub fn new(mode: RebuildMode) -> Self {
        Self { mode }
    }

    /// Decide a single target
    ///
    /// `rebuilt_dependency` is the first build-time dependency already
    /// decided BUILD in this run, if any.
    pub fn decide(
        &self,
        package: &Package,
        target: &BuildTarget,
        record: Option<&ArtifactRecord>,
        fingerprint: String,
        rebuilt_dependency: Option<&BuildTarget>,
    ) -> Result<RebuildDecision, PackageError> {
        let declared = package.pkgrel;
        let mut auto_bump = None;

        let (decision, effective_pkgrel) = match (self.mode, record) {
            (RebuildMode::Force, record) => {
                let recorded = record.map_or(declared, |r| r.pkgrel);
                (Decision::Build(BuildReason::Forced), declared.max(recorded))
            }
            (RebuildMode::Normal, None) => (Decision::Build(BuildReason::NoArtifact), declared),
            (RebuildMode::Normal, Some(record)) => {
                let recorded = record.pkgrel;
                let decision = if declared > recorded {
                    Decision::Build(BuildReason::PkgrelIncreased { recorded, declared })
                } else if let Some(dep) = rebuilt_dependency {
                    Decision::Build(BuildReason::DependencyRebuilt {
                        dependency: dep.package.clone(),
                    })
                } else if record.fingerprint != fingerprint {
                    Decision::Build(BuildReason::FingerprintChanged)
                } else {
                    Decision::Skip
                };

                // A manual bump at or above the required value wins
                let required = recorded.checked_add(1).ok_or_else(|| PackageError::PkgrelOverflow {
                    package: package.name.clone(),
                    pkgrel: recorded,
                })?;
                if rebuilt_dependency.is_some() && declared < required {
                    auto_bump = Some(required);
                    (decision, required)
                } else {
                    (decision, declared.max(recorded))
                }
            }
        };

        match &decision {
            Decision::Build(reason) => tracing::info!("{target}: BUILD ({reason})"),
            Decision::Skip => tracing::debug!("{target}: SKIP (up-to-date)"),
        }
        if let Some(pkgrel) = auto_bump {
            tracing::info!("{target}: pkgrel auto-bumped {declared} -> {pkgrel}");
        }

        Ok(RebuildDecision {
            target: target.clone(),
            decision,
            fingerprint,
            effective_pkgrel,
            auto_bump,
        })
    }

    /// Decide every target of a resolution, in build order
    pub fn decide_all(
        &self,
        graph: &PackageGraph,
        resolution: &Resolution,
        artifacts: &impl ArtifactLookup,
    ) -> Result<Vec<RebuildDecision>, PackageError> {
        let mut decided: HashMap<&BuildTarget, usize> = HashMap::new();
        let mut decisions: Vec<RebuildDecision> = Vec::with_capacity(resolution.targets.len());

        for resolved in &resolution.targets {
            let target = &resolved.target;
            let package = graph
                .get(&target.package)
                .ok_or_else(|| PackageError::NotFound {
                    name: target.package.clone(),
                })?;

            let deps: Vec<&RebuildDecision> = resolved
                .build_deps
                .iter()
                .filter_map(|dep| decided.get(dep).map(|&i| &decisions[i]))
                .collect();
            let dep_fingerprints: Vec<(&BuildTarget, &str)> = deps
                .iter()
                .map(|d| (&d.target, d.fingerprint.as_str()))
                .collect();
            let fp = fingerprint(package, target, &dep_fingerprints);
            let rebuilt = deps
                .iter()
                .find(|d| d.decision.is_build())
                .map(|d| d.target.clone());

            let record = artifacts.lookup(target);
            let decision = self.decide(package, target, record.as_ref(), fp, rebuilt.as_ref())?;
            decided.insert(target, decisions.len());
            decisions.push(decision);
        }

        Ok(decisions)
    }
}
