//! Build strategy selection
//!
//! Picks how a target is built: natively, under foreign-arch emulation, or
//! cross compiled from the host. Strict mode exists to exercise the cross
//! path used by release pipelines and never falls back to emulation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::arch::Arch;
use crate::core::package::{EmulationSupport, Package};
use crate::core::resolver::BuildTarget;
use crate::error::StrategyError;

/// Strategy selection mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyMode {
    #[default]
    Normal,
    /// Foreign targets must be cross compiled
    Strict,
}

/// How a target is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStrategy {
    Native,
    Emulated,
    Cross,
}

impl BuildStrategy {
    /// Architecture of the chroot the build runs in
    pub fn chroot_arch(self, target: Arch, host: Arch) -> Arch {
        match self {
            Self::Native | Self::Cross => host,
            Self::Emulated => target,
        }
    }
}

impl fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Native => "native",
            Self::Emulated => "emulated",
            Self::Cross => "cross",
        })
    }
}

/// Answers whether cross build tooling exists for an arch pair
pub trait ToolchainProbe: Send + Sync {
    /// Whether a `host` -> `target` cross toolchain is available
    fn has_cross_toolchain(&self, host: Arch, target: Arch) -> bool;
}

/// Select the strategy for `target`
pub fn select_strategy(
    package: &Package,
    target: &BuildTarget,
    host: Arch,
    mode: StrategyMode,
    probe: &dyn ToolchainProbe,
) -> Result<BuildStrategy, StrategyError> {
    let strategy = choose(package, target, host, mode, probe);
    match &strategy {
        Ok(strategy) => tracing::debug!("{target}: strategy {strategy}"),
        Err(e) => tracing::warn!("{target}: {e}"),
    }
    strategy
}

fn choose(
    package: &Package,
    target: &BuildTarget,
    host: Arch,
    mode: StrategyMode,
    probe: &dyn ToolchainProbe,
) -> Result<BuildStrategy, StrategyError> {
    if target.arch == host {
        return Ok(BuildStrategy::Native);
    }

    let cross = || {
        if !package.cross_compile {
            return Err(StrategyError::NotCrossCapable {
                package: package.name.clone(),
                arch: target.arch.to_string(),
            });
        }
        if !probe.has_cross_toolchain(host, target.arch) {
            return Err(StrategyError::NoCrossToolchain {
                host: host.to_string(),
                target: target.arch.to_string(),
            });
        }
        Ok(BuildStrategy::Cross)
    };

    match mode {
        StrategyMode::Strict => cross(),
        StrategyMode::Normal => {
            if package.emulation != EmulationSupport::No {
                Ok(BuildStrategy::Emulated)
            } else if package.cross_compile {
                cross()
            } else {
                Err(StrategyError::NoViableStrategy {
                    package: package.name.clone(),
                    arch: target.arch.to_string(),
                })
            }
        }
    }
}
