//! pkgrel bump planning
//!
//! Computes which package definitions need a new pkgrel, either for
//! explicitly named packages or for every package whose build dependencies
//! would be rebuilt, and the version bumps of `pkgver-bump`. Writing the
//! new values is left to the caller.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::arch::Arch;
use crate::core::graph::PackageGraph;
use crate::core::package::Package;
use crate::core::rebuild::{ArtifactLookup, RebuildEngine, RebuildMode};
use crate::core::resolver::Resolver;
use crate::core::version;
use crate::error::{ForgerootError, PackageError};

/// One pending pkgrel change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PkgrelBump {
    pub package: String,
    /// Definition file to rewrite
    pub path: PathBuf,
    pub from: u32,
    pub to: u32,
}

/// One pending version change; the pkgrel restarts at 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PkgverBump {
    pub package: String,
    /// Definition file to rewrite
    pub path: PathBuf,
    pub from: String,
    pub to: String,
}

/// Look up each named package once, in the given order
fn named_packages<'g, S: AsRef<str>>(graph: &'g PackageGraph, names: &[S]) -> Result<Vec<&'g Package>, PackageError> {
    let mut packages: Vec<&Package> = Vec::new();
    for name in names {
        let name = name.as_ref();
        let package = graph.get(name).ok_or_else(|| PackageError::NotFound {
            name: name.to_string(),
        })?;
        if !packages.iter().any(|p| p.name == package.name) {
            packages.push(package);
        }
    }
    Ok(packages)
}

/// Bump each named package by one
pub fn plan_manual<S: AsRef<str>>(graph: &PackageGraph, names: &[S]) -> Result<Vec<PkgrelBump>, PackageError> {
    named_packages(graph, names)?
        .into_iter()
        .map(|package| {
            let to = package.pkgrel.checked_add(1).ok_or_else(|| PackageError::PkgrelOverflow {
                package: package.name.clone(),
                pkgrel: package.pkgrel,
            })?;
            Ok(PkgrelBump {
                package: package.name.clone(),
                path: package.origin.clone(),
                from: package.pkgrel,
                to,
            })
        })
        .collect()
}

/// Bump the version of each named package to its next release
///
/// Every package must exist before anything is planned.
pub fn plan_pkgver<S: AsRef<str>>(graph: &PackageGraph, names: &[S]) -> Result<Vec<PkgverBump>, PackageError> {
    named_packages(graph, names)?
        .into_iter()
        .map(|package| {
            let to = version::next_release(&package.version).ok_or_else(|| PackageError::InvalidVersion {
                package: package.name.clone(),
                version: package.version.clone(),
            })?;
            Ok(PkgverBump {
                package: package.name.clone(),
                path: package.origin.clone(),
                from: package.version.clone(),
                to,
            })
        })
        .collect()
}

/// Bump every package flagged for auto-bump when building all of `arch`
///
/// A package resolved for several arches gets the highest required value.
pub fn plan_auto(
    graph: &PackageGraph,
    host: Arch,
    arch: Arch,
    artifacts: &impl ArtifactLookup,
) -> Result<Vec<PkgrelBump>, ForgerootError> {
    let resolution = Resolver::new(graph, host).resolve_all(arch)?;
    let decisions = RebuildEngine::new(RebuildMode::Normal).decide_all(graph, &resolution, artifacts)?;

    let mut required: BTreeMap<&str, u32> = BTreeMap::new();
    for decision in &decisions {
        if let Some(pkgrel) = decision.auto_bump {
            let entry = required.entry(decision.target.package.as_str()).or_default();
            *entry = (*entry).max(pkgrel);
        }
    }

    let bumps = required
        .into_iter()
        .filter_map(|(name, to)| {
            graph.get(name).map(|package| PkgrelBump {
                package: package.name.clone(),
                path: package.origin.clone(),
                from: package.pkgrel,
                to,
            })
        })
        .collect::<Vec<_>>();
    tracing::info!("{} package(s) need a pkgrel bump for {arch}", bumps.len());
    Ok(bumps)
}
