//! Dependency resolution
//!
//! Computes the build order for a request: the closure of build-time and
//! runtime dependencies, as (package, arch) targets with every dependency
//! placed before its dependents. Cycles and unsatisfiable dependencies are
//! reported before anything is built.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::core::arch::Arch;
use crate::core::graph::PackageGraph;
use crate::core::package::{Dependency, Package};
use crate::error::ResolveError;

/// Requester name used for packages named on the command line
pub const REQUEST_ORIGIN: &str = "(requested)";

/// A (package, architecture) pair: the unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildTarget {
    pub package: String,
    pub arch: Arch,
}

impl BuildTarget {
    /// Create a new target
    pub fn new(package: impl Into<String>, arch: Arch) -> Self {
        Self {
            package: package.into(),
            arch,
        }
    }

    /// Stable key used by the artifact index (`name/arch`)
    pub fn key(&self) -> String {
        format!("{}/{}", self.package, self.arch)
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.package, self.arch)
    }
}

/// A target with its resolved dependency edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: BuildTarget,
    /// Build-time dependencies, in declaration order
    pub build_deps: Vec<BuildTarget>,
    /// Runtime dependencies, in declaration order
    pub run_deps: Vec<BuildTarget>,
}

impl ResolvedTarget {
    /// Every dependency edge of this target
    pub fn all_deps(&self) -> impl Iterator<Item = &BuildTarget> {
        self.build_deps.iter().chain(&self.run_deps)
    }
}

/// Resolver output
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Targets in topological order
    pub targets: Vec<ResolvedTarget>,
    /// Targets the request named directly, in request order
    pub requested: Vec<BuildTarget>,
}

impl Resolution {
    /// Build order as plain targets
    pub fn order(&self) -> Vec<BuildTarget> {
        self.targets.iter().map(|t| t.target.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepKind {
    Build,
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current DFS path
    Gray,
    /// Finished, already emitted
    Black,
}

/// Dependency resolver over a package graph
#[derive(Debug)]
pub struct Resolver<'g> {
    graph: &'g PackageGraph,
    host: Arch,
}

struct Walk {
    marks: HashMap<BuildTarget, Mark>,
    path: Vec<BuildTarget>,
    order: Vec<ResolvedTarget>,
}

impl<'g> Resolver<'g> {
    /// Create a resolver; `host` is the architecture of the build machine
    pub fn new(graph: &'g PackageGraph, host: Arch) -> Self {
        Self { graph, host }
    }

    /// Resolve `requested` names for `arch`
    pub fn resolve<S: AsRef<str>>(
        &self,
        requested: &[S],
        arch: Arch,
    ) -> Result<Resolution, ResolveError> {
        let mut walk = Walk {
            marks: HashMap::new(),
            path: Vec::new(),
            order: Vec::new(),
        };
        let mut roots = Vec::new();

        for name in requested {
            let name = name.as_ref();
            let dependency = Dependency::parse(name).ok_or_else(|| ResolveError::MissingProvider {
                requester: REQUEST_ORIGIN.to_string(),
                dependency: name.to_string(),
            })?;
            let target = self.select(REQUEST_ORIGIN, &dependency, arch, DepKind::Runtime, &walk)?;
            self.visit(&target, &mut walk)?;
            if !roots.contains(&target) {
                roots.push(target);
            }
        }

        tracing::debug!(
            "Resolved {} requested package(s) into {} target(s) for {arch}",
            roots.len(),
            walk.order.len()
        );

        Ok(Resolution {
            targets: walk.order,
            requested: roots,
        })
    }

    /// Resolve every package of the graph that supports `arch`
    pub fn resolve_all(&self, arch: Arch) -> Result<Resolution, ResolveError> {
        let names: Vec<&str> = self
            .graph
            .packages()
            .iter()
            .filter(|p| p.supports(arch))
            .map(|p| p.name.as_str())
            .collect();
        self.resolve(&names, arch)
    }

    fn visit(&self, target: &BuildTarget, walk: &mut Walk) -> Result<(), ResolveError> {
        match walk.marks.get(target) {
            Some(Mark::Black) => return Ok(()),
            Some(Mark::Gray) => {
                let start = walk
                    .path
                    .iter()
                    .position(|t| t == target)
                    .unwrap_or_default();
                let mut cycle: Vec<String> = walk.path[start..]
                    .iter()
                    .map(|t| t.package.clone())
                    .collect();
                cycle.push(target.package.clone());
                return Err(ResolveError::Cycle { cycle });
            }
            None => {}
        }

        let package = self
            .graph
            .get(&target.package)
            .ok_or_else(|| ResolveError::MissingProvider {
                requester: REQUEST_ORIGIN.to_string(),
                dependency: target.package.clone(),
            })?;

        walk.marks.insert(target.clone(), Mark::Gray);
        walk.path.push(target.clone());

        let build_deps = self.visit_deps(package, &package.build_depends, target.arch, DepKind::Build, walk)?;
        let run_deps = self.visit_deps(package, &package.depends, target.arch, DepKind::Runtime, walk)?;

        walk.path.pop();
        walk.marks.insert(target.clone(), Mark::Black);
        walk.order.push(ResolvedTarget {
            target: target.clone(),
            build_deps,
            run_deps,
        });

        Ok(())
    }

    fn visit_deps(
        &self,
        package: &Package,
        deps: &[Dependency],
        arch: Arch,
        kind: DepKind,
        walk: &mut Walk,
    ) -> Result<Vec<BuildTarget>, ResolveError> {
        let mut resolved = Vec::with_capacity(deps.len());
        for dep in deps {
            let target = self.select(&package.name, dep, arch, kind, walk)?;
            self.visit(&target, walk)?;
            if !resolved.contains(&target) {
                resolved.push(target);
            }
        }
        Ok(resolved)
    }

    /// Pick the provider (and arch) satisfying `dep` for a requester on `arch`
    fn select(
        &self,
        requester: &str,
        dep: &Dependency,
        arch: Arch,
        kind: DepKind,
        walk: &Walk,
    ) -> Result<BuildTarget, ResolveError> {
        let candidates = self.graph.providers_of(&dep.name);
        if candidates.is_empty() {
            return Err(ResolveError::MissingProvider {
                requester: requester.to_string(),
                dependency: dep.name.clone(),
            });
        }

        let versioned: Vec<&Package> = candidates
            .into_iter()
            .filter(|p| match (&dep.req, p.version_for(&dep.name)) {
                (Some(req), Some(version)) => req.matches(version),
                _ => true,
            })
            .collect();
        if versioned.is_empty() {
            return Err(ResolveError::VersionConflict {
                requester: requester.to_string(),
                dependency: dep.name.clone(),
                constraint: dep.to_string(),
            });
        }

        let for_arch: Vec<BuildTarget> = versioned
            .iter()
            .filter(|p| p.supports(arch))
            .map(|p| self.target_for(p, arch))
            .collect();

        if let Some(preferred) = for_arch.first() {
            if walk.marks.get(preferred) == Some(&Mark::Gray) {
                if let Some(alternate) = for_arch
                    .iter()
                    .find(|t| walk.marks.get(*t) != Some(&Mark::Gray))
                {
                    tracing::info!(
                        "Breaking dependency cycle: '{}' for '{requester}' provided by '{}' instead of '{}'",
                        dep.name,
                        alternate.package,
                        preferred.package
                    );
                    return Ok(alternate.clone());
                }
            }
            if preferred.package != dep.name {
                tracing::debug!("'{}' for '{requester}' provided by '{}'", dep.name, preferred.package);
            }
            return Ok(preferred.clone());
        }

        // Build-time tools may run on the build machine instead
        if kind == DepKind::Build && arch != self.host {
            if let Some(host_pkg) = versioned.iter().find(|p| p.supports(self.host)) {
                tracing::debug!(
                    "Build dependency '{}' of '{requester}' not available for {arch}, using host {}",
                    dep.name,
                    self.host
                );
                return Ok(BuildTarget::new(host_pkg.name.clone(), self.host));
            }
        }

        Err(ResolveError::UnsupportedArch {
            requester: requester.to_string(),
            dependency: dep.name.clone(),
            arch: arch.to_string(),
        })
    }

    fn target_for(&self, package: &Package, arch: Arch) -> BuildTarget {
        // Architecture independent packages are built once, natively
        if package.arch.is_noarch() {
            BuildTarget::new(package.name.clone(), self.host)
        } else {
            BuildTarget::new(package.name.clone(), arch)
        }
    }
}
