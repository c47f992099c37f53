//! Package graph store
//!
//! Holds every validated [`Package`] of a run, in declaration order, with
//! an index of which packages provide which names. Read-only once built.

use std::collections::HashMap;

use crate::core::package::Package;
use crate::error::PackageError;

/// Dependency graph for packages
#[derive(Debug, Default, Clone)]
pub struct PackageGraph {
    /// Packages in declaration order
    packages: Vec<Package>,
    /// Package name -> index
    by_name: HashMap<String, usize>,
    /// Provided name -> indices of providing packages
    providers: HashMap<String, Vec<usize>>,
}

impl PackageGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from packages, rejecting duplicate names
    pub fn from_packages(packages: impl IntoIterator<Item = Package>) -> Result<Self, PackageError> {
        let mut graph = Self::new();
        for package in packages {
            graph.add_package(package)?;
        }
        Ok(graph)
    }

    /// Add a package to the graph
    pub fn add_package(&mut self, package: Package) -> Result<(), PackageError> {
        if let Some(&existing) = self.by_name.get(&package.name) {
            return Err(PackageError::Duplicate {
                name: package.name.clone(),
                first: self.packages[existing].origin.clone(),
                second: package.origin,
            });
        }

        let index = self.packages.len();
        self.by_name.insert(package.name.clone(), index);
        for provide in &package.provides {
            self.providers
                .entry(provide.name.clone())
                .or_default()
                .push(index);
        }
        self.packages.push(package);
        Ok(())
    }

    /// Look up a package by its own name
    pub fn get(&self, name: &str) -> Option<&Package> {
        self.by_name.get(name).map(|&i| &self.packages[i])
    }

    /// Declaration index of a package
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// All packages in declaration order
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// Number of packages
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the graph is empty
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Candidates that satisfy `name`, most preferred first
    ///
    /// The package literally called `name` comes first. Packages providing
    /// `name` follow, by descending provider priority, then declaration order.
    pub fn providers_of(&self, name: &str) -> Vec<&Package> {
        let mut candidates: Vec<&Package> = Vec::new();
        if let Some(pkg) = self.get(name) {
            candidates.push(pkg);
        }

        if let Some(indices) = self.providers.get(name) {
            let mut providing: Vec<usize> = indices
                .iter()
                .copied()
                .filter(|&i| self.packages[i].name != name)
                .collect();
            providing.sort_by(|&a, &b| {
                self.packages[b]
                    .provider_priority
                    .cmp(&self.packages[a].provider_priority)
                    .then(a.cmp(&b))
            });
            candidates.extend(providing.into_iter().map(|i| &self.packages[i]));
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::package::PackageBuilder;

    fn pkg(builder: PackageBuilder) -> Package {
        builder.build().unwrap()
    }

    #[test]
    fn test_duplicate_package_rejected() {
        let result = PackageGraph::from_packages([
            pkg(PackageBuilder::new("a")),
            pkg(PackageBuilder::new("a")),
        ]);
        assert!(matches!(result, Err(PackageError::Duplicate { .. })));
    }

    #[test]
    fn test_exact_name_preferred_over_provides() {
        let graph = PackageGraph::from_packages([
            pkg(PackageBuilder::new("alt-sh").provides(&["sh"]).provider_priority(100)),
            pkg(PackageBuilder::new("sh")),
        ])
        .unwrap();

        let names: Vec<_> = graph.providers_of("sh").iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["sh", "alt-sh"]);
    }

    #[test]
    fn test_providers_sorted_by_priority_then_declaration() {
        let graph = PackageGraph::from_packages([
            pkg(PackageBuilder::new("busybox-sh").provides(&["cmd:sh"])),
            pkg(PackageBuilder::new("dash").provides(&["cmd:sh"]).provider_priority(10)),
            pkg(PackageBuilder::new("bash").provides(&["cmd:sh"])),
        ])
        .unwrap();

        let names: Vec<_> = graph
            .providers_of("cmd:sh")
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, ["dash", "busybox-sh", "bash"]);
    }

    #[test]
    fn test_unknown_name_has_no_providers() {
        let graph = PackageGraph::from_packages([pkg(PackageBuilder::new("a"))]).unwrap();
        assert!(graph.providers_of("nothing").is_empty());
        assert_eq!(graph.index_of("a"), Some(0));
        assert_eq!(graph.len(), 1);
    }
}
