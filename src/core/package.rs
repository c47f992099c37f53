//! Package definition handling
//!
//! A [`PackageRecord`] is the raw shape read from a `package.toml` file.
//! It is validated exactly once into a [`Package`], so malformed input is
//! reported while the graph loads and never reaches the scheduler.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::core::arch::{Arch, ArchSpec};
use crate::core::version::{self, Op, VersionReq};
use crate::error::PackageError;

/// Raw package definition file (`package.toml`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageRecord {
    /// Package metadata
    pub package: PackageMetadata,

    /// Source configuration
    #[serde(default)]
    pub source: SourceConfig,
}

/// Package metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageMetadata {
    /// Package name
    pub name: String,

    /// Package version (without release number)
    pub version: String,

    /// Package release number
    #[serde(default)]
    pub pkgrel: u32,

    /// Supported architectures (`all`, `noarch`, names, `!name`)
    #[serde(default)]
    pub arch: Vec<String>,

    /// Build dependencies (needed inside the chroot while building)
    #[serde(default)]
    pub build_depends: Vec<String>,

    /// Runtime dependencies
    #[serde(default)]
    pub depends: Vec<String>,

    /// Alternate names this package satisfies (`name` or `name=version`)
    #[serde(default)]
    pub provides: Vec<String>,

    /// Preference among several providers of the same name
    #[serde(default)]
    pub provider_priority: Option<i64>,

    /// Whether the package builds under foreign-arch emulation
    #[serde(default)]
    pub emulation: EmulationSupport,

    /// Whether the package can be cross compiled
    #[serde(default)]
    pub cross_compile: bool,
}

/// Source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Source file name -> checksum
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

/// Emulation compatibility flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmulationSupport {
    Yes,
    No,
    #[default]
    Unknown,
}

/// A parsed dependency entry (`name` or `name<op>version`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub req: Option<VersionReq>,
}

fn dependency_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([^<>=~!\s]+)(?:(>=|<=|=|<|>|~)(\S+))?$").expect("Invalid dependency regex")
    })
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9._+-]*$").expect("Invalid name regex"))
}

impl Dependency {
    /// Parse a dependency string
    pub fn parse(entry: &str) -> Option<Self> {
        let caps = dependency_regex().captures(entry.trim())?;
        let name = caps.get(1)?.as_str().to_string();
        let req = match (caps.get(2), caps.get(3)) {
            (Some(op), Some(version)) => Some(VersionReq::new(
                Op::parse(op.as_str())?,
                version.as_str(),
            )),
            _ => None,
        };
        Some(Self { name, req })
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.req {
            Some(req) => write!(f, "{}{req}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A `provides` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provide {
    pub name: String,
    pub version: Option<String>,
}

/// Validated package, immutable for the rest of the run
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub pkgrel: u32,
    pub arch: ArchSpec,
    pub build_depends: Vec<Dependency>,
    pub depends: Vec<Dependency>,
    pub provides: Vec<Provide>,
    pub provider_priority: i64,
    pub emulation: EmulationSupport,
    pub cross_compile: bool,
    pub checksums: BTreeMap<String, String>,
    /// Definition file this package was loaded from
    pub origin: PathBuf,
}

impl Package {
    /// Validate a raw record
    pub fn from_record(record: PackageRecord, origin: &Path) -> Result<Self, PackageError> {
        let meta = record.package;
        let name = meta.name;

        if !name_regex().is_match(&name) {
            return Err(PackageError::InvalidName { name });
        }
        if !version::is_valid(&meta.version) {
            return Err(PackageError::InvalidVersion {
                package: name,
                version: meta.version,
            });
        }

        if meta.arch.is_empty() {
            return Err(PackageError::EmptyArch { package: name });
        }
        let arch = ArchSpec::parse(&meta.arch).map_err(|arch| PackageError::InvalidArch {
            package: name.clone(),
            arch,
        })?;
        if arch.is_empty() {
            return Err(PackageError::EmptyArch { package: name });
        }

        let provides = meta
            .provides
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((n, v)) => Provide {
                    name: n.trim().to_string(),
                    version: Some(v.trim().to_string()),
                },
                None => Provide {
                    name: entry.trim().to_string(),
                    version: None,
                },
            })
            .collect::<Vec<_>>();

        let build_depends = parse_dependencies(&name, &meta.build_depends)?;
        let depends = parse_dependencies(&name, &meta.depends)?;

        for dep in build_depends.iter().chain(&depends) {
            if dep.name == name || provides.iter().any(|p| p.name == dep.name) {
                return Err(PackageError::SelfDependency {
                    package: name,
                    dependency: dep.name.clone(),
                });
            }
        }

        Ok(Self {
            name,
            version: meta.version,
            pkgrel: meta.pkgrel,
            arch,
            build_depends,
            depends,
            provides,
            provider_priority: meta.provider_priority.unwrap_or(0),
            emulation: meta.emulation,
            cross_compile: meta.cross_compile,
            checksums: record.source.checksums,
            origin: origin.to_path_buf(),
        })
    }

    /// Parse and validate a `package.toml` document
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self, PackageError> {
        let record: PackageRecord =
            toml::from_str(content).map_err(|e| PackageError::ParseError {
                path: origin.to_path_buf(),
                error: e.to_string(),
            })?;
        Self::from_record(record, origin)
    }

    /// Whether the package can be built for `arch`
    pub fn supports(&self, arch: Arch) -> bool {
        self.arch.applies_to(arch)
    }

    /// Version this package offers for `name` (its own, or the provide's)
    pub fn version_for(&self, name: &str) -> Option<&str> {
        if self.name == name {
            return Some(&self.version);
        }
        self.provides
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.version.as_deref().unwrap_or(&self.version))
    }

    /// `name-version-rPKGREL`
    pub fn full_version(&self, pkgrel: u32) -> String {
        format!("{}-{}-r{pkgrel}", self.name, self.version)
    }
}

fn parse_dependencies(package: &str, entries: &[String]) -> Result<Vec<Dependency>, PackageError> {
    entries
        .iter()
        // `!name` entries declare conflicts, they never order builds
        .filter(|entry| !entry.trim_start().starts_with('!'))
        .map(|entry| {
            Dependency::parse(entry).ok_or_else(|| PackageError::InvalidDependency {
                package: package.to_string(),
                dependency: entry.clone(),
            })
        })
        .collect()
}

/// Builder for package records, mostly used by tests and tooling
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    record: PackageRecord,
}

impl PackageBuilder {
    /// Start a record for `name` at version 1.0, pkgrel 0, arch `all`
    pub fn new(name: &str) -> Self {
        Self {
            record: PackageRecord {
                package: PackageMetadata {
                    name: name.to_string(),
                    version: "1.0".to_string(),
                    pkgrel: 0,
                    arch: vec!["all".to_string()],
                    build_depends: Vec::new(),
                    depends: Vec::new(),
                    provides: Vec::new(),
                    provider_priority: None,
                    emulation: EmulationSupport::Unknown,
                    cross_compile: false,
                },
                source: SourceConfig::default(),
            },
        }
    }

    /// Set the version
    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        self.record.package.version = version.to_string();
        self
    }

    /// Set the package release number
    #[must_use]
    pub fn pkgrel(mut self, pkgrel: u32) -> Self {
        self.record.package.pkgrel = pkgrel;
        self
    }

    /// Replace the architecture list
    #[must_use]
    pub fn arch(mut self, arch: &[&str]) -> Self {
        self.record.package.arch = arch.iter().map(ToString::to_string).collect();
        self
    }

    /// Add build dependencies
    #[must_use]
    pub fn build_depends(mut self, deps: &[&str]) -> Self {
        self.record
            .package
            .build_depends
            .extend(deps.iter().map(ToString::to_string));
        self
    }

    /// Add runtime dependencies
    #[must_use]
    pub fn depends(mut self, deps: &[&str]) -> Self {
        self.record
            .package
            .depends
            .extend(deps.iter().map(ToString::to_string));
        self
    }

    /// Add provides entries
    #[must_use]
    pub fn provides(mut self, names: &[&str]) -> Self {
        self.record
            .package
            .provides
            .extend(names.iter().map(ToString::to_string));
        self
    }

    /// Set the provider priority
    #[must_use]
    pub fn provider_priority(mut self, priority: i64) -> Self {
        self.record.package.provider_priority = Some(priority);
        self
    }

    /// Set the emulation flag
    #[must_use]
    pub fn emulation(mut self, emulation: EmulationSupport) -> Self {
        self.record.package.emulation = emulation;
        self
    }

    /// Mark the package cross-compile capable or not
    #[must_use]
    pub fn cross_compile(mut self, capable: bool) -> Self {
        self.record.package.cross_compile = capable;
        self
    }

    /// Add a source checksum
    #[must_use]
    pub fn checksum(mut self, file: &str, sum: &str) -> Self {
        self.record
            .source
            .checksums
            .insert(file.to_string(), sum.to_string());
        self
    }

    /// Raw record
    pub fn record(self) -> PackageRecord {
        self.record
    }

    /// Validate into a [`Package`]
    pub fn build(self) -> Result<Package, PackageError> {
        let origin = PathBuf::from(format!("{}/package.toml", self.record.package.name));
        Package::from_record(self.record, &origin)
    }
}
