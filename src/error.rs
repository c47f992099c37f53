//! Error types for forgeroot
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Unknown architecture name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown architecture '{0}'")]
pub struct UnknownArchError(pub String);

/// Package definition errors, raised while loading the package graph
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PackageError {
    /// Package not found in the graph
    #[error("Package '{name}' not found")]
    NotFound { name: String },

    /// Invalid package name
    #[error("Invalid package name '{name}'")]
    InvalidName { name: String },

    /// Invalid version string
    #[error("Package '{package}' has invalid version '{version}'")]
    InvalidVersion { package: String, version: String },

    /// Architecture list is empty
    #[error("Package '{package}' does not declare any architecture")]
    EmptyArch { package: String },

    /// Architecture entry is not known
    #[error("Package '{package}' declares unknown architecture '{arch}'")]
    InvalidArch { package: String, arch: String },

    /// Dependency string cannot be parsed
    #[error("Package '{package}' has malformed dependency '{dependency}'")]
    InvalidDependency { package: String, dependency: String },

    /// Package depends on itself or on a name it provides
    #[error("Package '{package}' depends on itself via '{dependency}'")]
    SelfDependency { package: String, dependency: String },

    /// Two definitions share a name
    #[error("Package '{name}' is defined twice: {first} and {second}")]
    Duplicate {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Parse error
    #[error("Failed to parse package definition '{path}': {error}")]
    ParseError { path: PathBuf, error: String },

    /// pkgrel is already at its maximum
    #[error("Package '{package}' pkgrel {pkgrel} cannot be increased")]
    PkgrelOverflow { package: String, pkgrel: u32 },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// Dependency resolution errors
///
/// Any of these aborts the run before a chroot is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// Circular dependency detected
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// Nothing provides the dependency
    #[error("Missing provider: nothing provides '{dependency}' (required by '{requester}')")]
    MissingProvider {
        requester: String,
        dependency: String,
    },

    /// Providers exist, but none satisfies the version constraint
    #[error("Version constraint '{constraint}' for '{dependency}' cannot be satisfied (required by '{requester}')")]
    VersionConflict {
        requester: String,
        dependency: String,
        constraint: String,
    },

    /// Providers exist, but none applies to the architecture
    #[error("No provider of '{dependency}' supports {arch} (required by '{requester}')")]
    UnsupportedArch {
        requester: String,
        dependency: String,
        arch: String,
    },
}

/// Build strategy errors
///
/// Contained per target: the target fails, its dependents are blocked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// Strict mode requires cross compilation
    #[error("Package '{package}' is not cross-compile capable, required for strict {arch} build")]
    NotCrossCapable { package: String, arch: String },

    /// Cross toolchain missing for the arch pair
    #[error("No cross toolchain for {host} -> {target}")]
    NoCrossToolchain { host: String, target: String },

    /// Neither emulation nor cross compilation is possible
    #[error("No viable build strategy for '{package}' on {arch}: emulation unsupported and not cross-compile capable")]
    NoViableStrategy { package: String, arch: String },
}

/// Chroot lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChrootError {
    /// A mount step failed; earlier steps were unwound
    #[error("Failed to set up chroot '{chroot}' at step '{step}': {error}")]
    Setup {
        chroot: String,
        step: String,
        error: String,
    },

    /// Emulator for a foreign architecture not available
    #[error("No emulator available for {arch}: {reason}")]
    Emulator { arch: String, reason: String },

    /// Lock file could not be acquired
    #[error("Failed to lock chroot '{chroot}' ({path}): {error}")]
    Lock {
        chroot: String,
        path: PathBuf,
        error: String,
    },

    /// Unmount or removal failed
    #[error("Failed to tear down chroot '{chroot}': {error}")]
    Teardown { chroot: String, error: String },

    /// Chroot was destroyed while still referenced
    #[error("Chroot '{chroot}' has been destroyed")]
    Destroyed { chroot: String },
}

/// Build tool execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildExecutionError {
    /// Build tool exited non-zero
    #[error("Build of '{package}' failed with exit code {code} (log: {log})")]
    NonZeroExit {
        package: String,
        code: i32,
        log: PathBuf,
    },

    /// Build tool could not be started
    #[error("Failed to start build of '{package}': {error}")]
    Spawn { package: String, error: String },

    /// Build exceeded the configured timeout
    #[error("Build of '{package}' timed out after {secs}s")]
    TimedOut { package: String, secs: u64 },

    /// Build was killed because the run was cancelled
    #[error("Build of '{package}' was cancelled")]
    Cancelled { package: String },
}

/// Artifact index errors
#[derive(Error, Debug)]
pub enum ArtifactStoreError {
    /// Failed to read the index
    #[error("Failed to read artifact index '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Index content is invalid
    #[error("Failed to parse artifact index '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// Failed to write the index
    #[error("Failed to write artifact index '{path}': {error}")]
    Write { path: PathBuf, error: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },

    /// Value out of range
    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Top-level forgeroot error type
#[derive(Error, Debug)]
pub enum ForgerootError {
    /// Package error
    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    /// Resolver error
    #[error("Resolver error: {0}")]
    Resolve(#[from] ResolveError),

    /// Chroot error
    #[error("Chroot error: {0}")]
    Chroot(#[from] ChrootError),

    /// Artifact index error
    #[error("Artifact index error: {0}")]
    Artifacts(#[from] ArtifactStoreError),

    /// Config error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Unknown architecture
    #[error(transparent)]
    Arch(#[from] UnknownArchError),

    /// IO error
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
