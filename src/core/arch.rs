//! CPU architectures and per-package architecture applicability
//!
//! Architecture names follow the distribution's package naming (`armv7`,
//! `aarch64`, ...), not Rust's target names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownArchError;

/// Target CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Arch {
    X86_64,
    X86,
    Aarch64,
    Armv7,
    Armhf,
    Riscv64,
    Ppc64le,
    S390x,
    Loongarch64,
}

impl Arch {
    /// Every architecture known to forgeroot
    pub const ALL: [Arch; 9] = [
        Arch::X86_64,
        Arch::X86,
        Arch::Aarch64,
        Arch::Armv7,
        Arch::Armhf,
        Arch::Riscv64,
        Arch::Ppc64le,
        Arch::S390x,
        Arch::Loongarch64,
    ];

    /// Architecture of the machine running forgeroot
    pub fn native() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Self::X86_64),
            "x86" => Some(Self::X86),
            "aarch64" => Some(Self::Aarch64),
            "arm" => Some(Self::Armv7),
            "riscv64" => Some(Self::Riscv64),
            "powerpc64" => Some(Self::Ppc64le),
            "s390x" => Some(Self::S390x),
            "loongarch64" => Some(Self::Loongarch64),
            _ => None,
        }
    }

    /// Package-level architecture name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::X86 => "x86",
            Self::Aarch64 => "aarch64",
            Self::Armv7 => "armv7",
            Self::Armhf => "armhf",
            Self::Riscv64 => "riscv64",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
            Self::Loongarch64 => "loongarch64",
        }
    }

    /// Suffix of the qemu user-mode emulator (`qemu-<suffix>`)
    pub fn qemu_name(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::X86 => "i386",
            Self::Aarch64 => "aarch64",
            Self::Armv7 | Self::Armhf => "arm",
            Self::Riscv64 => "riscv64",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
            Self::Loongarch64 => "loongarch64",
        }
    }

    /// GNU-style target triple used for cross toolchains
    pub fn triple(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64-alpine-linux-musl",
            Self::X86 => "i586-alpine-linux-musl",
            Self::Aarch64 => "aarch64-alpine-linux-musl",
            Self::Armv7 => "armv7-alpine-linux-musleabihf",
            Self::Armhf => "armv6-alpine-linux-musleabihf",
            Self::Riscv64 => "riscv64-alpine-linux-musl",
            Self::Ppc64le => "powerpc64le-alpine-linux-musl",
            Self::S390x => "s390x-alpine-linux-musl",
            Self::Loongarch64 => "loongarch64-alpine-linux-musl",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = UnknownArchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|arch| arch.as_str() == s)
            .ok_or_else(|| UnknownArchError(s.to_string()))
    }
}

impl TryFrom<String> for Arch {
    type Error = UnknownArchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Arch> for String {
    fn from(arch: Arch) -> Self {
        arch.as_str().to_string()
    }
}

/// Which architectures a package can be built for
///
/// Parsed from entries like `["all", "!armhf"]`. `noarch` packages are
/// architecture independent and applicable everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchSpec {
    all: bool,
    noarch: bool,
    included: BTreeSet<Arch>,
    excluded: BTreeSet<Arch>,
}

impl ArchSpec {
    /// Spec applicable to every architecture
    pub fn any() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    /// Spec applicable to exactly the given architectures
    pub fn only(arches: &[Arch]) -> Self {
        Self {
            included: arches.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Parse entries, returning the offending entry on failure
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, String> {
        let mut spec = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            match entry {
                "all" => spec.all = true,
                "noarch" => spec.noarch = true,
                _ => {
                    if let Some(negated) = entry.strip_prefix('!') {
                        let arch = negated.parse().map_err(|_| entry.to_string())?;
                        spec.excluded.insert(arch);
                    } else {
                        let arch = entry.parse().map_err(|_| entry.to_string())?;
                        spec.included.insert(arch);
                    }
                }
            }
        }
        Ok(spec)
    }

    /// Whether the package can be built for `arch`
    pub fn applies_to(&self, arch: Arch) -> bool {
        if self.excluded.contains(&arch) {
            return false;
        }
        self.all || self.noarch || self.included.contains(&arch)
    }

    /// Whether the package is architecture independent
    pub fn is_noarch(&self) -> bool {
        self.noarch
    }

    /// Whether no architecture at all is applicable
    pub fn is_empty(&self) -> bool {
        !Arch::ALL.into_iter().any(|arch| self.applies_to(arch))
    }
}
