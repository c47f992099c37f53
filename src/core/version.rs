//! Package version comparison and dependency constraints
//!
//! Versions follow the apk scheme: dot separated numbers, an optional
//! trailing letter, then any number of `_suffix[N]` parts
//! (e.g. `1.2.3a_rc2`). The package-release number is not part of the
//! version string; it lives in [`crate::core::package::Package::pkgrel`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

const SUFFIXES: [(&str, i32); 9] = [
    ("alpha", -4),
    ("beta", -3),
    ("pre", -2),
    ("rc", -1),
    ("cvs", 1),
    ("svn", 2),
    ("git", 3),
    ("hg", 4),
    ("p", 5),
];

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9]+(\.[0-9]+)*[a-z]?(_(alpha|beta|pre|rc|cvs|svn|git|hg|p)[0-9]*)*$")
            .expect("Invalid version regex")
    })
}

/// Check whether `version` is a valid package version
pub fn is_valid(version: &str) -> bool {
    version_regex().is_match(version)
}

#[derive(Debug, Default)]
struct Parsed {
    numbers: Vec<u64>,
    letter: Option<char>,
    suffixes: Vec<(i32, u64)>,
}

fn parse(version: &str) -> Parsed {
    let mut parsed = Parsed::default();
    let mut parts = version.split('_');
    let base = parts.next().unwrap_or_default();

    let (base, letter) = match base.chars().last() {
        Some(c) if c.is_ascii_lowercase() => (&base[..base.len() - 1], Some(c)),
        _ => (base, None),
    };
    parsed.letter = letter;
    parsed.numbers = base
        .split('.')
        .map(|n| n.parse::<u64>().unwrap_or(0))
        .collect();

    for suffix in parts {
        let digits_at = suffix
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(suffix.len());
        let (name, number) = suffix.split_at(digits_at);
        let rank = SUFFIXES
            .iter()
            .find(|(s, _)| *s == name)
            .map_or(0, |(_, rank)| *rank);
        parsed.suffixes.push((rank, number.parse().unwrap_or(0)));
    }
    parsed
}

/// Next release after `version`
///
/// The last number of the dotted part goes up by one and any letter or
/// suffix is dropped (`1.2.3a_rc2` -> `1.2.4`). `None` for invalid versions.
pub fn next_release(version: &str) -> Option<String> {
    if !is_valid(version) {
        return None;
    }
    let base = version.split('_').next()?;
    let base = base.trim_end_matches(|c: char| c.is_ascii_lowercase());
    let (head, last) = match base.rsplit_once('.') {
        Some((head, last)) => (Some(head), last),
        None => (None, base),
    };
    let next = last.parse::<u64>().ok()?.checked_add(1)?;
    Some(match head {
        Some(head) => format!("{head}.{next}"),
        None => next.to_string(),
    })
}

/// Compare two package versions
pub fn compare(a: &str, b: &str) -> Ordering {
    let a = parse(a);
    let b = parse(b);

    let len = a.numbers.len().max(b.numbers.len());
    for i in 0..len {
        let ord = match (a.numbers.get(i), b.numbers.get(i)) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    match a.letter.cmp(&b.letter) {
        Ordering::Equal => {}
        ord => return ord,
    }

    let len = a.suffixes.len().max(b.suffixes.len());
    for i in 0..len {
        // A missing suffix ranks between pre-release and post-release suffixes
        let x = a.suffixes.get(i).copied().unwrap_or((0, 0));
        let y = b.suffixes.get(i).copied().unwrap_or((0, 0));
        match x.cmp(&y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    Ordering::Equal
}

/// Constraint operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Fuzzy match: version starts with the given prefix
    Fuzzy,
}

impl Op {
    /// Parse an operator token
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "=" => Some(Self::Eq),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "~" => Some(Self::Fuzzy),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Fuzzy => "~",
        }
    }
}

/// Version constraint attached to a dependency (`>=1.2`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReq {
    pub op: Op,
    pub version: String,
}

impl VersionReq {
    /// Create a new constraint
    pub fn new(op: Op, version: impl Into<String>) -> Self {
        Self {
            op,
            version: version.into(),
        }
    }

    /// Check whether `version` satisfies this constraint
    pub fn matches(&self, version: &str) -> bool {
        let ord = compare(version, &self.version);
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
            Op::Fuzzy => version.starts_with(&self.version),
        }
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)
    }
}
