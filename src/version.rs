// src/version.rs

//! Package version comparison
//!
//! Versions are compared component-wise after splitting on `.` and `-`.
//! Numeric components compare numerically, anything else lexicographically;
//! the first differing component decides. A missing trailing component
//! counts as zero, and a non-numeric suffix sorts strictly below the same
//! prefix without it, so `1.0-rc1 < 1.0 < 1.0.1 < 1.10`.

use std::cmp::Ordering;
use std::fmt;

/// A package version, kept verbatim and compared structurally
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

/// One dot- or dash-separated component
#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Num(u64),
    Text(String),
}

impl Version {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn components(&self) -> Vec<Component> {
        self.0
            .split(['.', '-'])
            .map(|part| match part.parse::<u64>() {
                Ok(n) => Component::Num(n),
                Err(_) => Component::Text(part.to_string()),
            })
            .collect()
    }

    /// True when `self` is strictly newer than `other`
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self.cmp(other) == Ordering::Greater
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.components();
        let b = other.components();
        let len = a.len().max(b.len());

        for i in 0..len {
            let ord = match (a.get(i), b.get(i)) {
                (Some(Component::Num(x)), Some(Component::Num(y))) => x.cmp(y),
                (Some(Component::Text(x)), Some(Component::Text(y))) => x.cmp(y),
                // numeric vs text: the bare numeric prefix wins
                (Some(Component::Num(_)), Some(Component::Text(_))) => Ordering::Greater,
                (Some(Component::Text(_)), Some(Component::Num(_))) => Ordering::Less,
                // missing numeric component counts as zero
                (Some(Component::Num(x)), None) => x.cmp(&0),
                (None, Some(Component::Num(y))) => 0u64.cmp(y),
                // a present textual suffix sorts below the bare prefix
                (Some(Component::Text(_)), None) => Ordering::Less,
                (None, Some(Component::Text(_))) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
