//! Kubernetes version strings as reported by the control plane
//!
//! Versions look like `1.10.5-gke.0`. Ordering compares the dotted numeric
//! part first (missing components count as zero), then the numbers in the
//! `-gke.N` suffix. A version without a suffix sorts before any suffixed
//! release with the same dotted part.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Parsed version with its suffix numbers
#[derive(Clone, Debug)]
pub struct KubeVersion {
    components: Vec<u64>,
    suffix: Option<Vec<u64>>,
    raw: String,
}

impl KubeVersion {
    /// Numeric components, e.g. `[1, 10, 5]`
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// Numbers in the `-gke.N` suffix, None when there is no suffix
    pub fn suffix(&self) -> Option<&[u64]> {
        self.suffix.as_deref()
    }

    /// The part before any `-` suffix
    pub fn base(&self) -> &str {
        self.raw.split('-').next().unwrap_or(&self.raw)
    }

    /// True when `other` is what `self` asks for
    ///
    /// A suffixed version is only satisfied by the same release:
    /// `1.10.5-gke.1` is not satisfied by `1.10.5-gke.0`. Without a suffix,
    /// `self` is an alias: `1.10` is satisfied by `1.10.5-gke.0`, while
    /// `1.10.5` is not satisfied by `1.10.6`.
    pub fn is_satisfied_by(&self, other: &KubeVersion) -> bool {
        if self.suffix.is_some() {
            return self == other;
        }
        other.components.len() >= self.components.len()
            && other.components[..self.components.len()] == self.components[..]
    }

    fn cmp_components(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|i| {
                let a = self.components.get(i).copied().unwrap_or(0);
                let b = other.components.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl FromStr for KubeVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::validation(format!("invalid version '{s}'"));
        let trimmed = s.trim();
        let (base, suffix) = match trimmed.split_once('-') {
            Some((base, suffix)) => (base, Some(suffix)),
            None => (trimmed, None),
        };
        if base.is_empty() {
            return Err(invalid());
        }
        let components = base
            .split('.')
            .map(|c| c.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        // `gke.3` -> [3]; words in the suffix carry no order
        let suffix = suffix.map(|text| {
            text.split(['.', '-'])
                .filter_map(|part| part.parse::<u64>().ok())
                .collect()
        });

        Ok(Self {
            components,
            suffix,
            raw: trimmed.to_string(),
        })
    }
}

impl Ord for KubeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_components(other)
            .then_with(|| self.suffix.cmp(&other.suffix))
    }
}

impl PartialOrd for KubeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KubeVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KubeVersion {}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
