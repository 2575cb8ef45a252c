//! Version selectors and the constraints declared on dependencies.

use std::fmt;

use crate::version::{ModuleVersion, VersionRange};

/// The closed set of ways a dependency can select versions of a module.
#[derive(Debug, Clone)]
pub enum VersionSelector {
    /// Matches exactly one version.
    Exact(ModuleVersion),
    /// Matches any version inside a bounded range.
    Range(VersionRange),
    /// Matches any version string starting with the prefix, `1.+` style.
    Prefix(String),
    /// Matches the newest version the repository knows. Cannot be evaluated
    /// against a bare version string.
    Latest,
}

impl VersionSelector {
    /// Parse a version notation: bracketed ranges, `+`-suffixed prefixes,
    /// `latest`. Anything else is an exact version.
    pub fn parse(notation: &str) -> Self {
        let notation = notation.trim();
        if notation == "latest" || notation.starts_with("latest.") {
            return Self::Latest;
        }
        if let Some(range) = VersionRange::parse(notation) {
            return Self::Range(range);
        }
        if let Some(prefix) = notation.strip_suffix('+') {
            return Self::Prefix(prefix.to_string());
        }
        Self::Exact(ModuleVersion::parse(notation))
    }

    pub fn accepts(&self, version: &ModuleVersion) -> bool {
        match self {
            Self::Exact(v) => v == version,
            Self::Range(range) => range.contains(version),
            Self::Prefix(prefix) => version.as_str().starts_with(prefix),
            Self::Latest => false,
        }
    }

    /// Whether an already-selected version accepted by this selector can be
    /// reused without resolving again.
    pub fn can_short_circuit(&self) -> bool {
        !matches!(self, Self::Latest)
    }

    /// Whether evaluating this selector needs repository metadata rather
    /// than just a version string.
    pub fn requires_metadata(&self) -> bool {
        matches!(self, Self::Latest)
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::Range(range) => write!(f, "{range}"),
            Self::Prefix(prefix) => write!(f, "{prefix}+"),
            Self::Latest => f.write_str("latest"),
        }
    }
}

/// A resolved version constraint: what the dependency prefers, what it
/// refuses, and how hard it insists.
#[derive(Debug, Clone, Default)]
pub struct VersionConstraint {
    pub preferred: Option<VersionSelector>,
    pub rejected: Option<VersionSelector>,
    /// A strict constraint additionally refuses any version its preferred
    /// selector does not accept.
    pub strict: bool,
    /// A forced constraint collapses the module's resolved set to the one
    /// component this constraint selects.
    pub force: bool,
}

impl VersionConstraint {
    /// Constraint preferring the given notation (exact, range, or prefix).
    pub fn require(notation: &str) -> Self {
        Self {
            preferred: Some(VersionSelector::parse(notation)),
            ..Self::default()
        }
    }

    /// Constraint asking for the newest available version.
    pub fn latest() -> Self {
        Self {
            preferred: Some(VersionSelector::Latest),
            ..Self::default()
        }
    }

    pub fn reject(mut self, notation: &str) -> Self {
        self.rejected = Some(VersionSelector::parse(notation));
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn strictly(mut self) -> Self {
        self.strict = true;
        self
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.preferred {
            Some(selector) => write!(f, "{selector}")?,
            None => f.write_str("*")?,
        }
        if self.strict {
            f.write_str("!!")?;
        }
        if let Some(rejected) = &self.rejected {
            write!(f, " reject {rejected}")?;
        }
        if self.force {
            f.write_str(" (forced)")?;
        }
        Ok(())
    }
}
