//! Version parsing, ordering, and range matching for module versions.
//!
//! Keel versions follow the build-tool convention rather than strict semver:
//! - Parts are split on `.` and `-`
//! - Numeric parts compare as numbers
//! - Known qualifiers order below the release form:
//!   `dev` < `alpha` < `beta` < `milestone` < `rc` < `snapshot` < release < `sp`
//! - Unknown qualifiers compare lexically and sort below a release
//! - Missing trailing parts count as a release, so `1.0` equals `1.0.0`
//!   and outranks `1.0-rc`

use std::cmp::Ordering;
use std::fmt;

/// A parsed module version with ordered parts.
#[derive(Debug, Clone)]
pub struct ModuleVersion {
    original: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Number(u64),
    Known(Qualifier),
    Word(String),
}

/// Well-known qualifiers with a defined ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Qualifier {
    Dev,
    Alpha,
    Beta,
    Milestone,
    Rc,
    Snapshot,
    Release,
    Sp,
}

impl ModuleVersion {
    pub fn parse(version: &str) -> Self {
        let parts = version
            .split(['.', '-'])
            .filter(|token| !token.is_empty())
            .map(classify)
            .collect();
        Self {
            original: version.to_string(),
            parts,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn is_snapshot(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::Known(Qualifier::Snapshot)))
    }
}

fn classify(token: &str) -> Part {
    if let Ok(n) = token.parse::<u64>() {
        return Part::Number(n);
    }
    match token.to_ascii_lowercase().as_str() {
        "dev" => Part::Known(Qualifier::Dev),
        "alpha" | "a" => Part::Known(Qualifier::Alpha),
        "beta" | "b" => Part::Known(Qualifier::Beta),
        "milestone" | "m" => Part::Known(Qualifier::Milestone),
        "rc" | "cr" => Part::Known(Qualifier::Rc),
        "snapshot" => Part::Known(Qualifier::Snapshot),
        "ga" | "final" | "release" => Part::Known(Qualifier::Release),
        "sp" => Part::Known(Qualifier::Sp),
        _ => Part::Word(token.to_string()),
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl PartialEq for ModuleVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ModuleVersion {}

impl Ord for ModuleVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let ord = match (self.parts.get(i), other.parts.get(i)) {
                (Some(a), Some(b)) => compare_parts(a, b),
                (Some(a), None) => compare_to_absent(a),
                (None, Some(b)) => compare_to_absent(b).reverse(),
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for ModuleVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How a part compares against a shorter version that has run out of parts.
fn compare_to_absent(part: &Part) -> Ordering {
    match part {
        Part::Number(0) => Ordering::Equal,
        Part::Number(_) => Ordering::Greater,
        Part::Known(q) => q.cmp(&Qualifier::Release),
        Part::Word(_) => Ordering::Less,
    }
}

fn compare_parts(a: &Part, b: &Part) -> Ordering {
    match (a, b) {
        (Part::Number(a), Part::Number(b)) => a.cmp(b),
        (Part::Known(a), Part::Known(b)) => a.cmp(b),
        (Part::Number(_), _) => Ordering::Greater,
        (_, Part::Number(_)) => Ordering::Less,
        (Part::Word(a), Part::Word(b)) => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
        (Part::Known(q), Part::Word(_)) => {
            if *q >= Qualifier::Release {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (Part::Word(_), Part::Known(q)) => {
            if *q >= Qualifier::Release {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    }
}

/// A bounded version range such as `[1.0,2.0)` or `(,2.0]`.
#[derive(Debug, Clone)]
pub struct VersionRange {
    pub lower: Option<RangeBound>,
    pub upper: Option<RangeBound>,
}

#[derive(Debug, Clone)]
pub struct RangeBound {
    pub version: ModuleVersion,
    pub inclusive: bool,
}

impl VersionRange {
    /// Parse a range notation. Returns `None` for anything that is not
    /// bracketed (a bare version is not a range).
    pub fn parse(spec: &str) -> Option<Self> {
        let s = spec.trim();
        let open = s.chars().next()?;
        let close = s.chars().last()?;
        if !matches!(open, '[' | '(') || !matches!(close, ']' | ')') || s.len() < 2 {
            return None;
        }
        let inner = &s[1..s.len() - 1];
        let bound = |token: &str, inclusive: bool| {
            let token = token.trim();
            if token.is_empty() {
                None
            } else {
                Some(RangeBound {
                    version: ModuleVersion::parse(token),
                    inclusive,
                })
            }
        };
        match inner.split_once(',') {
            Some((lower, upper)) => Some(Self {
                lower: bound(lower, open == '['),
                upper: bound(upper, close == ']'),
            }),
            // `[1.0]` pins exactly one version
            None => {
                let exact = ModuleVersion::parse(inner.trim());
                Some(Self {
                    lower: Some(RangeBound {
                        version: exact.clone(),
                        inclusive: true,
                    }),
                    upper: Some(RangeBound {
                        version: exact,
                        inclusive: true,
                    }),
                })
            }
        }
    }

    pub fn contains(&self, version: &ModuleVersion) -> bool {
        let above_lower = match &self.lower {
            None => true,
            Some(b) if b.inclusive => *version >= b.version,
            Some(b) => *version > b.version,
        };
        let below_upper = match &self.upper {
            None => true,
            Some(b) if b.inclusive => *version <= b.version,
            Some(b) => *version < b.version,
        };
        above_lower && below_upper
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Some(b) if b.inclusive => write!(f, "[{}", b.version)?,
            Some(b) => write!(f, "({}", b.version)?,
            None => f.write_str("(")?,
        }
        f.write_str(",")?;
        match &self.upper {
            Some(b) if b.inclusive => write!(f, "{}]", b.version),
            Some(b) => write!(f, "{})", b.version),
            None => f.write_str(")"),
        }
    }
}
