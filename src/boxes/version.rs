//! Box versions and version constraints.
//!
//! Box versions are looser than SemVer: any number of numeric dot
//! segments, with missing trailing segments comparing as zero (`1.0` ==
//! `1.0.0`), plus an optional pre-release tag ordered by SemVer precedence.
//! Build metadata (`+...`) is rejected.
//!
//! A [`Constraint`] is a comma-separated conjunction of comparators:
//! `>=`, `>`, `<=`, `<`, `=`, `!=` and the pessimistic `~>`. A bare version
//! means `=`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Prerelease;
use thiserror::Error;

/// Errors raised while parsing versions and constraints.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum VersionError {
    #[error("empty version")]
    #[diagnostic(code(vagabond::version::empty))]
    Empty,

    #[error("invalid version `{version}`: segment `{segment}` is not a number")]
    #[diagnostic(code(vagabond::version::segment))]
    InvalidSegment { version: String, segment: String },

    #[error("invalid version `{version}`: build metadata is not supported")]
    #[diagnostic(code(vagabond::version::build_metadata))]
    BuildMetadata { version: String },

    #[error("invalid version `{version}`: {reason}")]
    #[diagnostic(code(vagabond::version::prerelease))]
    InvalidPrerelease { version: String, reason: String },

    #[error("invalid constraint `{constraint}`: {reason}")]
    #[diagnostic(
        code(vagabond::version::constraint),
        help("constraints look like `>= 1.0, < 2.0` or `~> 1.2`")
    )]
    InvalidConstraint { constraint: String, reason: String },
}

/// A parsed box version.
#[derive(Debug, Clone)]
pub struct BoxVersion {
    segments: Vec<u64>,
    pre: Prerelease,
    raw: String,
}

impl BoxVersion {
    /// Parse a version string.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(VersionError::Empty);
        }
        if raw.contains('+') {
            return Err(VersionError::BuildMetadata {
                version: raw.to_string(),
            });
        }

        let (release, pre) = match raw.split_once('-') {
            Some((release, pre)) => (release, pre),
            None => (raw, ""),
        };

        let segments = release
            .split('.')
            .map(|segment| {
                segment
                    .parse::<u64>()
                    .map_err(|_| VersionError::InvalidSegment {
                        version: raw.to_string(),
                        segment: segment.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pre = if raw.contains('-') && pre.is_empty() {
            return Err(VersionError::InvalidPrerelease {
                version: raw.to_string(),
                reason: "empty pre-release".to_string(),
            });
        } else {
            Prerelease::new(pre).map_err(|e| VersionError::InvalidPrerelease {
                version: raw.to_string(),
                reason: e.to_string(),
            })?
        };

        Ok(BoxVersion {
            segments,
            pre,
            raw: raw.to_string(),
        })
    }

    /// Numeric segments as written.
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    /// Whether this version carries a pre-release tag.
    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// The version string as given (trimmed).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn compare_segments(a: &[u64], b: &[u64]) -> Ordering {
        let len = a.len().max(b.len());
        for i in 0..len {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            match x.cmp(&y) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Upper bound used by `~>`: drop the last segment and increment the
    /// new last one. A single segment is incremented in place.
    fn pessimistic_bound(&self) -> Vec<u64> {
        let mut bound = self.segments.clone();
        if bound.len() > 1 {
            bound.pop();
        }
        if let Some(last) = bound.last_mut() {
            *last = last.saturating_add(1);
        }
        bound
    }
}

impl Ord for BoxVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        Self::compare_segments(&self.segments, &other.segments).then_with(|| {
            match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            }
        })
    }
}

impl PartialOrd for BoxVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for BoxVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BoxVersion {}

impl FromStr for BoxVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BoxVersion::parse(s)
    }
}

impl fmt::Display for BoxVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Comparison operator in a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Exact,
    NotEqual,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Pessimistic,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Op::Exact => "=",
            Op::NotEqual => "!=",
            Op::Greater => ">",
            Op::GreaterEq => ">=",
            Op::Less => "<",
            Op::LessEq => "<=",
            Op::Pessimistic => "~>",
        }
    }
}

/// A single `op version` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: BoxVersion,
}

impl Comparator {
    /// Whether `candidate` satisfies this comparator.
    pub fn matches(&self, candidate: &BoxVersion) -> bool {
        let v = &self.version;
        match self.op {
            Op::Exact => candidate == v,
            Op::NotEqual => candidate != v,
            Op::Greater => candidate > v,
            Op::GreaterEq => candidate >= v,
            Op::Less => candidate < v,
            Op::LessEq => candidate <= v,
            Op::Pessimistic => {
                candidate >= v
                    && BoxVersion::compare_segments(&candidate.segments, &v.pessimistic_bound())
                        == Ordering::Less
            }
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.as_str(), self.version)
    }
}

/// A conjunction of comparators. The empty constraint matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraint {
    comparators: Vec<Comparator>,
}

impl Constraint {
    /// A constraint that accepts any version.
    pub fn any() -> Self {
        Constraint::default()
    }

    /// Constraint matching exactly `version`.
    pub fn exact(version: BoxVersion) -> Self {
        Constraint {
            comparators: vec![Comparator {
                op: Op::Exact,
                version,
            }],
        }
    }

    /// Parse a comma-separated constraint list.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Constraint::any());
        }

        let invalid = |reason: String| VersionError::InvalidConstraint {
            constraint: trimmed.to_string(),
            reason,
        };

        let mut comparators = Vec::new();
        for part in trimmed.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid("empty comparator".to_string()));
            }

            let (op, rest) = split_op(part);
            let version = BoxVersion::parse(rest).map_err(|e| invalid(e.to_string()))?;
            comparators.push(Comparator { op, version });
        }

        Ok(Constraint { comparators })
    }

    /// Whether every comparator accepts `candidate`.
    pub fn matches(&self, candidate: &BoxVersion) -> bool {
        self.comparators.iter().all(|c| c.matches(candidate))
    }

    pub fn comparators(&self) -> &[Comparator] {
        &self.comparators
    }

    pub fn is_any(&self) -> bool {
        self.comparators.is_empty()
    }
}

fn split_op(part: &str) -> (Op, &str) {
    // Two-character operators first so `>=` is not read as `>`.
    const OPS: [(&str, Op); 7] = [
        ("~>", Op::Pessimistic),
        (">=", Op::GreaterEq),
        ("<=", Op::LessEq),
        ("!=", Op::NotEqual),
        (">", Op::Greater),
        ("<", Op::Less),
        ("=", Op::Exact),
    ];

    for (prefix, op) in OPS {
        if let Some(rest) = part.strip_prefix(prefix) {
            return (op, rest.trim());
        }
    }
    (Op::Exact, part)
}

impl FromStr for Constraint {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Constraint::parse(s)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.comparators.is_empty() {
            return f.write_str("*");
        }
        let parts: Vec<String> = self.comparators.iter().map(|c| c.to_string()).collect();
        f.write_str(&parts.join(", "))
    }
}
