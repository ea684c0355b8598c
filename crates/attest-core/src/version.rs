//! Version constraints over semantic versions.
//!
//! Wraps the `semver` crate for version parsing and ordering, and adds
//! the constraint grammar profiles use in `depends` entries: a list of
//! comma-joined predicates with operators `>=`, `<=`, `>`, `<`, `=`,
//! and the pessimistic `~>`. The pessimistic operator follows profile
//! semantics (`~> 2.0` allows `2.x`, `~> 2.0.1` allows `2.0.x`), which
//! differs from cargo's tilde ranges, so it is implemented here rather
//! than delegated to `semver::VersionReq`.

use std::fmt;
use thiserror::Error;

pub use semver::Version;

#[derive(Debug, Error)]
#[error("Invalid version constraint '{expr}': {reason}")]
pub struct ConstraintError {
    pub expr: String,
    pub reason: String,
}

/// Parse a full semantic version like "1.2.3".
pub fn parse_version(s: &str) -> Result<Version, semver::Error> {
    Version::parse(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Lt,
    Ge,
    Le,
    Pessimistic,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Eq => "=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::Pessimistic => "~>",
        };
        write!(f, "{s}")
    }
}

/// A version literal as written, possibly partial ("1.2").
#[derive(Debug, Clone, PartialEq, Eq)]
struct Parts {
    major: u64,
    minor: Option<u64>,
    patch: Option<u64>,
}

impl Parts {
    fn parse(s: &str) -> Option<Self> {
        let mut pieces = s.split('.');
        let major = pieces.next()?.parse().ok()?;
        let minor = match pieces.next() {
            Some(p) => Some(p.parse().ok()?),
            None => None,
        };
        let patch = match pieces.next() {
            Some(p) => Some(p.parse().ok()?),
            None => None,
        };
        if pieces.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    /// Missing segments compare as zero.
    fn filled(&self) -> Version {
        Version::new(self.major, self.minor.unwrap_or(0), self.patch.unwrap_or(0))
    }

    /// Exclusive upper bound for the pessimistic operator.
    fn pessimistic_upper(&self) -> Version {
        match (self.minor, self.patch) {
            (Some(minor), Some(_)) => Version::new(self.major, minor + 1, 0),
            _ => Version::new(self.major + 1, 0, 0),
        }
    }
}

impl fmt::Display for Parts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{minor}")?;
        }
        if let Some(patch) = self.patch {
            write!(f, ".{patch}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Predicate {
    op: Op,
    parts: Parts,
}

impl Predicate {
    fn matches(&self, version: &Version) -> bool {
        let bound = self.parts.filled();
        match self.op {
            Op::Eq => *version == bound,
            Op::Gt => *version > bound,
            Op::Lt => *version < bound,
            Op::Ge => *version >= bound,
            Op::Le => *version <= bound,
            Op::Pessimistic => *version >= bound && *version < self.parts.pessimistic_upper(),
        }
    }
}

/// A conjunction of version predicates. Empty matches every version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionConstraint {
    predicates: Vec<Predicate>,
}

impl VersionConstraint {
    /// Matches any version.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_any(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Parse a constraint expression like ">= 1.2, < 2.0" or "~> 2.0".
    ///
    /// A bare version means exact equality.
    pub fn parse(expr: &str) -> Result<Self, ConstraintError> {
        let mut predicates = Vec::new();
        for piece in expr.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                return Err(ConstraintError {
                    expr: expr.to_string(),
                    reason: "empty predicate".to_string(),
                });
            }
            let (op, rest) = if let Some(rest) = piece.strip_prefix("~>") {
                (Op::Pessimistic, rest)
            } else if let Some(rest) = piece.strip_prefix(">=") {
                (Op::Ge, rest)
            } else if let Some(rest) = piece.strip_prefix("<=") {
                (Op::Le, rest)
            } else if let Some(rest) = piece.strip_prefix('>') {
                (Op::Gt, rest)
            } else if let Some(rest) = piece.strip_prefix('<') {
                (Op::Lt, rest)
            } else if let Some(rest) = piece.strip_prefix('=') {
                (Op::Eq, rest)
            } else {
                (Op::Eq, piece)
            };
            let parts = Parts::parse(rest.trim()).ok_or_else(|| ConstraintError {
                expr: expr.to_string(),
                reason: format!("'{}' is not a dotted-numeric version", rest.trim()),
            })?;
            predicates.push(Predicate { op, parts });
        }
        Ok(Self { predicates })
    }

    /// True iff the version satisfies every predicate.
    pub fn matches(&self, version: &Version) -> bool {
        self.predicates.iter().all(|p| p.matches(version))
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.predicates.is_empty() {
            return write!(f, ">= 0");
        }
        let rendered: Vec<String> = self
            .predicates
            .iter()
            .map(|p| format!("{} {}", p.op, p.parts))
            .collect();
        write!(f, "{}", rendered.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn bare_version_is_exact() {
        let c = VersionConstraint::parse("1.2.3").unwrap();
        assert!(c.matches(&v("1.2.3")));
        assert!(!c.matches(&v("1.2.4")));
    }

    #[test]
    fn partial_versions_fill_with_zero() {
        let c = VersionConstraint::parse(">= 1.2").unwrap();
        assert!(c.matches(&v("1.2.0")));
        assert!(c.matches(&v("2.0.0")));
        assert!(!c.matches(&v("1.1.9")));
    }

    #[test]
    fn comma_joined_predicates_are_a_conjunction() {
        let c = VersionConstraint::parse(">= 1.0.0, < 2.0.0").unwrap();
        assert!(c.matches(&v("1.5.0")));
        assert!(!c.matches(&v("2.0.0")));
        assert!(!c.matches(&v("0.9.0")));
    }

    #[test]
    fn pessimistic_two_segments_allows_minor_drift() {
        let c = VersionConstraint::parse("~> 2.0").unwrap();
        assert!(c.matches(&v("2.0.0")));
        assert!(c.matches(&v("2.9.1")));
        assert!(!c.matches(&v("3.0.0")));
    }

    #[test]
    fn pessimistic_three_segments_allows_patch_drift() {
        let c = VersionConstraint::parse("~> 2.0.1").unwrap();
        assert!(c.matches(&v("2.0.1")));
        assert!(c.matches(&v("2.0.9")));
        assert!(!c.matches(&v("2.1.0")));
    }

    #[test]
    fn empty_constraint_matches_everything() {
        assert!(VersionConstraint::any().matches(&v("0.0.1")));
        assert!(VersionConstraint::any().matches(&v("99.0.0")));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(VersionConstraint::parse(">= banana").is_err());
        assert!(VersionConstraint::parse("1.2.3.4").is_err());
        assert!(VersionConstraint::parse(">= 1.0,,< 2").is_err());
    }

    #[test]
    fn display_round_trips_operators() {
        let c = VersionConstraint::parse(">=1.0, ~> 2.1.3").unwrap();
        assert_eq!(c.to_string(), ">= 1.0, ~> 2.1.3");
    }
}
