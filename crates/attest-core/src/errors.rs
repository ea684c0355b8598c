//! Error taxonomy for the profile core.
//!
//! Every fatal failure in the core maps to one [`ProfileError`] variant.
//! Validation problems that `check()` reports are *not* errors in this
//! sense: they accumulate in the check report and only become fatal when
//! `params()` needs the offending data.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    /// No fetcher understood the target, or materializing it failed.
    #[error("Failed to fetch profile from '{target}': {reason}")]
    Fetch { target: String, reason: String },

    /// The materialized tree matched no known source layout.
    #[error("Don't understand the source layout at '{location}'")]
    Structure { location: String },

    /// A required manifest field is missing or malformed.
    #[error("Invalid profile metadata: {reason}")]
    Metadata { reason: String },

    /// A control file raised while being evaluated.
    #[error("Failed to evaluate '{file}': {reason}")]
    Evaluation { file: String, reason: String },

    /// No version assignment satisfies the dependency constraints.
    #[error("Unable to satisfy version constraints for '{name}': {requirements:?}")]
    VersionConflict {
        name: String,
        requirements: Vec<String>,
    },

    /// The dependency graph would contain a cycle.
    #[error("Circular dependency detected between profiles: {}", profiles.join(", "))]
    CyclicDependency { profiles: Vec<String> },

    /// A vendor cache entry is corrupt or unreadable.
    #[error("Corrupt vendor cache entry at '{path}': {reason}")]
    Cache { path: PathBuf, reason: String },

    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to parse manifest YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ProfileError {
    /// Exit code a wrapping CLI should use for this error.
    ///
    /// 1 = validation errors, 2 = fetch/resolution failure, 3 = internal.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProfileError::Metadata { .. } | ProfileError::Evaluation { .. } => 1,
            ProfileError::Fetch { .. }
            | ProfileError::Structure { .. }
            | ProfileError::VersionConflict { .. }
            | ProfileError::CyclicDependency { .. }
            | ProfileError::Cache { .. } => 2,
            _ => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProfileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_names_all_profiles() {
        let err = ProfileError::CyclicDependency {
            profiles: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency detected between profiles: a, b"
        );
    }

    #[test]
    fn exit_codes_follow_cli_contract() {
        assert_eq!(
            ProfileError::Metadata {
                reason: "missing name".into()
            }
            .exit_code(),
            1
        );
        assert_eq!(
            ProfileError::Fetch {
                target: "x".into(),
                reason: "no handler".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(
            ProfileError::Io(std::io::Error::other("boom")).exit_code(),
            3
        );
    }
}
