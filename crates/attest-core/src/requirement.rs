//! Dependency requirements declared in a profile manifest.

use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a depended-on profile comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequirementSource {
    /// Relative path next to the depending profile.
    Path { path: String },
    /// A profile registry entry, `host` defaulting to the public one.
    Supermarket {
        host: Option<String>,
        slug: String,
    },
    /// A git repository, optionally pinned to a branch, tag, or ref.
    Git {
        url: String,
        branch: Option<String>,
        tag: Option<String>,
        git_ref: Option<String>,
    },
    /// A plain archive URL.
    Url { url: String },
    /// No source given; only the vendor cache can satisfy it.
    None,
}

impl RequirementSource {
    /// Pinned sources short-circuit resolution: the requirement is its
    /// own candidate.
    pub fn is_pinned(&self) -> bool {
        match self {
            RequirementSource::Path { .. } => true,
            RequirementSource::Git { tag, git_ref, .. } => tag.is_some() || git_ref.is_some(),
            _ => false,
        }
    }
}

impl fmt::Display for RequirementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementSource::Path { path } => write!(f, "path:{path}"),
            RequirementSource::Supermarket { host, slug } => match host {
                Some(host) => write!(f, "supermarket:{host}/{slug}"),
                None => write!(f, "supermarket:{slug}"),
            },
            RequirementSource::Git { url, .. } => write!(f, "git:{url}"),
            RequirementSource::Url { url } => write!(f, "url:{url}"),
            RequirementSource::None => write!(f, "vendor-cache"),
        }
    }
}

/// A named, version-constrained profile dependency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Requirement {
    pub name: String,
    #[serde(serialize_with = "serialize_constraint")]
    pub constraint: VersionConstraint,
    pub source: RequirementSource,
    /// Optional requirements may be missing without failing resolution.
    pub optional: bool,
}

fn serialize_constraint<S: serde::Serializer>(
    c: &VersionConstraint,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_str(&c.to_string())
}

/// A `depends` entry as it appears in the manifest, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependencyEntry {
    pub name: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub git: Option<String>,
    pub branch: Option<String>,
    pub tag: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub supermarket: Option<String>,
    pub host: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

impl Requirement {
    /// A requirement with no source and no constraint.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: VersionConstraint::any(),
            source: RequirementSource::None,
            optional: false,
        }
    }

    pub fn with_constraint(mut self, constraint: VersionConstraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn with_source(mut self, source: RequirementSource) -> Self {
        self.source = source;
        self
    }

    /// Validate and convert a raw `depends` entry.
    pub fn from_entry(entry: &DependencyEntry) -> Result<Self, String> {
        let name = match entry.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => return Err("dependency is missing a name".to_string()),
        };

        let mut sources = Vec::new();
        if let Some(path) = &entry.path {
            sources.push(RequirementSource::Path { path: path.clone() });
        }
        if let Some(url) = &entry.url {
            sources.push(RequirementSource::Url { url: url.clone() });
        }
        if let Some(url) = &entry.git {
            sources.push(RequirementSource::Git {
                url: url.clone(),
                branch: entry.branch.clone(),
                tag: entry.tag.clone(),
                git_ref: entry.git_ref.clone(),
            });
        }
        if let Some(slug) = &entry.supermarket {
            sources.push(RequirementSource::Supermarket {
                host: entry.host.clone(),
                slug: slug.clone(),
            });
        }
        let source = match sources.len() {
            0 => RequirementSource::None,
            1 => sources.remove(0),
            n => {
                return Err(format!(
                    "dependency '{name}' declares {n} sources; at most one of path/url/git/supermarket is allowed"
                ))
            }
        };

        let constraint = match &entry.version {
            Some(expr) => VersionConstraint::parse(expr)
                .map_err(|e| format!("dependency '{name}': {e}"))?,
            None => VersionConstraint::any(),
        };

        Ok(Self {
            name,
            constraint,
            source,
            optional: entry.optional,
        })
    }

    /// True iff a spec with this name and version satisfies the requirement.
    pub fn satisfied_by(&self, name: &str, version: &Version) -> bool {
        self.name == name && self.constraint.matches(version)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [{}]", self.name, self.constraint, self.source)
    }
}
