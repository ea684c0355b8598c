//! The top-level profile facade.
//!
//! `Profile::for_target` drives fetch and source resolution, finalizes
//! metadata eagerly, and exposes the four operations a wrapping CLI
//! consumes: `info`, `check`, `archive`, and `locked_dependencies`.
//! Control evaluation happens lazily on the first `params`/`info`/
//! `check` call and runs against no backend: registration is observed,
//! checks are carried as data.

use crate::archive::{ArchiveGenerator, ArchiveVariant};
use crate::attribute::Attribute;
use crate::cache::VendorIndex;
use crate::check::{CheckMessage, CheckReport, CheckSummary};
use crate::context::{EvalError, Group, ProfileContext};
use crate::control::Control;
use crate::errors::{ProfileError, Result};
use crate::fetchers;
use crate::metadata::{Metadata, SupportEntry};
use crate::resolver::{DependencySet, Resolver, VendorProvider};
use crate::source_readers::{self, SourceReader};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;

/// Options accepted by `for_target`.
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
    /// Profile id override; prefixes every rule id when set.
    pub id: Option<String>,
    /// Caller-supplied attribute bindings.
    pub attributes: HashMap<String, Value>,
    /// Vendor cache root override for dependency resolution.
    pub vendor_cache: Option<PathBuf>,
}

/// Options accepted by `archive`.
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    /// Explicit destination; used verbatim when set.
    pub output: Option<PathBuf>,
    pub variant: ArchiveVariant,
    /// Replace an existing destination instead of refusing.
    pub overwrite: bool,
}

/// The normalized parameter record: metadata plus evaluation results.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileParams {
    pub name: Option<String>,
    pub version: Option<String>,
    pub title: Option<String>,
    pub maintainer: Option<String>,
    pub copyright: Option<String>,
    pub copyright_email: Option<String>,
    pub license: Option<String>,
    pub summary: Option<String>,
    pub supports: Vec<SupportEntry>,
    /// Registry order; ids are unique.
    pub controls: Vec<Control>,
    pub groups: Vec<Group>,
    pub attributes: Vec<Attribute>,
}

impl ProfileParams {
    pub fn control(&self, id: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.id == id)
    }
}

/// A control as reported by `info()`: execution-only fields stripped,
/// impact clamped into [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    pub impact: f64,
    pub refs: Vec<Value>,
    pub tags: serde_json::Map<String, Value>,
    pub code: String,
    pub source_location: crate::control::SourceLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_title: Option<String>,
    pub skip: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub title: Option<String>,
    pub maintainer: Option<String>,
    pub copyright: Option<String>,
    pub copyright_email: Option<String>,
    pub license: Option<String>,
    pub summary: Option<String>,
    pub supports: Vec<SupportEntry>,
    pub controls: Vec<ControlInfo>,
    pub groups: Vec<Group>,
    pub attributes: Vec<Attribute>,
}

impl ProfileInfo {
    pub fn control(&self, id: &str) -> Option<&ControlInfo> {
        self.controls.iter().find(|c| c.id == id)
    }

    pub fn to_json(&self) -> std::result::Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[derive(Debug)]
struct Evaluated {
    params: ProfileParams,
    errors: Vec<EvalError>,
}

pub struct Profile {
    reader: Box<dyn SourceReader>,
    options: ProfileOptions,
    metadata: Metadata,
    target: String,
    evaluated: Option<Evaluated>,
    locked: Option<DependencySet>,
}

impl Profile {
    /// Resolve a target reference into a profile: fetch, read, finalize.
    pub fn for_target(target: &str, options: ProfileOptions) -> Result<Self> {
        let tree = fetchers::registry().fetch(target)?;
        let reader = source_readers::registry().resolve(tree)?;
        Ok(Self::from_reader(reader, options, target))
    }

    pub fn from_reader(
        reader: Box<dyn SourceReader>,
        options: ProfileOptions,
        target: &str,
    ) -> Self {
        // Finalized eagerly so the id is known before any evaluation.
        let mut metadata = reader.metadata().clone();
        metadata.finalize(options.id.as_deref());
        Self {
            reader,
            options,
            metadata,
            target: target.to_string(),
            evaluated: None,
            locked: None,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.name()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// The normalized parameter record, evaluated once and memoized.
    ///
    /// Fails when the metadata carries errors; `check()` reports the
    /// same problems without failing.
    pub fn params(&mut self) -> Result<&ProfileParams> {
        let (errors, _) = self.metadata.valid();
        if !errors.is_empty() {
            return Err(ProfileError::Metadata {
                reason: errors.join("; "),
            });
        }
        Ok(&self.evaluate()?.params)
    }

    /// Like `params`, with execution-only fields stripped and impact
    /// clamped. Byte-stable for a fixed input tree.
    pub fn info(&mut self) -> Result<ProfileInfo> {
        let params = self.params()?;
        Ok(ProfileInfo {
            name: params.name.clone(),
            version: params.version.clone(),
            title: params.title.clone(),
            maintainer: params.maintainer.clone(),
            copyright: params.copyright.clone(),
            copyright_email: params.copyright_email.clone(),
            license: params.license.clone(),
            summary: params.summary.clone(),
            supports: params.supports.clone(),
            controls: params
                .controls
                .iter()
                .map(|control| ControlInfo {
                    id: control.id.clone(),
                    title: control.title.clone(),
                    desc: control.desc.clone(),
                    impact: control.effective_impact(),
                    refs: control.refs.clone(),
                    tags: control.tags.clone(),
                    code: control.code.clone(),
                    source_location: control.source_location.clone(),
                    group_title: control.group_title.clone(),
                    skip: control.skip,
                })
                .collect(),
            groups: params.groups.clone(),
            attributes: params.attributes.clone(),
        })
    }

    pub fn controls_count(&mut self) -> Result<usize> {
        Ok(self.evaluate()?.params.controls.len())
    }

    /// Structured validation. Never fails on profile problems; those
    /// land in the report. `summary.valid` is true iff no errors.
    pub fn check(&mut self) -> Result<CheckReport> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let manifest = self.metadata.source().to_string();
        let (meta_errors, meta_warnings) = self.metadata.valid();
        for msg in meta_errors {
            errors.push(CheckMessage::new(&manifest, msg).with_line(1));
        }
        for msg in meta_warnings {
            warnings.push(CheckMessage::new(&manifest, msg).with_line(1));
        }
        for key in self.metadata.unsupported() {
            warnings.push(
                CheckMessage::new(&manifest, format!("Unsupported metadata key '{key}'"))
                    .with_line(1),
            );
        }
        for msg in self.reader.warnings() {
            warnings.push(CheckMessage::new(&manifest, msg.clone()));
        }

        let location = self.reader.target().prefix().to_string();
        let profile_name = self.metadata.name().map(str::to_string);

        let evaluated = self.evaluate()?;
        for e in &evaluated.errors {
            errors.push(CheckMessage::new(&e.file, e.message.clone()).with_line(e.line));
        }

        let controls = &evaluated.params.controls;
        if controls.is_empty() {
            warnings.push(CheckMessage::new(&manifest, "No controls or tests were defined"));
        }

        for control in controls {
            let file = control.source_location.file.clone();
            let line = control.source_location.line;
            if control.id.trim().is_empty() {
                errors.push(
                    CheckMessage::new(&file, "Control has an empty id")
                        .with_line(line),
                );
                continue;
            }
            if !control.is_synthetic() {
                if control.title.is_none() {
                    warnings.push(
                        CheckMessage::new(&file, format!("Control '{}' has no title", control.id))
                            .with_line(line)
                            .with_control(control.id.as_str()),
                    );
                }
                if control.desc.is_none() {
                    warnings.push(
                        CheckMessage::new(
                            &file,
                            format!("Control '{}' has no description", control.id),
                        )
                        .with_line(line)
                        .with_control(control.id.as_str()),
                    );
                }
            }
            if let Some(impact) = control.impact {
                if impact > 1.0 {
                    warnings.push(
                        CheckMessage::new(
                            &file,
                            format!(
                                "Control '{}' has impact > 1.0 (found {impact}); it is clamped to 1.0",
                                control.id
                            ),
                        )
                        .with_line(line)
                        .with_control(control.id.as_str()),
                    );
                } else if impact < 0.0 {
                    warnings.push(
                        CheckMessage::new(
                            &file,
                            format!(
                                "Control '{}' has impact < 0.0 (found {impact}); it is clamped to 0.0",
                                control.id
                            ),
                        )
                        .with_line(line)
                        .with_control(control.id.as_str()),
                    );
                }
            }
            if control.checks.is_empty() {
                warnings.push(
                    CheckMessage::new(
                        &file,
                        format!("Control '{}' defines no checks", control.id),
                    )
                    .with_line(line)
                    .with_control(control.id.as_str()),
                );
            }
        }

        Ok(CheckReport {
            summary: CheckSummary {
                valid: errors.is_empty(),
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                location,
                profile: profile_name,
                controls: controls.len(),
            },
            errors,
            warnings,
        })
    }

    /// Package the profile tree. Returns false (without touching
    /// anything) when the destination exists and overwrite is off.
    pub fn archive(&mut self, options: ArchiveOptions) -> Result<bool> {
        let destination = match options.output {
            Some(output) => output,
            None => PathBuf::from(self.archive_name(options.variant)?),
        };

        if destination.exists() {
            if !options.overwrite {
                tracing::warn!(
                    destination = %destination.display(),
                    "archive destination exists and overwrite is not set"
                );
                return Ok(false);
            }
            std::fs::remove_file(&destination)?;
        }

        ArchiveGenerator::new(options.variant).generate(self.reader.target(), &destination)?;
        Ok(true)
    }

    /// Derived archive file name: slugged profile name plus extension.
    fn archive_name(&self, variant: ArchiveVariant) -> Result<String> {
        let name = self.metadata.name().ok_or_else(|| ProfileError::Metadata {
            reason: "cannot derive an archive name without a profile name".to_string(),
        })?;
        let slug: String = name
            .to_lowercase()
            .trim()
            .replace(' ', "-")
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Ok(format!("{slug}.{}", variant.extension()))
    }

    /// Digest of the profile's deterministic tar.gz rendition.
    pub fn sha256(&self) -> Result<String> {
        let bytes =
            ArchiveGenerator::new(ArchiveVariant::TarGz).generate_bytes(self.reader.target())?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Resolve the declared dependencies against the vendor cache,
    /// memoized for the life of the profile.
    pub fn locked_dependencies(&mut self) -> Result<&DependencySet> {
        if self.locked.is_none() {
            let base = self
                .reader
                .target()
                .root_path()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            let cache_root = match &self.options.vendor_cache {
                Some(root) => root.clone(),
                None => match self.reader.target().root_path() {
                    Some(dir) => dir.join("vendor"),
                    None => user_cache_dir(),
                },
            };
            let provider = VendorProvider::new(VendorIndex::new(cache_root), base);
            let set = Resolver::new(&provider).resolve(self.metadata.depends())?;
            self.locked = Some(set);
        }
        Ok(self.locked.as_ref().expect("just resolved"))
    }

    fn evaluate(&mut self) -> Result<&Evaluated> {
        if self.evaluated.is_none() {
            let mut context = ProfileContext::new(
                self.options.id.clone().unwrap_or_default(),
                self.options.attributes.clone(),
            );

            for library in self.reader.libraries()? {
                let logical = library
                    .path
                    .strip_prefix("libraries/")
                    .unwrap_or(&library.path)
                    .to_string();
                context.loader_mut().add(
                    &logical,
                    library.bytes,
                    library.source_ref,
                    library.start_line,
                );
            }
            context.autoload_libraries();

            for (path, bytes) in self.reader.tests()? {
                match String::from_utf8(bytes) {
                    Ok(source) => context.eval_file(&path, &source),
                    Err(_) => context.record_error(EvalError {
                        file: path,
                        line: 1,
                        message: "control file is not valid UTF-8".to_string(),
                    }),
                }
            }

            let params = ProfileParams {
                name: self.metadata.name().map(str::to_string),
                version: self.metadata.version().map(str::to_string),
                title: self.metadata.title().map(str::to_string),
                maintainer: self.metadata.maintainer().map(str::to_string),
                copyright: self.metadata.copyright().map(str::to_string),
                copyright_email: self.metadata.copyright_email().map(str::to_string),
                license: self.metadata.license().map(str::to_string),
                summary: self.metadata.summary().map(str::to_string),
                supports: self.metadata.supports().to_vec(),
                controls: context.rules().to_vec(),
                groups: context.groups().to_vec(),
                attributes: context.attributes().to_vec(),
            };
            self.evaluated = Some(Evaluated {
                params,
                errors: context.errors().to_vec(),
            });
        }
        Ok(self.evaluated.as_ref().expect("just evaluated"))
    }
}

/// Per-user vendor cache for profiles whose target is not a directory.
fn user_cache_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home).join(".attest").join("cache");
        }
    }
    PathBuf::from(".attest-cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_profile(dir: &std::path::Path, manifest: &str, controls: &[(&str, &str)]) {
        std::fs::create_dir_all(dir.join("controls")).unwrap();
        std::fs::write(dir.join("inspec.yml"), manifest).unwrap();
        for (name, content) in controls {
            std::fs::write(dir.join("controls").join(name), content).unwrap();
        }
    }

    #[test]
    fn for_target_reads_a_directory_profile() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(
            dir.path(),
            "name: sample\nversion: 1.0.0\n",
            &[("a.rb", "control 'c1' do\n  impact 0.7\nend\n")],
        );

        let mut profile = Profile::for_target(
            dir.path().to_str().unwrap(),
            ProfileOptions::default(),
        )
        .unwrap();
        assert_eq!(profile.name(), Some("sample"));
        let params = profile.params().unwrap();
        assert_eq!(params.controls.len(), 1);
        assert_eq!(params.control("c1").unwrap().impact, Some(0.7));
    }

    #[test]
    fn params_fails_on_invalid_metadata_but_check_reports() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "version: 1.0.0\n", &[]);

        let mut profile = Profile::for_target(
            dir.path().to_str().unwrap(),
            ProfileOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            profile.params(),
            Err(ProfileError::Metadata { .. })
        ));

        let report = profile.check().unwrap();
        assert!(!report.summary.valid);
        assert!(report.errors.iter().any(|e| e.msg.contains("name")));
    }

    #[test]
    fn params_are_memoized() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(
            dir.path(),
            "name: memo\nversion: 1.0.0\n",
            &[("a.rb", "describe file('/x') do\nend\n")],
        );

        let mut profile = Profile::for_target(
            dir.path().to_str().unwrap(),
            ProfileOptions::default(),
        )
        .unwrap();
        // Synthetic ids embed randomness; a second params() call must
        // return the same evaluation, not a new one.
        let first = profile.params().unwrap().controls[0].id.clone();
        let second = profile.params().unwrap().controls[0].id.clone();
        assert_eq!(first, second);
    }

    #[test]
    fn archive_name_is_derived_from_the_profile_name() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "name: My Profile (v2)\nversion: 1.0.0\n", &[]);

        let profile = Profile::for_target(
            dir.path().to_str().unwrap(),
            ProfileOptions::default(),
        )
        .unwrap();
        assert_eq!(
            profile.archive_name(ArchiveVariant::TarGz).unwrap(),
            "my-profile-_v2_.tar.gz"
        );
        assert_eq!(
            profile.archive_name(ArchiveVariant::Zip).unwrap(),
            "my-profile-_v2_.zip"
        );
    }

    #[test]
    fn archive_refuses_existing_destination_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "name: arch\nversion: 1.0.0\n", &[]);
        let dest = dir.path().join("out.tar.gz");
        std::fs::write(&dest, b"occupied").unwrap();

        let mut profile = Profile::for_target(
            dir.path().to_str().unwrap(),
            ProfileOptions::default(),
        )
        .unwrap();

        let refused = profile
            .archive(ArchiveOptions {
                output: Some(dest.clone()),
                ..Default::default()
            })
            .unwrap();
        assert!(!refused);
        assert_eq!(std::fs::read(&dest).unwrap(), b"occupied");

        let replaced = profile
            .archive(ArchiveOptions {
                output: Some(dest.clone()),
                overwrite: true,
                ..Default::default()
            })
            .unwrap();
        assert!(replaced);
        assert_ne!(std::fs::read(&dest).unwrap(), b"occupied");
    }

    #[test]
    fn id_override_prefixes_rule_ids_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(
            dir.path(),
            "name: inner\nversion: 1.0.0\n",
            &[("a.rb", "control 'c1' do\nend\n")],
        );

        let mut profile = Profile::for_target(
            dir.path().to_str().unwrap(),
            ProfileOptions {
                id: Some("outer".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(profile.name(), Some("outer"));
        let params = profile.params().unwrap();
        assert!(params.control("outer/c1").is_some());
    }
}
