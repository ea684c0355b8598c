//! Profile manifest parsing, finalization, and validation.
//!
//! The preferred manifest is YAML (`inspec.yml`). The deprecated
//! imperative form (`metadata.rb`) sets the same keys through top-level
//! setter calls and is parsed with a deliberately small line grammar.
//!
//! Parsing never fails on unrecognized keys; they are collected and
//! surfaced as warnings so newer manifests stay loadable.

use crate::requirement::{DependencyEntry, Requirement};
use crate::version::parse_version;
use serde::Serialize;
use serde_yaml::Value;

/// Manifest keys the core understands. Everything else is unsupported.
const RECOGNIZED_KEYS: &[&str] = &[
    "name",
    "title",
    "maintainer",
    "copyright",
    "copyright_email",
    "license",
    "summary",
    "version",
    "supports",
    "depends",
    "inspec_version",
];

/// A normalized platform-compatibility constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupportEntry {
    #[serde(rename = "os-name", skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(rename = "os-family", skip_serializing_if = "Option::is_none")]
    pub os_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Manifest file the record was read from, for diagnostics.
    source: String,
    legacy: bool,

    name: Option<String>,
    title: Option<String>,
    maintainer: Option<String>,
    copyright: Option<String>,
    copyright_email: Option<String>,
    license: Option<String>,
    summary: Option<String>,
    version: Option<String>,
    inspec_version: Option<String>,

    raw_supports: Vec<Value>,
    raw_depends: Vec<Value>,
    unsupported: Vec<String>,

    supports: Vec<SupportEntry>,
    depends: Vec<Requirement>,
    support_errors: Vec<String>,
    dependency_errors: Vec<String>,
    finalized: bool,
}

impl Metadata {
    /// Parse the YAML manifest form.
    pub fn from_yaml(source: &str, content: &str) -> Result<Self, serde_yaml::Error> {
        let doc: Value = serde_yaml::from_str(content)?;
        let mut meta = Metadata {
            source: source.to_string(),
            ..Default::default()
        };

        let Value::Mapping(mapping) = doc else {
            // An empty or scalar manifest has no keys; validation will
            // report the missing name.
            return Ok(meta);
        };

        for (key, value) in mapping {
            let Some(key) = key.as_str().map(str::to_string) else {
                continue;
            };
            match key.as_str() {
                "name" => meta.name = scalar_string(&value),
                "title" => meta.title = scalar_string(&value),
                "maintainer" => meta.maintainer = scalar_string(&value),
                "copyright" => meta.copyright = scalar_string(&value),
                "copyright_email" => meta.copyright_email = scalar_string(&value),
                "license" => meta.license = scalar_string(&value),
                "summary" => meta.summary = scalar_string(&value),
                "version" => meta.version = scalar_string(&value),
                "inspec_version" => meta.inspec_version = scalar_string(&value),
                "supports" => match value {
                    Value::Sequence(seq) => meta.raw_supports = seq,
                    other => meta.raw_supports = vec![other],
                },
                "depends" => match value {
                    Value::Sequence(seq) => meta.raw_depends = seq,
                    other => meta.raw_depends = vec![other],
                },
                _ => meta.unsupported.push(key),
            }
        }

        Ok(meta)
    }

    /// Parse the deprecated imperative manifest form: one `key 'value'`
    /// setter per line.
    pub fn from_legacy(source: &str, content: &str) -> Self {
        let mut meta = Metadata {
            source: source.to_string(),
            legacy: true,
            ..Default::default()
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, rest)) = line.split_once(char::is_whitespace) else {
                continue;
            };
            let value = unquote(rest.trim());
            match key {
                "name" => meta.name = Some(value),
                "title" => meta.title = Some(value),
                "maintainer" => meta.maintainer = Some(value),
                "copyright" => meta.copyright = Some(value),
                "copyright_email" => meta.copyright_email = Some(value),
                "license" => meta.license = Some(value),
                "summary" | "description" => meta.summary = Some(value),
                "version" => meta.version = Some(value),
                _ => meta.unsupported.push(key.to_string()),
            }
        }

        meta
    }

    /// Apply the finalization rules, in order: id override, supports
    /// normalization, dependency conversion.
    pub fn finalize(&mut self, id_override: Option<&str>) {
        if let Some(id) = id_override {
            if !id.is_empty() {
                self.name = Some(id.to_string());
            }
        }

        self.supports.clear();
        self.support_errors.clear();
        for raw in &self.raw_supports {
            match normalize_support(raw) {
                Ok((entry, unknown)) => {
                    self.supports.push(entry);
                    self.unsupported
                        .extend(unknown.into_iter().map(|k| format!("supports.{k}")));
                }
                Err(reason) => self.support_errors.push(reason),
            }
        }

        self.depends.clear();
        self.dependency_errors.clear();
        for raw in &self.raw_depends {
            match serde_yaml::from_value::<DependencyEntry>(raw.clone()) {
                Ok(entry) => match Requirement::from_entry(&entry) {
                    Ok(req) => self.depends.push(req),
                    Err(reason) => self.dependency_errors.push(reason),
                },
                Err(e) => self
                    .dependency_errors
                    .push(format!("malformed dependency entry: {e}")),
            }
        }

        self.finalized = true;
    }

    /// Structured validation: `(errors, warnings)`.
    ///
    /// Errors make `params()` fail; warnings never do.
    pub fn valid(&self) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => {}
            _ => errors.push("Missing profile name in metadata: 'name' is required".to_string()),
        }

        match self.version.as_deref() {
            None => warnings.push("Missing profile version in metadata".to_string()),
            Some(version) => {
                if parse_version(version).is_err() {
                    errors.push(format!(
                        "Version '{version}' is not a valid semantic version"
                    ));
                }
            }
        }

        if self.title.is_none() {
            warnings.push("Missing profile title in metadata".to_string());
        }
        if self.summary.is_none() {
            warnings.push("Missing profile summary in metadata".to_string());
        }
        if self.maintainer.is_none() {
            warnings.push("Missing profile maintainer in metadata".to_string());
        }

        errors.extend(self.support_errors.iter().cloned());
        errors.extend(self.dependency_errors.iter().cloned());

        (errors, warnings)
    }

    /// Manifest keys outside the recognized set.
    pub fn unsupported(&self) -> &[String] {
        &self.unsupported
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn maintainer(&self) -> Option<&str> {
        self.maintainer.as_deref()
    }

    pub fn copyright(&self) -> Option<&str> {
        self.copyright.as_deref()
    }

    pub fn copyright_email(&self) -> Option<&str> {
        self.copyright_email.as_deref()
    }

    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn inspec_version(&self) -> Option<&str> {
        self.inspec_version.as_deref()
    }

    pub fn supports(&self) -> &[SupportEntry] {
        &self.supports
    }

    pub fn depends(&self) -> &[Requirement] {
        &self.depends
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'\'' && bytes[s.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[s.len() - 1] == b'"')
        {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

/// Normalize a raw `supports` entry to the canonical key set, returning
/// the entry plus any unknown platform keys found alongside it.
fn normalize_support(raw: &Value) -> Result<(SupportEntry, Vec<String>), String> {
    let Value::Mapping(mapping) = raw else {
        return Err(format!(
            "malformed supports entry: expected a mapping, got {}",
            describe_value(raw)
        ));
    };

    let mut entry = SupportEntry::default();
    let mut unknown = Vec::new();
    for (key, value) in mapping {
        let Some(key) = key.as_str() else {
            return Err("malformed supports entry: non-string key".to_string());
        };
        let Some(value) = scalar_string(value) else {
            return Err(format!(
                "malformed supports entry: '{key}' must be a scalar"
            ));
        };
        match key {
            "os-name" | "os_name" | "platform-name" | "platform" => {
                entry.os_name = Some(value);
            }
            "os-family" | "os_family" | "platform-family" => {
                entry.os_family = Some(value);
            }
            "release" => entry.release = Some(value),
            other => unknown.push(other.to_string()),
        }
    }

    Ok((entry, unknown))
}

fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Recognized top-level manifest keys, exposed for reader diagnostics.
pub fn recognized_keys() -> &'static [&'static str] {
    RECOGNIZED_KEYS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Metadata {
        let mut meta = Metadata::from_yaml("inspec.yml", content).unwrap();
        meta.finalize(None);
        meta
    }

    #[test]
    fn minimal_manifest_is_valid_with_warnings() {
        let meta = parse("name: p\nversion: 1.0.0\n");
        let (errors, warnings) = meta.valid();
        assert!(errors.is_empty());
        assert!(warnings.iter().any(|w| w.contains("title")));
        assert!(warnings.iter().any(|w| w.contains("summary")));
        assert!(warnings.iter().any(|w| w.contains("maintainer")));
    }

    #[test]
    fn missing_name_is_an_error() {
        let meta = parse("version: 1.0.0\n");
        let (errors, _) = meta.valid();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("name"));
        assert!(errors[0].contains("required"));
    }

    #[test]
    fn non_semver_version_is_an_error() {
        let meta = parse("name: p\nversion: not-a-version\n");
        let (errors, _) = meta.valid();
        assert!(errors.iter().any(|e| e.contains("semantic version")));
    }

    #[test]
    fn missing_version_is_only_a_warning() {
        let meta = parse("name: p\n");
        let (errors, warnings) = meta.valid();
        assert!(errors.is_empty());
        assert!(warnings.iter().any(|w| w.contains("version")));
    }

    #[test]
    fn unsupported_keys_are_collected_not_fatal() {
        let meta = parse("name: p\nversion: 1.0.0\nflavor: spicy\n");
        assert_eq!(meta.unsupported(), &["flavor".to_string()]);
        assert!(meta.valid().0.is_empty());
    }

    #[test]
    fn supports_aliases_normalize() {
        let meta = parse(
            "name: p\nsupports:\n  - os-family: linux\n    release: '22.04'\n  - platform: ubuntu\n",
        );
        assert_eq!(meta.supports().len(), 2);
        assert_eq!(meta.supports()[0].os_family.as_deref(), Some("linux"));
        assert_eq!(meta.supports()[0].release.as_deref(), Some("22.04"));
        assert_eq!(meta.supports()[1].os_name.as_deref(), Some("ubuntu"));
    }

    #[test]
    fn scalar_supports_entry_is_malformed() {
        let meta = parse("name: p\nsupports:\n  - linux\n");
        let (errors, _) = meta.valid();
        assert!(errors.iter().any(|e| e.contains("malformed supports")));
    }

    #[test]
    fn unknown_platform_key_is_unsupported_warning_material() {
        let meta = parse("name: p\nsupports:\n  - os-family: linux\n    kernel: '5.10'\n");
        assert!(meta
            .unsupported()
            .iter()
            .any(|k| k == "supports.kernel"));
        assert!(meta.valid().0.is_empty());
    }

    #[test]
    fn depends_convert_to_requirements() {
        let meta = parse(
            "name: p\ndepends:\n  - name: linux-baseline\n    path: ../linux-baseline\n    version: '>= 2.0'\n",
        );
        assert_eq!(meta.depends().len(), 1);
        assert_eq!(meta.depends()[0].name, "linux-baseline");
    }

    #[test]
    fn malformed_dependency_accumulates_as_error() {
        let meta = parse("name: p\ndepends:\n  - path: ../nameless\n");
        let (errors, _) = meta.valid();
        assert!(errors.iter().any(|e| e.contains("missing a name")));
    }

    #[test]
    fn id_override_replaces_name() {
        let mut meta = Metadata::from_yaml("inspec.yml", "name: original\n").unwrap();
        meta.finalize(Some("overridden"));
        assert_eq!(meta.name(), Some("overridden"));
    }

    #[test]
    fn legacy_setter_form_parses() {
        let meta = Metadata::from_legacy(
            "metadata.rb",
            "name 'legacy-profile'\nversion '1.2.3'\nmaintainer \"Ops\"\n# comment\n",
        );
        assert!(meta.is_legacy());
        assert_eq!(meta.name(), Some("legacy-profile"));
        assert_eq!(meta.version(), Some("1.2.3"));
        assert_eq!(meta.maintainer(), Some("Ops"));
    }

    #[test]
    fn yaml_version_as_number_still_reads() {
        let meta = parse("name: p\nversion: 1.0\n");
        assert_eq!(meta.version(), Some("1.0"));
        // "1.0" is not full semver, so it is an error.
        assert!(!meta.valid().0.is_empty());
    }
}
