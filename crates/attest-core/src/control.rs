//! Control records and their merge semantics.

use serde::Serialize;
use serde_json::Value;

/// Identifier prefix marking a synthetic (auto-named) control.
pub const GENERATED_PREFIX: &str = "(generated ";

pub const DEFAULT_IMPACT: f64 = 0.5;

/// Where a declaration was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
}

/// One assertion group inside a control, opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSpec {
    pub kind: String,
    pub args: Vec<Value>,
    pub body: String,
}

/// A named, impact-scored group of assertions about a target system.
#[derive(Debug, Clone, Serialize)]
pub struct Control {
    pub id: String,
    pub title: Option<String>,
    pub desc: Option<String>,
    /// As declared; clamped into [0, 1] when reported through `info()`.
    pub impact: Option<f64>,
    pub refs: Vec<Value>,
    pub tags: serde_json::Map<String, Value>,
    pub checks: Vec<CheckSpec>,
    /// Source text of the declaration, forwarded to the runner.
    pub code: String,
    pub source_location: SourceLocation,
    /// Group header (`title` statement) of the declaring file.
    pub group_title: Option<String>,
    pub skip: bool,
}

impl Control {
    pub fn new(id: impl Into<String>, file: impl Into<String>, line: usize) -> Self {
        Self {
            id: id.into(),
            title: None,
            desc: None,
            impact: None,
            refs: Vec::new(),
            tags: serde_json::Map::new(),
            checks: Vec::new(),
            code: String::new(),
            source_location: SourceLocation {
                file: file.into(),
                line,
            },
            group_title: None,
            skip: false,
        }
    }

    /// Synthetic controls come from anonymous `describe` blocks and are
    /// exempt from title/description lint.
    pub fn is_synthetic(&self) -> bool {
        self.id.starts_with(GENERATED_PREFIX)
    }

    /// Impact as reported: clamped into [0, 1], defaulting when missing.
    pub fn effective_impact(&self) -> f64 {
        self.impact.unwrap_or(DEFAULT_IMPACT).clamp(0.0, 1.0)
    }

    /// Merge a re-declaration of the same id into this control.
    ///
    /// Refs union, tags union with last writer winning per key, checks
    /// concatenated in declaration order, title/desc/impact last-writer.
    pub fn merge(&mut self, other: Control) {
        if other.title.is_some() {
            self.title = other.title;
        }
        if other.desc.is_some() {
            self.desc = other.desc;
        }
        if other.impact.is_some() {
            self.impact = other.impact;
        }
        for reference in other.refs {
            if !self.refs.contains(&reference) {
                self.refs.push(reference);
            }
        }
        for (key, value) in other.tags {
            self.tags.insert(key, value);
        }
        self.checks.extend(other.checks);
        self.skip = self.skip || other.skip;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_concatenates_checks_and_takes_last_title() {
        let mut first = Control::new("c1", "controls/a.rb", 1);
        first.title = Some("first".into());
        first.checks.push(CheckSpec {
            kind: "describe".into(),
            args: vec![json!("file('/a')")],
            body: String::new(),
        });

        let mut second = Control::new("c1", "controls/a.rb", 9);
        second.title = Some("second".into());
        second.checks.push(CheckSpec {
            kind: "describe".into(),
            args: vec![json!("file('/b')")],
            body: String::new(),
        });

        first.merge(second);
        assert_eq!(first.checks.len(), 2);
        assert_eq!(first.title.as_deref(), Some("second"));
    }

    #[test]
    fn merge_keeps_existing_fields_when_redeclaration_omits_them() {
        let mut first = Control::new("c1", "controls/a.rb", 1);
        first.desc = Some("kept".into());
        first.impact = Some(0.9);

        first.merge(Control::new("c1", "controls/a.rb", 5));
        assert_eq!(first.desc.as_deref(), Some("kept"));
        assert_eq!(first.impact, Some(0.9));
    }

    #[test]
    fn merge_unions_tags_last_writer_wins() {
        let mut first = Control::new("c1", "a.rb", 1);
        first.tags.insert("severity".into(), json!("low"));
        first.tags.insert("nist".into(), json!(["AC-1"]));

        let mut second = Control::new("c1", "a.rb", 2);
        second.tags.insert("severity".into(), json!("high"));

        first.merge(second);
        assert_eq!(first.tags["severity"], json!("high"));
        assert_eq!(first.tags["nist"], json!(["AC-1"]));
    }

    #[test]
    fn merge_dedups_refs() {
        let mut first = Control::new("c1", "a.rb", 1);
        first.refs.push(json!({"ref": "NIST"}));
        let mut second = Control::new("c1", "a.rb", 2);
        second.refs.push(json!({"ref": "NIST"}));
        second.refs.push(json!({"ref": "CIS"}));

        first.merge(second);
        assert_eq!(first.refs.len(), 2);
    }

    #[test]
    fn impact_clamps_into_unit_interval() {
        let mut c = Control::new("c1", "a.rb", 1);
        assert_eq!(c.effective_impact(), DEFAULT_IMPACT);
        c.impact = Some(2.5);
        assert_eq!(c.effective_impact(), 1.0);
        c.impact = Some(-0.3);
        assert_eq!(c.effective_impact(), 0.0);
    }

    #[test]
    fn synthetic_detection_uses_the_generated_prefix() {
        let c = Control::new("(generated from a.rb:3 0123456789abcdef)", "a.rb", 3);
        assert!(c.is_synthetic());
        assert!(!Control::new("c1", "a.rb", 1).is_synthetic());
    }
}
