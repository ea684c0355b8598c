//! Structured, non-throwing validation report.

use serde::Serialize;

/// One diagnostic in a check report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckMessage {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_id: Option<String>,
    pub msg: String,
}

impl CheckMessage {
    pub fn new(file: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
            control_id: None,
            msg: msg.into(),
        }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_control(mut self, control_id: impl Into<String>) -> Self {
        self.control_id = Some(control_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    /// True iff no errors were found. Warnings never affect validity.
    pub valid: bool,
    /// RFC 3339 time the check ran.
    pub timestamp: String,
    /// Where the profile was read from.
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Number of registered controls.
    pub controls: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub summary: CheckSummary,
    pub errors: Vec<CheckMessage>,
    pub warnings: Vec<CheckMessage>,
}

impl CheckReport {
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
