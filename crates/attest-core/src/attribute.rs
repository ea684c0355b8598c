//! Profile-level parameters declared by evaluated control code.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

/// An attribute registration plus its resolved value.
///
/// The value is the caller-supplied binding when one exists, else the
/// declared default, else unset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub options: AttributeOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Attribute {
    pub fn resolve(name: impl Into<String>, options: AttributeOptions, binding: Option<&Value>) -> Self {
        let value = binding.cloned().or_else(|| options.default.clone());
        Self {
            name: name.into(),
            options,
            value,
        }
    }

    /// True when the attribute is required but ended up with no value.
    pub fn missing_required(&self) -> bool {
        self.options.required && self.value.is_none()
    }
}
