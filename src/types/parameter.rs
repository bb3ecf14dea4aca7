use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Declared type of a rule-set parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    #[serde(rename = "String", alias = "string")]
    String,
    #[serde(rename = "Boolean", alias = "boolean")]
    Boolean,
    #[serde(rename = "StringArray", alias = "stringArray")]
    StringArray,
}

impl ParameterType {
    /// Whether `value` is an instance of this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (ParameterType::String, Value::String(_)) => true,
            (ParameterType::Boolean, Value::Bool(_)) => true,
            (ParameterType::StringArray, Value::Array(items)) => {
                items.iter().all(|v| matches!(v, Value::String(_)))
            }
            _ => false,
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParameterType::String => "String",
            ParameterType::Boolean => "Boolean",
            ParameterType::StringArray => "StringArray",
        })
    }
}

/// A named input to the rule set. Declared once and passed through to the
/// compiled artifact untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_in: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            built_in: None,
            default: None,
            documentation: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::String)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Boolean)
    }

    pub fn string_array(name: impl Into<String>) -> Self {
        Self::new(name, ParameterType::StringArray)
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn built_in(mut self, name: impl Into<String>) -> Self {
        self.built_in = Some(name.into());
        self
    }

    #[must_use]
    pub fn documented(mut self, docs: impl Into<String>) -> Self {
        self.documentation = Some(docs.into());
        self
    }
}
