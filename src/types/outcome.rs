use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::Value;

/// What a rule set resolved to for one set of parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[must_use]
pub enum Outcome {
    Endpoint(ResolvedEndpoint),
    Error(String),
    NoMatch,
}

/// An endpoint with every template rendered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedEndpoint {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl Outcome {
    /// Shorthand for an endpoint outcome with only a URL.
    pub fn endpoint(url: impl Into<String>) -> Self {
        Outcome::Endpoint(ResolvedEndpoint {
            url: url.into(),
            ..ResolvedEndpoint::default()
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Outcome::Error(message.into())
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Outcome::Endpoint(e) => Some(&e.url),
            Outcome::Error(_) | Outcome::NoMatch => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Endpoint(e) => write!(f, "endpoint {}", e.url),
            Outcome::Error(message) => write!(f, "error \"{message}\""),
            Outcome::NoMatch => f.write_str("no rule matched"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            Outcome::endpoint("https://a.example.com").to_string(),
            "endpoint https://a.example.com"
        );
        assert_eq!(Outcome::error("nope").to_string(), "error \"nope\"");
        assert_eq!(Outcome::NoMatch.to_string(), "no rule matched");
    }

    #[test]
    fn serializes_like_test_expectations() {
        let json = serde_json::to_value(Outcome::endpoint("https://x")).unwrap();
        assert_eq!(json, serde_json::json!({"endpoint": {"url": "https://x"}}));
        let json = serde_json::to_value(Outcome::error("bad")).unwrap();
        assert_eq!(json, serde_json::json!({"error": "bad"}));
    }
}
