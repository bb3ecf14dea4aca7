//! JSON rule-set documents.
//!
//! A document has the shape
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "parameters": [{ "name": "Region", "type": "String", "required": true }],
//!   "rules": [
//!     {
//!       "conditions": [{ "fn": "isSet", "argv": [{ "ref": "Region" }] }],
//!       "type": "endpoint",
//!       "endpoint": { "url": "https://{Region}.example.com" }
//!     },
//!     { "conditions": [], "type": "error", "error": "Region must be set" }
//!   ]
//! }
//! ```
//!
//! Argument values map onto [`Expr`]: strings are templates, integers and
//! booleans are literals, `{"ref": name}` is a reference, `{"fn", "argv"}` is
//! a call (or an attribute lookup for `getAttr`), and any other object is a
//! record literal.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json, json};
use thiserror::Error;

use crate::parse::{ParseError, parse_attr_path};
use crate::types::child_path;
use crate::{
    Builtin, Condition, Endpoint, EndpointError, Expr, Parameter, Rule, RuleBody, RuleResult,
    RuleSet, path_to_string,
};

/// Errors raised while turning JSON into rules.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid rule at {path}: {message}")]
    InvalidRule { path: String, message: String },

    #[error("unknown function '{name}' at {path}")]
    UnknownFunction { name: String, path: String },

    #[error("invalid argument at {path}: {message}")]
    InvalidArgument { path: String, message: String },

    #[error("bad template at {path}: {source}")]
    Template { path: String, source: ParseError },
}

const GET_ATTR: &str = "getAttr";

#[derive(Debug, Deserialize)]
struct RawRuleSet {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    parameters: Vec<Parameter>,
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    conditions: Vec<Json>,
    #[serde(default)]
    documentation: Option<String>,
    #[serde(flatten)]
    body: RawBody,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum RawBody {
    Tree { rules: Vec<RawRule> },
    Endpoint { endpoint: Json },
    Error { error: Json },
}

pub(crate) fn parse_ruleset(input: &str) -> Result<RuleSet, EndpointError> {
    let raw: RawRuleSet = serde_json::from_str(input)?;
    let rules = raw
        .rules
        .into_iter()
        .enumerate()
        .map(|(i, r)| rule_from_raw(r, &child_path("rules", i)))
        .collect::<Result<Vec<_>, _>>()?;
    let mut ruleset = RuleSet::new(raw.parameters, rules)?;
    ruleset.version = raw.version;
    log::debug!("loaded {ruleset}");
    Ok(ruleset)
}

fn rule_from_raw(raw: RawRule, path: &str) -> Result<Rule, DocumentError> {
    let conditions = raw
        .conditions
        .iter()
        .map(|c| Condition::from_json_at(c, path))
        .collect::<Result<Vec<_>, _>>()?;
    let body = match raw.body {
        RawBody::Tree { rules } => RuleBody::Tree(
            rules
                .into_iter()
                .enumerate()
                .map(|(i, r)| rule_from_raw(r, &child_path(path, i)))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        RawBody::Endpoint { endpoint } => RuleBody::Endpoint(endpoint_from_json(&endpoint, path)?),
        RawBody::Error { error } => RuleBody::Error(Expr::from_json_at(&error, path)?),
    };
    Ok(Rule {
        conditions,
        body,
        documentation: raw.documentation,
    })
}

fn endpoint_from_json(json: &Json, path: &str) -> Result<Endpoint, DocumentError> {
    let invalid = |message: &str| DocumentError::InvalidRule {
        path: path.to_owned(),
        message: message.to_owned(),
    };
    let obj = json.as_object().ok_or_else(|| invalid("endpoint must be an object"))?;
    let url = obj.get("url").ok_or_else(|| invalid("endpoint has no url"))?;
    let mut endpoint = Endpoint::new(Expr::from_json_at(url, path)?);

    if let Some(headers) = obj.get("headers") {
        let headers = headers
            .as_object()
            .ok_or_else(|| invalid("endpoint headers must be an object"))?;
        for (name, values) in headers {
            let values = values
                .as_array()
                .ok_or_else(|| invalid("header values must be an array"))?;
            let values = values
                .iter()
                .map(|v| Expr::from_json_at(v, path))
                .collect::<Result<Vec<_>, _>>()?;
            endpoint.headers.insert(name.clone(), values);
        }
    }
    if let Some(properties) = obj.get("properties") {
        let properties = properties
            .as_object()
            .ok_or_else(|| invalid("endpoint properties must be an object"))?;
        for (name, value) in properties {
            endpoint
                .properties
                .insert(name.clone(), Expr::from_json_at(value, path)?);
        }
    }
    Ok(endpoint)
}

impl Expr {
    /// Encode as a document argument value.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Expr::Str(t) => Json::String(t.to_string()),
            Expr::Int(i) => Json::from(*i),
            Expr::Bool(b) => Json::Bool(*b),
            Expr::Array(items) => Json::Array(items.iter().map(Expr::to_json).collect()),
            Expr::Record(map) => {
                Json::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            Expr::Ref(name) => json!({ "ref": name }),
            Expr::Call { function, args } => json!({
                "fn": function.name(),
                "argv": args.iter().map(Expr::to_json).collect::<Vec<_>>(),
            }),
            Expr::GetAttr { target, path } => json!({
                "fn": GET_ATTR,
                "argv": [target.to_json(), path_to_string(path)],
            }),
        }
    }

    /// Decode a document argument value.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] for unknown functions, malformed templates,
    /// nulls and non-integer numbers.
    pub fn from_json(json: &Json) -> Result<Expr, DocumentError> {
        Self::from_json_at(json, "expression")
    }

    fn from_json_at(json: &Json, path: &str) -> Result<Expr, DocumentError> {
        let invalid = |message: String| DocumentError::InvalidArgument {
            path: path.to_owned(),
            message,
        };
        match json {
            Json::String(s) => Expr::template(s).map_err(|source| DocumentError::Template {
                path: path.to_owned(),
                source,
            }),
            Json::Number(n) => n
                .as_i64()
                .map(Expr::Int)
                .ok_or_else(|| invalid(format!("{n} is not an integer"))),
            Json::Bool(b) => Ok(Expr::Bool(*b)),
            Json::Array(items) => items
                .iter()
                .map(|v| Expr::from_json_at(v, path))
                .collect::<Result<Vec<_>, _>>()
                .map(Expr::Array),
            Json::Object(obj) => {
                if let Some(name) = obj.get("ref") {
                    let name = name
                        .as_str()
                        .ok_or_else(|| invalid("ref must be a string".to_owned()))?;
                    return Ok(Expr::Ref(name.to_owned()));
                }
                if obj.contains_key("fn") {
                    return call_from_json(obj, path);
                }
                obj.iter()
                    .map(|(k, v)| Ok((k.clone(), Expr::from_json_at(v, path)?)))
                    .collect::<Result<BTreeMap<_, _>, DocumentError>>()
                    .map(Expr::Record)
            }
            Json::Null => Err(invalid("null is not a value".to_owned())),
        }
    }
}

fn call_from_json(obj: &Map<String, Json>, path: &str) -> Result<Expr, DocumentError> {
    let invalid = |message: &str| DocumentError::InvalidArgument {
        path: path.to_owned(),
        message: message.to_owned(),
    };
    let name = obj
        .get("fn")
        .and_then(Json::as_str)
        .ok_or_else(|| invalid("fn must be a string"))?;
    let argv = match obj.get("argv") {
        Some(Json::Array(argv)) => argv.as_slice(),
        Some(_) => return Err(invalid("argv must be an array")),
        None => &[],
    };

    if name == GET_ATTR {
        let [target, attr] = argv else {
            return Err(invalid("getAttr takes a target and a path"));
        };
        let attr = attr
            .as_str()
            .ok_or_else(|| invalid("getAttr path must be a string"))?;
        let attr_path = parse_attr_path(attr).map_err(|source| DocumentError::Template {
            path: path.to_owned(),
            source,
        })?;
        return Ok(Expr::GetAttr {
            target: Box::new(Expr::from_json_at(target, path)?),
            path: attr_path,
        });
    }

    let function = Builtin::from_name(name).ok_or_else(|| DocumentError::UnknownFunction {
        name: name.to_owned(),
        path: path.to_owned(),
    })?;
    let args = argv
        .iter()
        .map(|v| Expr::from_json_at(v, path))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Expr::Call { function, args })
}

impl Condition {
    /// Encode as `{"fn", "argv", "assign"}`. A bare reference condition is
    /// written as `{"ref", "assign"}`.
    #[must_use]
    pub fn to_json(&self) -> Json {
        let mut json = self.expr.to_json();
        if let (Json::Object(obj), Some(name)) = (&mut json, &self.assign) {
            obj.insert("assign".to_owned(), Json::String(name.clone()));
        }
        json
    }

    /// Decode a document condition.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] if the condition is not a call or reference.
    pub fn from_json(json: &Json) -> Result<Condition, DocumentError> {
        Self::from_json_at(json, "condition")
    }

    fn from_json_at(json: &Json, path: &str) -> Result<Condition, DocumentError> {
        let obj = json.as_object().ok_or_else(|| DocumentError::InvalidRule {
            path: path.to_owned(),
            message: "condition must be an object".to_owned(),
        })?;
        if !obj.contains_key("fn") && !obj.contains_key("ref") {
            return Err(DocumentError::InvalidRule {
                path: path.to_owned(),
                message: "condition needs an fn or a ref".to_owned(),
            });
        }
        let assign = match obj.get("assign") {
            None => None,
            Some(Json::String(name)) => Some(name.clone()),
            Some(_) => {
                return Err(DocumentError::InvalidRule {
                    path: path.to_owned(),
                    message: "assign must be a string".to_owned(),
                });
            }
        };
        let mut expr_obj = obj.clone();
        expr_obj.remove("assign");
        Ok(Condition {
            expr: Expr::from_json_at(&Json::Object(expr_obj), path)?,
            assign,
        })
    }
}

impl RuleResult {
    /// Encode in the `{type, endpoint | error}` shape of rule documents.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            RuleResult::NoMatch => json!({ "type": "noMatch" }),
            RuleResult::Endpoint(e) => {
                json!({ "type": "endpoint", "endpoint": endpoint_to_json(e) })
            }
            RuleResult::Error(message) => json!({ "type": "error", "error": message.to_json() }),
        }
    }

    /// Decode a result written by [`to_json()`](Self::to_json).
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] on an unknown type or a malformed body.
    pub fn from_json(json: &Json) -> Result<RuleResult, DocumentError> {
        let path = "result";
        let invalid = |message: &str| DocumentError::InvalidRule {
            path: path.to_owned(),
            message: message.to_owned(),
        };
        match json.get("type").and_then(Json::as_str) {
            Some("noMatch") => Ok(RuleResult::NoMatch),
            Some("endpoint") => {
                let body = json.get("endpoint").ok_or_else(|| invalid("missing endpoint"))?;
                Ok(RuleResult::Endpoint(endpoint_from_json(body, path)?))
            }
            Some("error") => {
                let body = json.get("error").ok_or_else(|| invalid("missing error"))?;
                Ok(RuleResult::Error(Expr::from_json_at(body, path)?))
            }
            _ => Err(invalid("unknown result type")),
        }
    }
}

fn endpoint_to_json(endpoint: &Endpoint) -> Json {
    let mut obj = Map::new();
    obj.insert("url".to_owned(), endpoint.url.to_json());
    if !endpoint.headers.is_empty() {
        let headers = endpoint
            .headers
            .iter()
            .map(|(k, vs)| (k.clone(), Json::Array(vs.iter().map(Expr::to_json).collect())))
            .collect();
        obj.insert("headers".to_owned(), Json::Object(headers));
    }
    if !endpoint.properties.is_empty() {
        let properties = endpoint
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        obj.insert("properties".to_owned(), Json::Object(properties));
    }
    Json::Object(obj)
}

fn rule_to_json(rule: &Rule) -> Json {
    let mut obj = Map::new();
    if let Some(docs) = &rule.documentation {
        obj.insert("documentation".to_owned(), Json::String(docs.clone()));
    }
    obj.insert(
        "conditions".to_owned(),
        Json::Array(rule.conditions.iter().map(Condition::to_json).collect()),
    );
    match &rule.body {
        RuleBody::Tree(children) => {
            obj.insert("type".to_owned(), json!("tree"));
            obj.insert(
                "rules".to_owned(),
                Json::Array(children.iter().map(rule_to_json).collect()),
            );
        }
        RuleBody::Endpoint(e) => {
            obj.insert("type".to_owned(), json!("endpoint"));
            obj.insert("endpoint".to_owned(), endpoint_to_json(e));
        }
        RuleBody::Error(message) => {
            obj.insert("type".to_owned(), json!("error"));
            obj.insert("error".to_owned(), message.to_json());
        }
    }
    Json::Object(obj)
}

impl RuleSet {
    /// Encode as a rule-set document accepted by [`RuleSet::from_json()`].
    #[must_use]
    pub fn to_json(&self) -> Json {
        let mut obj = Map::new();
        if let Some(version) = &self.version {
            obj.insert("version".to_owned(), Json::String(version.clone()));
        }
        obj.insert(
            "parameters".to_owned(),
            Json::Array(
                self.parameters
                    .iter()
                    .filter_map(|p| serde_json::to_value(p).ok())
                    .collect(),
            ),
        );
        obj.insert(
            "rules".to_owned(),
            Json::Array(self.rules.iter().map(rule_to_json).collect()),
        );
        Json::Object(obj)
    }
}

macro_rules! json_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.to_json().serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let json = Json::deserialize(deserializer)?;
                <$ty>::from_json(&json).map_err(serde::de::Error::custom)
            }
        }
    };
}

json_serde!(Expr);
json_serde!(Condition);
json_serde!(RuleResult);
