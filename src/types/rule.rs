use std::collections::BTreeMap;
use std::fmt;

use super::condition::Condition;
use super::expr::Expr;

/// An ordered, conjunctive list of conditions followed by a body.
///
/// Rules are created via [`RuleSetBuilder`](super::RuleSetBuilder) or loaded
/// from a JSON document with [`RuleSet::from_json()`](super::RuleSet::from_json).
/// The first rule in a list whose conditions all hold (and, for trees, one
/// of whose children matches) decides the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub conditions: Vec<Condition>,
    pub body: RuleBody,
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleBody {
    /// Nested rules tried in order once the conditions hold.
    Tree(Vec<Rule>),
    Endpoint(Endpoint),
    /// An error whose message is a string expression, usually a template.
    Error(Expr),
}

/// Endpoint templates: the URL, header values and auth-scheme properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub url: Expr,
    pub headers: BTreeMap<String, Vec<Expr>>,
    pub properties: BTreeMap<String, Expr>,
}

impl Endpoint {
    pub fn new(url: Expr) -> Self {
        Self {
            url,
            headers: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    pub(crate) fn expressions(&self) -> impl Iterator<Item = &Expr> {
        std::iter::once(&self.url)
            .chain(self.headers.values().flatten())
            .chain(self.properties.values())
    }

    pub(crate) fn rename_references(&self, rename: &impl Fn(&str) -> String) -> Endpoint {
        Endpoint {
            url: self.url.rename_references(rename),
            headers: self
                .headers
                .iter()
                .map(|(k, vs)| {
                    (
                        k.clone(),
                        vs.iter().map(|v| v.rename_references(rename)).collect(),
                    )
                })
                .collect(),
            properties: self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.rename_references(rename)))
                .collect(),
        }
    }
}

/// A terminal of the rule set. Interned into the result table, where
/// [`RuleResult::NoMatch`] always sits at index 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleResult {
    NoMatch,
    Endpoint(Endpoint),
    Error(Expr),
}

impl RuleResult {
    pub(crate) fn expressions(&self) -> Vec<&Expr> {
        match self {
            RuleResult::NoMatch => Vec::new(),
            RuleResult::Endpoint(e) => e.expressions().collect(),
            RuleResult::Error(message) => vec![message],
        }
    }

    /// Rebuild with every reference renamed through `rename`.
    pub(crate) fn rename_references(&self, rename: &impl Fn(&str) -> String) -> RuleResult {
        match self {
            RuleResult::NoMatch => RuleResult::NoMatch,
            RuleResult::Endpoint(e) => RuleResult::Endpoint(e.rename_references(rename)),
            RuleResult::Error(message) => RuleResult::Error(message.rename_references(rename)),
        }
    }
}

impl fmt::Display for RuleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleResult::NoMatch => f.write_str("no match"),
            RuleResult::Endpoint(e) => write!(f, "endpoint({})", e.url),
            RuleResult::Error(message) => write!(f, "error({message})"),
        }
    }
}

impl Rule {
    /// The terminal this rule ends in, if it is not a tree.
    #[must_use]
    pub fn result(&self) -> Option<RuleResult> {
        match &self.body {
            RuleBody::Tree(_) => None,
            RuleBody::Endpoint(e) => Some(RuleResult::Endpoint(e.clone())),
            RuleBody::Error(message) => Some(RuleResult::Error(message.clone())),
        }
    }

    /// Number of conditions in this rule and all nested rules.
    #[must_use]
    pub fn condition_count(&self) -> usize {
        self.conditions.len()
            + match &self.body {
                RuleBody::Tree(children) => children.iter().map(Rule::condition_count).sum(),
                RuleBody::Endpoint(_) | RuleBody::Error(_) => 0,
            }
    }
}
