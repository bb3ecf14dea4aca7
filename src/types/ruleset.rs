use std::collections::HashSet;
use std::fmt;

use super::condition::Condition;
use super::context::Context;
use super::error::{CompileError, EvalError};
use super::expr::Expr;
use super::outcome::Outcome;
use super::parameter::Parameter;
use super::rule::{Endpoint, Rule, RuleBody};
use crate::EndpointError;

/// Builder for constructing a [`RuleSet`].
///
/// Rules are defined via closures and validated when [`build()`](Self::build)
/// is called. Templates are parsed at that point too, so syntax errors surface
/// together with structural ones.
///
/// # Example
///
/// ```
/// use endpoint_bdd::{Parameter, RuleSetBuilder, is_set, reference};
///
/// let ruleset = RuleSetBuilder::new()
///     .parameter(Parameter::string("Region"))
///     .rule(|r| {
///         r.when(is_set(reference("Region")))
///             .endpoint("https://{Region}.example.com")
///     })
///     .rule(|r| r.error("Region must be set"))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    version: Option<String>,
    parameters: Vec<Parameter>,
    rules: Vec<RuleBuilder>,
}

/// Intermediate builder passed to the rule definition closure.
#[derive(Debug, Default)]
pub struct RuleBuilder {
    conditions: Vec<Condition>,
    body: PendingBody,
    headers: Vec<(String, String)>,
    properties: Vec<(String, Expr)>,
    documentation: Option<String>,
}

/// Builder for the children of a tree rule.
#[derive(Debug, Default)]
pub struct RuleListBuilder {
    rules: Vec<RuleBuilder>,
}

#[derive(Debug, Default)]
enum PendingBody {
    #[default]
    Missing,
    Tree(Vec<RuleBuilder>),
    Endpoint(String),
    Error(String),
}

impl RuleSetBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Append a top-level rule.
    #[must_use]
    pub fn rule(mut self, f: impl FnOnce(RuleBuilder) -> RuleBuilder) -> Self {
        self.rules.push(f(RuleBuilder::default()));
        self
    }

    /// Validate and assemble the rule set.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Parse`] for malformed templates and
    /// [`EndpointError::Compile`] for structural problems (duplicate
    /// parameters, ill-typed defaults, wrong arities, rules without a body).
    pub fn build(self) -> Result<RuleSet, EndpointError> {
        let rules = finish_all(self.rules, "rules")?;
        let mut ruleset = RuleSet::new(self.parameters, rules)?;
        ruleset.version = self.version;
        Ok(ruleset)
    }
}

impl RuleListBuilder {
    #[must_use]
    pub fn rule(mut self, f: impl FnOnce(RuleBuilder) -> RuleBuilder) -> Self {
        self.rules.push(f(RuleBuilder::default()));
        self
    }
}

impl RuleBuilder {
    /// Add a condition that must hold.
    #[must_use]
    pub fn when(mut self, condition: impl Into<Condition>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    /// Add a condition that must hold and binds its value to `name`.
    #[must_use]
    pub fn bind(mut self, name: &str, expr: Expr) -> Self {
        self.conditions.push(Condition::new(expr).assign(name));
        self
    }

    #[must_use]
    pub fn documentation(mut self, docs: impl Into<String>) -> Self {
        self.documentation = Some(docs.into());
        self
    }

    /// Terminate in an endpoint whose URL is the given template.
    #[must_use]
    pub fn endpoint(mut self, url: &str) -> Self {
        self.body = PendingBody::Endpoint(url.to_owned());
        self
    }

    /// Add a header value template to the endpoint.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Add an auth-scheme property to the endpoint.
    #[must_use]
    pub fn property(mut self, name: &str, value: impl Into<Expr>) -> Self {
        self.properties.push((name.to_owned(), value.into()));
        self
    }

    /// Terminate in an error whose message is the given template.
    #[must_use]
    pub fn error(mut self, message: &str) -> Self {
        self.body = PendingBody::Error(message.to_owned());
        self
    }

    /// Continue into nested rules.
    #[must_use]
    pub fn tree(mut self, f: impl FnOnce(RuleListBuilder) -> RuleListBuilder) -> Self {
        self.body = PendingBody::Tree(f(RuleListBuilder::default()).rules);
        self
    }

    fn finish(self, path: &str) -> Result<Rule, EndpointError> {
        let is_endpoint = matches!(self.body, PendingBody::Endpoint(_));
        if !is_endpoint && (!self.headers.is_empty() || !self.properties.is_empty()) {
            return Err(CompileError::MalformedRule {
                path: path.to_owned(),
                reason: "headers and properties require an endpoint".to_owned(),
            }
            .into());
        }
        let body = match self.body {
            PendingBody::Missing => {
                return Err(CompileError::MalformedRule {
                    path: path.to_owned(),
                    reason: "rule has no endpoint, error or tree".to_owned(),
                }
                .into());
            }
            PendingBody::Tree(children) => RuleBody::Tree(finish_all(children, path)?),
            PendingBody::Endpoint(url) => {
                let mut endpoint = Endpoint::new(Expr::template(&url)?);
                for (name, value) in self.headers {
                    endpoint
                        .headers
                        .entry(name)
                        .or_default()
                        .push(Expr::template(&value)?);
                }
                endpoint.properties.extend(self.properties);
                RuleBody::Endpoint(endpoint)
            }
            PendingBody::Error(message) => RuleBody::Error(Expr::template(&message)?),
        };
        Ok(Rule {
            conditions: self.conditions,
            body,
            documentation: self.documentation,
        })
    }
}

fn finish_all(rules: Vec<RuleBuilder>, parent: &str) -> Result<Vec<Rule>, EndpointError> {
    rules
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.finish(&child_path(parent, i)))
        .collect()
}

pub(crate) fn child_path(parent: &str, index: usize) -> String {
    if parent == "rules" {
        format!("rules[{index}]")
    } else {
        format!("{parent}.rules[{index}]")
    }
}

/// A validated rule tree with its parameter declarations.
///
/// The tree is the reference semantics every compiled form must reproduce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    pub(crate) version: Option<String>,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) rules: Vec<Rule>,
}

impl RuleSet {
    /// Assemble a rule set from already-built parts.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if parameters are duplicated, a default does
    /// not match its type, a function is called with the wrong number of
    /// arguments, or a tree rule has no children.
    pub fn new(parameters: Vec<Parameter>, rules: Vec<Rule>) -> Result<Self, CompileError> {
        validate_parameters(&parameters)?;
        for (i, rule) in rules.iter().enumerate() {
            validate_rule(rule, &child_path("rules", i))?;
        }
        Ok(Self {
            version: None,
            parameters,
            rules,
        })
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Total number of conditions written in the tree.
    #[must_use]
    pub fn condition_count(&self) -> usize {
        self.rules.iter().map(Rule::condition_count).sum()
    }

    /// Evaluate the rule tree directly: first match, depth first.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] when the matched result cannot be rendered.
    pub fn evaluate(&self, ctx: &Context) -> Result<Outcome, EvalError> {
        crate::evaluate::evaluate_tree(self, ctx)
    }

    /// Parse a JSON rule-set document.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] on malformed JSON, unknown functions,
    /// template syntax errors or validation failures.
    pub fn from_json(input: &str) -> Result<Self, EndpointError> {
        crate::document::parse_ruleset(input)
    }

    /// Read and parse a JSON rule-set document from a file.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] on I/O, parse or validation failure.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, EndpointError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_json(&input)
    }

    pub(crate) fn with_rules(&self, rules: Vec<Rule>) -> Self {
        Self {
            version: self.version.clone(),
            parameters: self.parameters.clone(),
            rules,
        }
    }
}

fn validate_parameters(parameters: &[Parameter]) -> Result<(), CompileError> {
    let mut seen = HashSet::new();
    for param in parameters {
        if !seen.insert(param.name.as_str()) {
            return Err(CompileError::DuplicateParameter {
                name: param.name.clone(),
            });
        }
        if let Some(default) = &param.default
            && !param.kind.accepts(default)
        {
            return Err(CompileError::DefaultTypeMismatch {
                name: param.name.clone(),
                expected: param.kind,
                found: default.type_name(),
            });
        }
    }
    Ok(())
}

fn validate_rule(rule: &Rule, path: &str) -> Result<(), CompileError> {
    for condition in &rule.conditions {
        if !matches!(
            condition.expr,
            Expr::Call { .. } | Expr::GetAttr { .. } | Expr::Ref(_)
        ) {
            return Err(CompileError::MalformedRule {
                path: path.to_owned(),
                reason: format!("condition `{condition}` is not a function call or reference"),
            });
        }
        validate_expr(&condition.expr, path)?;
    }
    match &rule.body {
        RuleBody::Tree(children) => {
            if children.is_empty() {
                return Err(CompileError::MalformedRule {
                    path: path.to_owned(),
                    reason: "tree rule has no child rules".to_owned(),
                });
            }
            for (i, child) in children.iter().enumerate() {
                validate_rule(child, &child_path(path, i))?;
            }
        }
        RuleBody::Endpoint(endpoint) => {
            for expr in endpoint.expressions() {
                validate_expr(expr, path)?;
            }
        }
        RuleBody::Error(message) => validate_expr(message, path)?,
    }
    Ok(())
}

fn validate_expr(expr: &Expr, path: &str) -> Result<(), CompileError> {
    if let Expr::Call { function, args } = expr
        && !function.accepts_arity(args.len())
    {
        let expected = match function.arity() {
            (min, Some(max)) if min == max => min.to_string(),
            (min, Some(max)) => format!("{min} to {max}"),
            (min, None) => format!("at least {min}"),
        };
        return Err(CompileError::Arity {
            function: function.name().to_owned(),
            path: path.to_owned(),
            expected,
            found: args.len(),
        });
    }
    match expr {
        Expr::Array(items) => items.iter().try_for_each(|e| validate_expr(e, path)),
        Expr::Record(map) => map.values().try_for_each(|e| validate_expr(e, path)),
        Expr::Call { args, .. } => args.iter().try_for_each(|e| validate_expr(e, path)),
        Expr::GetAttr { target, .. } => validate_expr(target, path),
        Expr::Str(_) | Expr::Int(_) | Expr::Bool(_) | Expr::Ref(_) => Ok(()),
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuleSet({} parameters, {} top-level rules, {} conditions)",
            self.parameters.len(),
            self.rules.len(),
            self.condition_count(),
        )
    }
}
