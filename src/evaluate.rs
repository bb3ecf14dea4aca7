use std::collections::{BTreeMap, HashMap};

use crate::types::function::{get_attr, holds};
use crate::{
    Condition, Context, Endpoint, EvalError, Expr, Outcome, Parameter, ResolvedEndpoint, Rule,
    RuleBody, RuleResult, RuleSet, Template, TemplatePart, Value,
};

/// Parameter values plus the bindings established along the current path.
///
/// Bindings form a stack so the tree evaluator can drop a failed rule's
/// bindings; the flattened evaluators never pop. Lookups search bindings
/// newest first, then parameters. Unknown names evaluate to unset.
#[derive(Debug)]
pub(crate) struct Env {
    params: HashMap<String, Value>,
    bindings: Vec<(String, Value)>,
}

impl Env {
    pub(crate) fn new(parameters: &[Parameter], ctx: &Context) -> Self {
        let params = parameters
            .iter()
            .filter_map(|p| {
                ctx.get(&p.name)
                    .or(p.default.as_ref())
                    .map(|v| (p.name.clone(), v.clone()))
            })
            .collect();
        Self {
            params,
            bindings: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .or_else(|| self.params.get(name))
    }

    fn mark(&self) -> usize {
        self.bindings.len()
    }

    fn truncate(&mut self, mark: usize) {
        self.bindings.truncate(mark);
    }

    pub(crate) fn eval(&self, expr: &Expr) -> Option<Value> {
        match expr {
            Expr::Str(t) => self.render(t).ok().map(Value::String),
            Expr::Int(i) => Some(Value::Int(*i)),
            Expr::Bool(b) => Some(Value::Bool(*b)),
            Expr::Array(items) => items
                .iter()
                .map(|e| self.eval(e))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Expr::Record(map) => map
                .iter()
                .map(|(k, e)| self.eval(e).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Value::Record),
            Expr::Ref(name) => self.lookup(name).cloned(),
            Expr::Call { function, args } => {
                let values: Vec<Option<Value>> = args.iter().map(|a| self.eval(a)).collect();
                function.apply(&values)
            }
            Expr::GetAttr { target, path } => get_attr(&self.eval(target)?, path),
        }
    }

    /// Evaluate a condition, binding its value when it holds.
    pub(crate) fn test(&mut self, condition: &Condition) -> bool {
        let value = self.eval(&condition.expr);
        if !holds(&value) {
            return false;
        }
        if let (Some(name), Some(value)) = (&condition.assign, value) {
            self.bindings.push((name.clone(), value));
        }
        true
    }

    fn render(&self, template: &Template) -> Result<String, EvalError> {
        let mut out = String::new();
        for part in template.parts() {
            match part {
                TemplatePart::Literal(s) => out.push_str(s),
                TemplatePart::Dynamic(e) => {
                    let value = self.eval(e).ok_or_else(|| EvalError::UnsetValue {
                        template: template.to_string(),
                    })?;
                    let text = value.render().ok_or_else(|| EvalError::NotRenderable {
                        template: template.to_string(),
                        found: value.type_name(),
                    })?;
                    out.push_str(&text);
                }
            }
        }
        Ok(out)
    }

    fn render_text(&self, expr: &Expr) -> Result<String, EvalError> {
        if let Expr::Str(t) = expr {
            return self.render(t);
        }
        let value = self.materialize(expr)?;
        value.render().ok_or_else(|| EvalError::NotRenderable {
            template: expr.to_string(),
            found: value.type_name(),
        })
    }

    /// Evaluate a result expression, where an unset value is an error.
    fn materialize(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Str(t) => self.render(t).map(Value::String),
            Expr::Array(items) => items
                .iter()
                .map(|e| self.materialize(e))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Record(map) => map
                .iter()
                .map(|(k, e)| self.materialize(e).map(|v| (k.clone(), v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Value::Record),
            other => self.eval(other).ok_or_else(|| EvalError::UnsetValue {
                template: other.to_string(),
            }),
        }
    }

    /// Render a terminal into an [`Outcome`] using the current bindings.
    pub(crate) fn resolve(&self, result: &RuleResult) -> Result<Outcome, EvalError> {
        match result {
            RuleResult::NoMatch => Ok(Outcome::NoMatch),
            RuleResult::Error(message) => Ok(Outcome::Error(self.render_text(message)?)),
            RuleResult::Endpoint(endpoint) => self.resolve_endpoint(endpoint),
        }
    }

    fn resolve_endpoint(&self, endpoint: &Endpoint) -> Result<Outcome, EvalError> {
        let url = self.render_text(&endpoint.url)?;
        let headers = endpoint
            .headers
            .iter()
            .map(|(name, values)| {
                let rendered = values
                    .iter()
                    .map(|v| self.render_text(v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((name.clone(), rendered))
            })
            .collect::<Result<BTreeMap<_, _>, EvalError>>()?;
        let properties = endpoint
            .properties
            .iter()
            .map(|(name, e)| Ok((name.clone(), self.materialize(e)?)))
            .collect::<Result<BTreeMap<_, _>, EvalError>>()?;
        Ok(Outcome::Endpoint(ResolvedEndpoint {
            url,
            headers,
            properties,
        }))
    }
}

/// Evaluate the rule tree: rules in order, depth first, first match wins.
pub(crate) fn evaluate_tree(ruleset: &RuleSet, ctx: &Context) -> Result<Outcome, EvalError> {
    let mut env = Env::new(ruleset.parameters(), ctx);
    Ok(eval_rules(ruleset.rules(), &mut env)?.unwrap_or(Outcome::NoMatch))
}

fn eval_rules(rules: &[Rule], env: &mut Env) -> Result<Option<Outcome>, EvalError> {
    for rule in rules {
        let mark = env.mark();
        if rule.conditions.iter().all(|c| env.test(c)) {
            let found = match &rule.body {
                RuleBody::Tree(children) => eval_rules(children, env)?,
                RuleBody::Endpoint(e) => Some(env.resolve_endpoint(e)?),
                RuleBody::Error(message) => Some(Outcome::Error(env.render_text(message)?)),
            };
            if found.is_some() {
                return Ok(found);
            }
        }
        env.truncate(mark);
    }
    Ok(None)
}
