//! Static scope checking and binding renaming.

use std::collections::{HashMap, HashSet};

use crate::types::child_path;
use crate::{CompileError, Condition, Expr, Parameter, Rule, RuleBody};

/// Reject references to names that are not in scope and bindings that
/// rebind a name already in scope.
pub(crate) fn check(parameters: &[Parameter], rules: &[Rule]) -> Result<(), CompileError> {
    let mut scope = ScopeStack {
        params: parameters.iter().map(|p| p.name.as_str()).collect(),
        bindings: Vec::new(),
    };
    check_rules(rules, "rules", &mut scope)
}

struct ScopeStack<'a> {
    params: HashSet<&'a str>,
    bindings: Vec<&'a str>,
}

impl ScopeStack<'_> {
    fn contains(&self, name: &str) -> bool {
        self.params.contains(name) || self.bindings.iter().any(|b| *b == name)
    }
}

fn check_rules<'a>(
    rules: &'a [Rule],
    parent: &str,
    scope: &mut ScopeStack<'a>,
) -> Result<(), CompileError> {
    for (i, rule) in rules.iter().enumerate() {
        let path = child_path(parent, i);
        let mark = scope.bindings.len();
        for condition in &rule.conditions {
            check_condition(condition, &path, scope)?;
        }
        match &rule.body {
            RuleBody::Tree(children) => check_rules(children, &path, scope)?,
            RuleBody::Endpoint(endpoint) => {
                for expr in endpoint.expressions() {
                    check_result_expr(expr, &path, scope)?;
                }
            }
            RuleBody::Error(message) => check_result_expr(message, &path, scope)?,
        }
        scope.bindings.truncate(mark);
    }
    Ok(())
}

fn check_condition<'a>(
    condition: &'a Condition,
    path: &str,
    scope: &mut ScopeStack<'a>,
) -> Result<(), CompileError> {
    if let Some(name) = condition.references().into_iter().find(|n| !scope.contains(n)) {
        return Err(CompileError::OutOfScope {
            name: name.to_owned(),
            condition: condition.to_string(),
            path: path.to_owned(),
        });
    }
    if let Some(name) = condition.binding() {
        if scope.contains(name) {
            return Err(CompileError::Shadowed {
                name: name.to_owned(),
                condition: condition.to_string(),
                path: path.to_owned(),
            });
        }
        scope.bindings.push(name);
    }
    Ok(())
}

fn check_result_expr(expr: &Expr, path: &str, scope: &ScopeStack<'_>) -> Result<(), CompileError> {
    match expr.references().into_iter().find(|n| !scope.contains(n)) {
        Some(name) => Err(CompileError::ResultOutOfScope {
            name: name.to_owned(),
            path: path.to_owned(),
        }),
        None => Ok(()),
    }
}

/// Give every binding name exactly one defining expression.
///
/// The first definition of a name keeps it; each further distinct
/// definition gets the first free `name_N`. Identical definitions, compared
/// after their own references are renamed, share a name. Must run after
/// [`check`], which guarantees no binding is shadowed on any path.
pub(crate) fn rename_bindings(parameters: &[Parameter], rules: &[Rule]) -> Vec<Rule> {
    let mut reserved: HashSet<String> = parameters.iter().map(|p| p.name.clone()).collect();
    collect_bindings(rules, &mut reserved);
    let mut renamer = Renamer {
        reserved,
        used: HashSet::new(),
        assigned: HashMap::new(),
        active: Vec::new(),
    };
    renamer.rules(rules)
}

fn collect_bindings(rules: &[Rule], out: &mut HashSet<String>) {
    for rule in rules {
        out.extend(rule.conditions.iter().filter_map(|c| c.assign.clone()));
        if let RuleBody::Tree(children) = &rule.body {
            collect_bindings(children, out);
        }
    }
}

struct Renamer {
    reserved: HashSet<String>,
    used: HashSet<String>,
    assigned: HashMap<(String, Expr), String>,
    /// Bindings in scope on the current path: (written name, assigned name).
    active: Vec<(String, String)>,
}

impl Renamer {
    fn rules(&mut self, rules: &[Rule]) -> Vec<Rule> {
        rules.iter().map(|r| self.rule(r)).collect()
    }

    fn rule(&mut self, rule: &Rule) -> Rule {
        let mark = self.active.len();
        let conditions = rule
            .conditions
            .iter()
            .map(|c| self.condition(c))
            .collect();
        let body = match &rule.body {
            RuleBody::Tree(children) => RuleBody::Tree(self.rules(children)),
            RuleBody::Endpoint(e) => RuleBody::Endpoint(e.rename_references(&|n| self.lookup(n))),
            RuleBody::Error(message) => {
                RuleBody::Error(message.rename_references(&|n| self.lookup(n)))
            }
        };
        self.active.truncate(mark);
        Rule {
            conditions,
            body,
            documentation: rule.documentation.clone(),
        }
    }

    fn condition(&mut self, condition: &Condition) -> Condition {
        let expr = condition.expr.rename_references(&|n| self.lookup(n));
        let Some(written) = &condition.assign else {
            return Condition { expr, assign: None };
        };
        let key = (written.clone(), expr);
        let name = match self.assigned.get(&key) {
            Some(name) => name.clone(),
            None => {
                let name = self.fresh(written);
                self.assigned.insert(key.clone(), name.clone());
                name
            }
        };
        self.active.push((written.clone(), name.clone()));
        Condition {
            expr: key.1,
            assign: Some(name),
        }
    }

    fn fresh(&mut self, written: &str) -> String {
        if self.used.insert(written.to_owned()) {
            return written.to_owned();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{written}_{n}");
            if !self.reserved.contains(&candidate) && self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    fn lookup(&self, name: &str) -> String {
        self.active
            .iter()
            .rev()
            .find(|(written, _)| written == name)
            .map_or_else(|| name.to_owned(), |(_, assigned)| assigned.clone())
    }
}
