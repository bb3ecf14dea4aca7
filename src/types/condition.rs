use std::fmt;

use super::expr::Expr;

/// A boolean test over an expression, optionally binding the value it
/// produced when it holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Condition {
    pub expr: Expr,
    pub assign: Option<String>,
}

impl Condition {
    pub fn new(expr: Expr) -> Self {
        Self { expr, assign: None }
    }

    /// Bind the condition's value to `name` when it holds.
    #[must_use]
    pub fn assign(mut self, name: impl Into<String>) -> Self {
        self.assign = Some(name.into());
        self
    }

    #[must_use]
    pub fn binding(&self) -> Option<&str> {
        self.assign.as_deref()
    }

    #[must_use]
    pub fn references(&self) -> Vec<&str> {
        self.expr.references()
    }

    /// Identifier of the outermost function, as written in rule documents.
    #[must_use]
    pub fn function_name(&self) -> &'static str {
        match &self.expr {
            Expr::Call { function, .. } => function.name(),
            Expr::GetAttr { .. } => "getAttr",
            _ => "literal",
        }
    }
}

impl From<Expr> for Condition {
    fn from(expr: Expr) -> Self {
        Self::new(expr)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.assign {
            Some(name) => write!(f, "{name} = {}", self.expr),
            None => write!(f, "{}", self.expr),
        }
    }
}
