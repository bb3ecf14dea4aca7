use thiserror::Error;

use super::parameter::ParameterType;

/// Errors raised while validating, building or checking a compiled rule set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("duplicate parameter '{name}'")]
    DuplicateParameter { name: String },

    #[error("default of parameter '{name}' is a {found}, expected {expected}")]
    DefaultTypeMismatch {
        name: String,
        expected: ParameterType,
        found: &'static str,
    },

    #[error("'{function}' at {path} takes {expected} arguments, got {found}")]
    Arity {
        function: String,
        path: String,
        expected: String,
        found: usize,
    },

    #[error("malformed rule at {path}: {reason}")]
    MalformedRule { path: String, reason: String },

    #[error("condition `{condition}` at {path} references '{name}', which is not in scope")]
    OutOfScope {
        name: String,
        condition: String,
        path: String,
    },

    #[error("result at {path} references '{name}', which is not in scope")]
    ResultOutOfScope { name: String, path: String },

    #[error("condition `{condition}` at {path} rebinds '{name}', which is already in scope")]
    Shadowed {
        name: String,
        condition: String,
        path: String,
    },

    #[error("BDD node {index} duplicates node {duplicate_of}")]
    DuplicateNode { index: usize, duplicate_of: usize },

    #[error("BDD node {index} has identical high and low branches")]
    RedundantNode { index: usize },

    #[error(
        "BDD node {parent} tests condition {parent_condition} but child node {child} tests condition {child_condition}"
    )]
    OrderViolation {
        parent: usize,
        parent_condition: u32,
        child: usize,
        child_condition: u32,
    },

    #[error("BDD node {index} references missing {target}")]
    DanglingReference { index: usize, target: String },
}

/// Errors raised while evaluating a rule set, CFG or compiled diagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("template \"{template}\" interpolates an unset value")]
    UnsetValue { template: String },

    #[error("\"{template}\" renders a {found}, which has no string form")]
    NotRenderable {
        template: String,
        found: &'static str,
    },

    #[error("malformed compiled rule set: {0}")]
    Malformed(String),
}
