mod condition;
mod context;
mod error;
mod expr;
pub(crate) mod function;
mod outcome;
mod parameter;
mod rule;
mod ruleset;
mod template;
mod value;

pub use condition::Condition;
pub use context::Context;
pub use error::{CompileError, EvalError};
pub use expr::{
    Expr, PathPart, boolean_equals, call, get_attr, is_set, not, path_to_string, reference,
    string_equals,
};
pub use function::Builtin;
pub use outcome::{Outcome, ResolvedEndpoint};
pub use parameter::{Parameter, ParameterType};
pub use rule::{Endpoint, Rule, RuleBody, RuleResult};
pub(crate) use ruleset::child_path;
pub use ruleset::{RuleBuilder, RuleListBuilder, RuleSet, RuleSetBuilder};
pub use template::{Template, TemplatePart};
pub use value::Value;
