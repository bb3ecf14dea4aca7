mod bdd;
mod canonicalize;
mod cfg;
mod compiled;
mod document;
mod error;
mod evaluate;
pub mod parse;
mod pipeline;
mod reorder;
#[cfg(feature = "binary-cache")]
mod serial;
mod types;
mod verify;

pub use bdd::{Bdd, BddNode, BranchRef, EquivalenceOptions, verify_equivalence};
pub use canonicalize::{
    Canonicalized, Canonicalizer, CommutativeEquality, DoubleNegation, RewriteRule,
    SubstringToSplit,
};
pub use cfg::{Cfg, CfgNode, CfgRef, CondRef};
pub use compiled::CompiledRuleSet;
pub use document::DocumentError;
pub use error::EndpointError;
pub use parse::ParseError;
pub use pipeline::{Compilation, CompileOptions, CompileStats, Compiler, compile_many};
pub use reorder::{
    CostModel, CostOptions, FunctionCost, ProbabilityEstimator, SiftingOptions, UniformEstimator,
    UnitCost,
};
#[cfg(feature = "binary-cache")]
pub use serial::{DeserializeError, SerializeError};
pub use types::{
    Builtin, CompileError, Condition, Context, Endpoint, EvalError, Expr, Outcome, Parameter,
    ParameterType, PathPart, ResolvedEndpoint, Rule, RuleBody, RuleBuilder, RuleListBuilder,
    RuleResult, RuleSet, RuleSetBuilder, Template, TemplatePart, Value, boolean_equals, call,
    get_attr, is_set, not, path_to_string, reference, string_equals,
};
pub use verify::{
    ExpectedEndpoint, Expectation, Resolver, Stage, TestCase, TestSuite, VerifyError,
};
