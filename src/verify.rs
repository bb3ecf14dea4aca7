use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Context, EndpointError, EvalError, Outcome, Parameter, RuleSet, Value};

/// A point in the pipeline at which the corpus is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    RuleTree,
    Canonicalized,
    Cfg,
    Bdd,
    Sifted,
    CostOptimized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::RuleTree => "rule tree",
            Stage::Canonicalized => "canonicalized rule tree",
            Stage::Cfg => "CFG",
            Stage::Bdd => "BDD",
            Stage::Sifted => "sifted",
            Stage::CostOptimized => "cost-optimized",
        })
    }
}

/// Errors raised while checking a form of the rule set against test cases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("test case {case} is inconsistent: {reason}")]
    InconsistentTestCase { case: usize, reason: String },

    #[error("{stage} disagrees with test case {case}: expected {expected}, got {actual}")]
    Mismatch {
        stage: Stage,
        case: usize,
        expected: Expectation,
        actual: Outcome,
    },

    #[error("{stage} failed on test case {case}: {source}")]
    Evaluation {
        stage: Stage,
        case: usize,
        source: EvalError,
    },

    /// The diagram and the CFG land on different results for one
    /// assignment of truth values, written as one digit per condition.
    #[error(
        "{stage} diagram disagrees with the CFG when conditions are {assignment}: \
         expected result {expected}, got result {actual}"
    )]
    Inequivalent {
        stage: Stage,
        assignment: String,
        expected: u32,
        actual: u32,
    },
}

/// The endpoint a test case expects, with rendered templates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExpectedEndpoint {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expectation {
    Endpoint(ExpectedEndpoint),
    Error(String),
    NoMatch,
}

impl Expectation {
    #[must_use]
    pub fn matches(&self, outcome: &Outcome) -> bool {
        match (self, outcome) {
            (Expectation::Endpoint(want), Outcome::Endpoint(got)) => {
                want.url == got.url
                    && want.headers == got.headers
                    && want.properties == got.properties
            }
            (Expectation::Error(want), Outcome::Error(got)) => want == got,
            (Expectation::NoMatch, Outcome::NoMatch) => true,
            _ => false,
        }
    }
}

impl From<Outcome> for Expectation {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Endpoint(e) => Expectation::Endpoint(ExpectedEndpoint {
                url: e.url,
                headers: e.headers,
                properties: e.properties,
            }),
            Outcome::Error(message) => Expectation::Error(message),
            Outcome::NoMatch => Expectation::NoMatch,
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Endpoint(e) => write!(f, "endpoint {}", e.url),
            Expectation::Error(message) => write!(f, "error \"{message}\""),
            Expectation::NoMatch => f.write_str("no match"),
        }
    }
}

/// One declarative test: parameter values and the expected outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    pub expect: Expectation,
}

impl TestCase {
    pub fn new(params: BTreeMap<String, Value>, expect: Expectation) -> Self {
        Self {
            documentation: None,
            params,
            expect,
        }
    }

    #[must_use]
    pub fn context(&self) -> Context {
        Context::from(self.params.clone())
    }

    fn validate(&self, case: usize, parameters: &[Parameter]) -> Result<(), VerifyError> {
        let inconsistent = |reason: String| VerifyError::InconsistentTestCase { case, reason };
        for (name, value) in &self.params {
            let param = parameters
                .iter()
                .find(|p| &p.name == name)
                .ok_or_else(|| inconsistent(format!("unknown parameter '{name}'")))?;
            if !param.kind.accepts(value) {
                return Err(inconsistent(format!(
                    "parameter '{name}' is a {}, got a {}",
                    param.kind,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }
}

/// A corpus of test cases, loaded from `{"testCases": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    pub test_cases: Vec<TestCase>,
}

impl TestSuite {
    #[must_use]
    pub fn new(test_cases: Vec<TestCase>) -> Self {
        Self { test_cases }
    }

    /// # Errors
    ///
    /// Returns [`EndpointError::Json`] if the input is not a test corpus.
    pub fn from_json(input: &str) -> Result<Self, EndpointError> {
        Ok(serde_json::from_str(input)?)
    }

    /// # Errors
    ///
    /// Returns [`EndpointError`] on I/O or JSON failure.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, EndpointError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_json(&input)
    }

    /// Build a corpus by recording what `resolver` returns for each context.
    ///
    /// # Errors
    ///
    /// Returns the first [`EvalError`] raised by the resolver.
    pub fn record(
        resolver: &impl Resolver,
        contexts: impl IntoIterator<Item = Context>,
    ) -> Result<Self, EvalError> {
        let test_cases = contexts
            .into_iter()
            .map(|ctx| {
                let expect = Expectation::from(resolver.resolve(&ctx)?);
                let params = ctx.iter().map(|(k, v)| (k.to_owned(), v.clone())).collect();
                Ok(TestCase::new(params, expect))
            })
            .collect::<Result<Vec<_>, EvalError>>()?;
        Ok(Self { test_cases })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }

    /// Check every case against the parameter declarations: no unknown
    /// parameters and no ill-typed values. A required parameter may be
    /// omitted, which is how a corpus exercises the rules guarding it.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InconsistentTestCase`] for the first bad case.
    pub fn validate(&self, parameters: &[Parameter]) -> Result<(), VerifyError> {
        self.test_cases
            .iter()
            .enumerate()
            .try_for_each(|(i, case)| case.validate(i, parameters))
    }

    /// Replay every case through `resolver`, stopping at the first mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Mismatch`] when an outcome differs from the
    /// expectation and [`VerifyError::Evaluation`] when evaluation fails.
    pub fn verify(&self, stage: Stage, resolver: &impl Resolver) -> Result<(), VerifyError> {
        for (case, test) in self.test_cases.iter().enumerate() {
            let actual = resolver
                .resolve(&test.context())
                .map_err(|source| VerifyError::Evaluation {
                    stage,
                    case,
                    source,
                })?;
            if !test.expect.matches(&actual) {
                return Err(VerifyError::Mismatch {
                    stage,
                    case,
                    expected: test.expect.clone(),
                    actual,
                });
            }
        }
        log::debug!("{stage}: {} test cases pass", self.len());
        Ok(())
    }
}

/// Anything that maps parameter values to an [`Outcome`]: the rule tree, the
/// CFG and the compiled diagram.
pub trait Resolver {
    /// # Errors
    ///
    /// Returns [`EvalError`] when the selected result cannot be rendered.
    fn resolve(&self, ctx: &Context) -> Result<Outcome, EvalError>;
}

impl Resolver for RuleSet {
    fn resolve(&self, ctx: &Context) -> Result<Outcome, EvalError> {
        self.evaluate(ctx)
    }
}

impl Resolver for crate::Cfg {
    fn resolve(&self, ctx: &Context) -> Result<Outcome, EvalError> {
        self.evaluate(ctx)
    }
}

impl Resolver for crate::CompiledRuleSet {
    fn resolve(&self, ctx: &Context) -> Result<Outcome, EvalError> {
        self.evaluate(ctx)
    }
}

impl<R: Resolver + ?Sized> Resolver for &R {
    fn resolve(&self, ctx: &Context) -> Result<Outcome, EvalError> {
        (**self).resolve(ctx)
    }
}
