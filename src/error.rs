use thiserror::Error;

use crate::document::DocumentError;
use crate::parse::ParseError;
use crate::verify::{Stage, VerifyError};
use crate::{CompileError, EvalError};

/// Unified error type covering loading, compilation, verification and I/O.
///
/// Returned by the compiler pipeline and by convenience methods like
/// [`RuleSet::from_json()`](crate::RuleSet::from_json).
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// An optimization pass produced a diagram that disagrees with the
    /// test corpus. The pass is rejected and nothing is emitted.
    #[error("{stage} diagram regressed: {source}")]
    OptimizationRegression { stage: Stage, source: VerifyError },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Serialize(#[from] crate::serial::SerializeError),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Deserialize(#[from] crate::serial::DeserializeError),
}
