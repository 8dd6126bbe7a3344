use thiserror::Error;

use crate::parser::ParseError;

/// Failure to turn a callable into an expression tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuoteError {
    #[error("cannot parse lambda source: {0}")]
    Parse(ParseError),

    #[error("source of callable '{0}' is not available")]
    SourceUnavailable(String),

    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),

    #[error("captured variable '{name}' holds a {type_name}, which has no literal representation")]
    NoLiteral { name: String, type_name: String },

    #[error("stage lambdas take exactly one parameter, this one takes {0}")]
    StageArity(usize),

    #[error("expression is nested deeper than {0} levels")]
    TooDeep(usize),
}

impl From<ParseError> for QuoteError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Unsupported { construct, at } => {
                QuoteError::UnsupportedConstruct(format!("{} at {}", construct, at))
            }
            ParseError::TooDeep { limit, .. } => QuoteError::TooDeep(limit),
            other => QuoteError::Parse(other),
        }
    }
}

/// Failure raised by an operator call while extending a stream.
///
/// Every variant is fatal for the call that raised it. Streams built
/// before the failing call stay valid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Quote(#[from] QuoteError),

    /// A form survived desugaring that the primitive operators cannot express
    #[error("unsupported expression `{expr}`: {reason}")]
    UnsupportedExpression { expr: String, reason: String },

    /// A call that the active capability model does not declare
    #[error("cannot resolve call `{call}`: {reason}")]
    UnresolvedCall { call: String, reason: String },

    /// A registered rewrite returned something other than an extension of its input
    #[error("callback registered for {key} broke its contract: {reason}")]
    CallbackContractViolation { key: String, reason: String },

    /// Inferred shapes do not fit where the expression is used
    #[error("shape mismatch in `{expr}`: {reason}")]
    ShapeMismatch { expr: String, reason: String },
}

/// Errors that can occur while evaluating a closed expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Type mismatch or invalid operation for the given type
    #[error("type error: {0}")]
    TypeError(String),

    /// Invalid field access or sequence index
    #[error("access error: {0}")]
    AccessError(String),

    /// Parameter or symbol with no value in scope
    #[error("unbound name: {0}")]
    Unbound(String),

    /// Operator or function the evaluator does not implement
    #[error("cannot evaluate {0}")]
    Unsupported(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

/// Failure to load a capability file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid capability file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid shape `{text}`: {reason}")]
    InvalidShape { text: String, reason: String },
}
