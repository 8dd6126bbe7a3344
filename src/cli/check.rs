//! Quote and desugar a single lambda

use super::{CliError, load_capabilities, parse_captures};
use crate::{
    desugar::{desugar, ensure_primitive},
    error::BuildError,
    quote::{Callable, FunctionLibrary, quote},
    Lambda,
};

/// Options for the check command
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Lambda source to check
    pub lambda: String,
    /// Capability file contents, for its configuration
    pub capabilities: Option<String>,
    /// `name=<json>` captures
    pub captures: Vec<String>,
}

/// Result of a check operation
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    /// The lambda after quoting
    pub quoted: Lambda,
    /// The lambda after desugaring
    pub desugared: Lambda,
}

/// Quote the lambda, then lower it to primitive operators
pub fn execute_check(options: &CheckOptions) -> Result<CheckResult, CliError> {
    let file = load_capabilities(options.capabilities.as_deref())?;
    let captures = parse_captures(&options.captures)?;

    let quoted = quote(
        &Callable::Source(options.lambda.clone()),
        &captures,
        &FunctionLibrary::new(),
        file.config.max_depth,
    )
    .map_err(BuildError::from)?;

    let body = desugar(quoted.body.as_ref().clone(), &file.config)?;
    ensure_primitive(&body)?;

    Ok(CheckResult {
        desugared: Lambda {
            params: quoted.params.clone(),
            body: Box::new(body),
        },
        quoted,
    })
}
