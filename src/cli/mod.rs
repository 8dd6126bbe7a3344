//! CLI support for linqtree
//!
//! The `linqtree` binary is a thin wrapper over these functions, so other
//! tools can compile queries the same way without shelling out.

mod check;
mod compile;

pub use check::{CheckOptions, CheckResult, execute_check};
pub use compile::{CompileOptions, CompileResult, StageSpec, execute_compile, parse_stage};

use std::{io, sync::LazyLock};

use regex::Regex;
use thiserror::Error;

use crate::{
    capability::CapabilityFile,
    error::{BuildError, ConfigError, EvalError},
    quote::Captures,
    value::json_to_value,
};

/// Errors that can occur during CLI operations
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid stage '{0}': expected map:, flat_map:, filter: or annotate: followed by its argument")]
    InvalidStage(String),

    #[error("Invalid capture '{0}': expected name=<json>")]
    InvalidCapture(String),

    #[error("No stages given. Pass them as arguments or pipe them to stdin, one per line.")]
    NoStages,
}

static CAPTURE_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=(.*)$"));

/// Parse `name=<json>` capture arguments
pub fn parse_captures(specs: &[String]) -> Result<Captures, CliError> {
    let pattern = CAPTURE_PATTERN
        .as_ref()
        .map_err(|e| CliError::InvalidCapture(e.to_string()))?;

    let mut captures = Captures::new();
    for spec in specs {
        let parts = pattern
            .captures(spec)
            .ok_or_else(|| CliError::InvalidCapture(spec.clone()))?;
        let value: serde_json::Value = serde_json::from_str(&parts[2])?;
        captures = captures.literal(&parts[1], json_to_value(value));
    }
    Ok(captures)
}

/// Load a capability file, or an empty one when none is given
pub fn load_capabilities(text: Option<&str>) -> Result<CapabilityFile, CliError> {
    match text {
        Some(text) => Ok(CapabilityFile::from_json(text)?),
        None => Ok(CapabilityFile::default()),
    }
}
