//! Build a query from stage arguments and emit or run it

use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::{CliError, load_capabilities, parse_captures};
use crate::{
    ast::RootSource,
    capability::Shape,
    literal::{LiteralDataset, LiteralExecutor},
    metadata::Metadata,
    registry::CallbackRegistry,
    stream::{Session, Stream},
    value::{Value, json_to_value, value_to_json},
};

/// One operator from the command line
#[derive(Debug, Clone, PartialEq)]
pub enum StageSpec {
    Map(String),
    FlatMap(String),
    Filter(String),
    Annotate(Metadata),
}

/// Options for the compile command
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Stage arguments: `map:<lambda>`, `filter:<lambda>`, ...
    pub stages: Vec<String>,
    /// Capability file contents
    pub capabilities: Option<String>,
    /// Item shape of the root, e.g. `Event`
    pub root_shape: Option<String>,
    /// `name=<json>` captures
    pub captures: Vec<String>,
    /// JSON array to run the query over
    pub input: Option<String>,
}

/// Result of a compile operation
#[derive(Debug)]
pub enum CompileResult {
    /// The emitted query tree
    Tree(serde_json::Value),
    /// Items produced by running the query over `--input`
    Results(serde_json::Value),
}

static STAGE_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*(map|flat_map|filter|annotate)\s*:(.*)$"));

/// Parse one `kind:argument` stage argument
pub fn parse_stage(spec: &str) -> Result<StageSpec, CliError> {
    let pattern = STAGE_PATTERN
        .as_ref()
        .map_err(|_| CliError::InvalidStage(spec.to_string()))?;
    let parts = pattern
        .captures(spec)
        .ok_or_else(|| CliError::InvalidStage(spec.to_string()))?;
    let argument = parts[2].trim().to_string();

    Ok(match &parts[1] {
        "map" => StageSpec::Map(argument),
        "flat_map" => StageSpec::FlatMap(argument),
        "filter" => StageSpec::Filter(argument),
        _ => match serde_json::from_str(&argument)? {
            serde_json::Value::Object(metadata) => StageSpec::Annotate(metadata),
            _ => return Err(CliError::InvalidStage(spec.to_string())),
        },
    })
}

/// Build the query and either emit it or run it over the input
pub fn execute_compile(options: &CompileOptions) -> Result<CompileResult, CliError> {
    if options.stages.is_empty() {
        return Err(CliError::NoStages);
    }
    let stages = options
        .stages
        .iter()
        .map(|s| parse_stage(s))
        .collect::<Result<Vec<_>, _>>()?;

    let file = load_capabilities(options.capabilities.as_deref())?;
    let captures = parse_captures(&options.captures)?;
    let declared: Option<Shape> = options.root_shape.as_deref().map(str::parse).transpose()?;

    let session = Session::builder()
        .capabilities(file.model)
        .config(file.config)
        .registry(Arc::new(CallbackRegistry::new()))
        .build();

    let input = match &options.input {
        Some(text) => match json_to_value(serde_json::from_str(text)?) {
            Value::List(items) => Some(LiteralDataset::new(items)),
            other => Some(LiteralDataset::new(vec![other])),
        },
        None => None,
    };

    let mut stream: Stream = match &input {
        Some(dataset) => session.root(dataset.source(), declared.unwrap_or_else(|| dataset.shape())),
        None => session.root(
            RootSource::new("Dataset", serde_json::Value::Null),
            declared.unwrap_or(Shape::Any),
        ),
    };

    for stage in stages {
        stream = match stage {
            StageSpec::Map(source) => stream.map_with(source, &captures)?,
            StageSpec::FlatMap(source) => stream.flat_map_with(source, &captures)?,
            StageSpec::Filter(source) => stream.filter_with(source, &captures)?,
            StageSpec::Annotate(metadata) => stream.annotate(metadata),
        };
    }

    if input.is_some() {
        let items = stream.execute(&LiteralExecutor::new())??;
        let items = items.into_iter().map(value_to_json).collect();
        return Ok(CompileResult::Results(serde_json::Value::Array(items)));
    }

    Ok(CompileResult::Tree(serde_json::to_value(stream.finalize()?)?))
}
