use serde::{Deserialize, Serialize};

use crate::ast::Lambda;
use crate::metadata::Metadata;

/// Where a stream begins.
///
/// Supplied by a backend's root factory. `kind` names the dataset type and
/// `handle` is whatever the backend needs to find the data again; neither
/// is interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSource {
    pub kind: String,
    pub handle: serde_json::Value,
}

impl RootSource {
    pub fn new(kind: impl Into<String>, handle: serde_json::Value) -> Self {
        RootSource {
            kind: kind.into(),
            handle,
        }
    }
}

/// Who gets to see an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataScope {
    /// Emitted in place for the backend
    Backend,
    /// Kept on the caller's side, merged into the query tree and dropped
    /// from the emitted stages
    Query,
}

/// One node of a stream, as held in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum StageKind {
    /// Start of the chain
    Root(RootSource),

    /// One-to-one transform
    ///
    /// # Example
    /// ```text
    /// .Map(lambda j: j.pt() / 1000.0)
    /// ```
    Map(Lambda),

    /// Transform yielding a sequence, flattened one level
    ///
    /// # Example
    /// ```text
    /// .FlatMap(lambda e: e.jets())
    /// ```
    FlatMap(Lambda),

    /// Keep items whose predicate holds
    ///
    /// # Example
    /// ```text
    /// .Filter(lambda j: j.pt() > 30)
    /// ```
    Filter(Lambda),

    /// Out-of-band metadata, no change to the element shape
    Annotate {
        metadata: Metadata,
        scope: MetadataScope,
    },
}

impl StageKind {
    /// Operator name as it appears in rendered trees
    pub fn operator(&self) -> &'static str {
        match self {
            StageKind::Root(_) => "Root",
            StageKind::Map(_) => "Map",
            StageKind::FlatMap(_) => "FlatMap",
            StageKind::Filter(_) => "Filter",
            StageKind::Annotate { .. } => "MetaData",
        }
    }
}

/// One stage as handed to a backend.
///
/// Root and query-scoped annotations never appear here; see `QueryTree`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", content = "arg", rename_all = "snake_case")]
pub enum Stage {
    Map(Lambda),
    FlatMap(Lambda),
    Filter(Lambda),
    Annotate(Metadata),
}
