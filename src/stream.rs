//! The query-building surface.
//!
//! A [`Stream`] is an immutable, reference-counted stage. Every operator
//! returns a new stream whose parent is the one it was called on, so a
//! stream can be branched into any number of independent pipelines and
//! earlier streams never change.
//!
//! Each of [`Stream::map`], [`Stream::flat_map`] and [`Stream::filter`]
//! runs the full front end on its callable:
//!
//! 1. quote it against the given captures
//! 2. desugar to the primitive operators and reject leftovers
//! 3. resolve calls against the session's capabilities, running callbacks
//! 4. check the body's shape fits the operator
//!
//! and appends one stage on top of whatever annotations callbacks added.
//!
//! # Example
//! ```
//! use linqtree::{RootSource, Session, Shape};
//! use linqtree::capability::{CapabilityModel, ShapeDescriptor};
//!
//! let model = CapabilityModel::new()
//!     .with_shape("Event", ShapeDescriptor::new().method("jets", vec![], Shape::sequence(Shape::named("Jet"))))
//!     .with_shape("Jet", ShapeDescriptor::new().method("pt", vec![], Shape::Float));
//! let session = Session::builder().capabilities(model).build();
//!
//! let events = session.root(RootSource::new("Files", serde_json::json!(["events.root"])), Shape::named("Event"));
//! let pts = events
//!     .flat_map("lambda e: e.jets()").unwrap()
//!     .map("lambda j: j.pt() / 1000.0").unwrap();
//!
//! assert_eq!(pts.shape(), &Shape::Float);
//! assert_eq!(pts.finalize().unwrap().stages.len(), 2);
//! ```

use std::{fmt, sync::Arc};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{
    ast::{Expr, Lambda, MetadataScope, RootSource, Stage, StageKind},
    capability::{CapabilityLookup, CapabilityModel, Shape},
    config::SessionConfig,
    desugar::{desugar, ensure_primitive},
    error::{BuildError, QuoteError},
    metadata::Metadata,
    output::{to_json, unparse},
    quote::{Callable, Captures, FunctionLibrary, quote},
    registry::CallbackRegistry,
    resolve::Resolver,
    value::json_to_value,
};

/// Everything a stream needs to build its stages.
pub struct Session {
    capabilities: Arc<dyn CapabilityLookup + Send + Sync>,
    registry: Arc<CallbackRegistry>,
    library: FunctionLibrary,
    config: SessionConfig,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Start a stream at a backend-supplied source whose items have `shape`
    pub fn root(self: &Arc<Self>, source: RootSource, shape: Shape) -> Stream {
        debug!(kind = %source.kind, %shape, "new root stream");
        Stream::push(None, StageKind::Root(source), shape, Arc::clone(self))
    }

    pub fn capabilities(&self) -> &(dyn CapabilityLookup + Send + Sync) {
        self.capabilities.as_ref()
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    pub fn library(&self) -> &FunctionLibrary {
        &self.library
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Session`].
///
/// Unset parts default to an empty capability model, the global callback
/// registry, an empty function library and [`SessionConfig::default`].
#[derive(Default)]
pub struct SessionBuilder {
    capabilities: Option<Arc<dyn CapabilityLookup + Send + Sync>>,
    registry: Option<Arc<CallbackRegistry>>,
    library: FunctionLibrary,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn capabilities(mut self, capabilities: impl CapabilityLookup + Send + Sync + 'static) -> Self {
        self.capabilities = Some(Arc::new(capabilities));
        self
    }

    pub fn registry(mut self, registry: Arc<CallbackRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn library(mut self, library: FunctionLibrary) -> Self {
        self.library = library;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Arc<Session> {
        Arc::new(Session {
            capabilities: self
                .capabilities
                .unwrap_or_else(|| Arc::new(CapabilityModel::new())),
            registry: self.registry.unwrap_or_else(CallbackRegistry::global),
            library: self.library,
            config: self.config,
        })
    }
}

struct StageNode {
    kind: StageKind,
    parent: Option<Stream>,
    /// Shape of the items leaving this stage
    shape: Shape,
    session: Arc<Session>,
}

/// One immutable stage and, through its parents, the chain down to the root.
#[derive(Clone)]
pub struct Stream {
    node: Arc<StageNode>,
}

#[derive(Debug, Clone, Copy)]
enum Operator {
    Map,
    FlatMap,
    Filter,
}

impl Stream {
    fn push(parent: Option<Stream>, kind: StageKind, shape: Shape, session: Arc<Session>) -> Stream {
        Stream {
            node: Arc::new(StageNode {
                kind,
                parent,
                shape,
                session,
            }),
        }
    }

    fn child(&self, kind: StageKind, shape: Shape) -> Stream {
        Stream::push(Some(self.clone()), kind, shape, Arc::clone(&self.node.session))
    }

    pub fn kind(&self) -> &StageKind {
        &self.node.kind
    }

    pub fn parent(&self) -> Option<&Stream> {
        self.node.parent.as_ref()
    }

    /// Shape of the items this stream yields
    pub fn shape(&self) -> &Shape {
        &self.node.shape
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.node.session
    }

    /// Identity, not structural equality
    pub fn ptr_eq(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Stages from this one down to the root, leaf first
    pub fn ancestry(&self) -> impl Iterator<Item = &Stream> {
        std::iter::successors(Some(self), |s| s.parent())
    }

    /// Number of stages including the root
    pub fn len(&self) -> usize {
        self.ancestry().count()
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    pub fn map(&self, callable: impl Into<Callable>) -> Result<Stream, BuildError> {
        self.map_with(callable, &Captures::new())
    }

    pub fn map_with(&self, callable: impl Into<Callable>, captures: &Captures) -> Result<Stream, BuildError> {
        self.append(Operator::Map, callable.into(), captures)
    }

    pub fn flat_map(&self, callable: impl Into<Callable>) -> Result<Stream, BuildError> {
        self.flat_map_with(callable, &Captures::new())
    }

    pub fn flat_map_with(&self, callable: impl Into<Callable>, captures: &Captures) -> Result<Stream, BuildError> {
        self.append(Operator::FlatMap, callable.into(), captures)
    }

    pub fn filter(&self, callable: impl Into<Callable>) -> Result<Stream, BuildError> {
        self.filter_with(callable, &Captures::new())
    }

    pub fn filter_with(&self, callable: impl Into<Callable>, captures: &Captures) -> Result<Stream, BuildError> {
        self.append(Operator::Filter, callable.into(), captures)
    }

    /// Attach metadata for the backend; the item shape is unchanged
    pub fn annotate(&self, metadata: impl Into<Metadata>) -> Stream {
        self.child(
            StageKind::Annotate {
                metadata: metadata.into(),
                scope: MetadataScope::Backend,
            },
            self.shape().clone(),
        )
    }

    /// Attach metadata kept on the caller's side and never emitted as a stage
    pub fn query_metadata(&self, metadata: impl Into<Metadata>) -> Stream {
        self.child(
            StageKind::Annotate {
                metadata: metadata.into(),
                scope: MetadataScope::Query,
            },
            self.shape().clone(),
        )
    }

    fn append(&self, op: Operator, callable: Callable, captures: &Captures) -> Result<Stream, BuildError> {
        let session = self.session();
        let lambda = quote(&callable, captures, &session.library, session.config.max_depth)?;
        if lambda.params.len() != 1 {
            return Err(QuoteError::StageArity(lambda.params.len()).into());
        }

        let body = desugar(*lambda.body, &session.config)?;
        ensure_primitive(&body)?;

        // Registrations made by callbacks from here on apply to later operator calls
        let callbacks = session.registry.snapshot();
        let mut resolver = Resolver::new(session.capabilities.as_ref(), &callbacks, self.clone());
        let lambda = Lambda {
            params: lambda.params,
            body: Box::new(body),
        };
        let (lambda, body_shape) = resolver.resolve_lambda(lambda, &[self.shape().clone()])?;
        let parent = resolver.into_stream();

        let mismatch = |reason: String| BuildError::ShapeMismatch {
            expr: lambda.to_string(),
            reason,
        };
        let shape = match (op, body_shape) {
            (Operator::Map, shape) => shape,
            (Operator::FlatMap, Shape::Sequence(inner)) => *inner,
            (Operator::FlatMap, Shape::Any) => Shape::Any,
            (Operator::FlatMap, other) => {
                return Err(mismatch(format!("flat_map needs a sequence, the lambda gives {}", other)));
            }
            (Operator::Filter, Shape::Bool | Shape::Any) => self.shape().clone(),
            (Operator::Filter, other) => {
                return Err(mismatch(format!("filter needs a bool, the lambda gives {}", other)));
            }
        };

        let kind = match op {
            Operator::Map => StageKind::Map(lambda),
            Operator::FlatMap => StageKind::FlatMap(lambda),
            Operator::Filter => StageKind::Filter(lambda),
        };
        debug!(operator = kind.operator(), %shape, "appended stage");
        Ok(parent.child(kind, shape))
    }

    /// Collect the chain into the value handed to a backend.
    pub fn finalize(&self) -> Result<QueryTree, BuildError> {
        let mut chain: Vec<&Stream> = self.ancestry().collect();
        chain.reverse();

        let mut root = None;
        let mut stages = Vec::with_capacity(chain.len());
        let mut query_metadata = Metadata::new();

        for stream in chain {
            match stream.kind() {
                StageKind::Root(source) => root = Some(source.clone()),
                StageKind::Map(lambda) => {
                    ensure_primitive(&lambda.body)?;
                    stages.push(Stage::Map(lambda.clone()));
                }
                StageKind::FlatMap(lambda) => {
                    ensure_primitive(&lambda.body)?;
                    stages.push(Stage::FlatMap(lambda.clone()));
                }
                StageKind::Filter(lambda) => {
                    ensure_primitive(&lambda.body)?;
                    stages.push(Stage::Filter(lambda.clone()));
                }
                StageKind::Annotate {
                    metadata,
                    scope: MetadataScope::Backend,
                } => stages.push(Stage::Annotate(metadata.clone())),
                StageKind::Annotate {
                    metadata,
                    scope: MetadataScope::Query,
                } => {
                    for (key, value) in metadata {
                        if query_metadata.insert(key.clone(), value.clone()).is_some() {
                            warn!(key = %key, "query metadata key set twice, keeping the later value");
                        }
                    }
                }
            }
        }

        // Streams are only ever created by Session::root, so the chain always has one
        let root = root.ok_or_else(|| BuildError::UnsupportedExpression {
            expr: "<stream>".to_string(),
            reason: "stream has no root".to_string(),
        })?;

        Ok(QueryTree {
            root,
            stages,
            query_metadata,
            item_shape: self.shape().clone(),
        })
    }

    /// Finalize and hand the tree to `executor`
    pub fn execute<E: Executor>(&self, executor: &E) -> Result<E::Output, BuildError> {
        let tree = self.finalize()?;
        debug!(stages = tree.stages.len(), "handing query tree to executor");
        Ok(executor.execute(&tree))
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("kind", self.kind())
            .field("shape", self.shape())
            .field("depth", &self.len())
            .finish()
    }
}

/// The finished root-to-leaf chain.
///
/// Serializes to the JSON form backends consume. Query-scoped metadata
/// stays on this value and is left out of the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTree {
    pub root: RootSource,
    /// Emitted stages in application order, annotations in place
    pub stages: Vec<Stage>,
    #[serde(skip)]
    pub query_metadata: Metadata,
    /// Shape of the items the whole query yields
    pub item_shape: Shape,
}

impl QueryTree {
    /// Backend-visible annotations, in emission order
    pub fn annotations(&self) -> impl Iterator<Item = &Metadata> {
        self.stages.iter().filter_map(|s| match s {
            Stage::Annotate(m) => Some(m),
            _ => None,
        })
    }

    /// The chain as one nested call expression.
    ///
    /// ```text
    /// Map(Filter(Files(['a.root']), lambda j: j.pt() > 30), lambda j: j.eta())
    /// ```
    pub fn to_expr(&self) -> Expr {
        let root = Expr::name(&self.root.kind).call(vec![Expr::Literal(json_to_value(self.root.handle.clone()))]);
        self.stages.iter().fold(root, |parent, stage| match stage {
            Stage::Map(l) => Expr::name("Map").call(vec![parent, Expr::Lambda(l.clone())]),
            Stage::FlatMap(l) => Expr::name("FlatMap").call(vec![parent, Expr::Lambda(l.clone())]),
            Stage::Filter(l) => Expr::name("Filter").call(vec![parent, Expr::Lambda(l.clone())]),
            Stage::Annotate(m) => Expr::name("MetaData").call(vec![
                parent,
                Expr::Literal(json_to_value(serde_json::Value::Object(m.clone()))),
            ]),
        })
    }

    /// SHA-256 of the serialized tree, hex encoded. Equal trees give equal
    /// fingerprints, so backends can key result caches on it.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let json = to_json(self)?;
        Ok(format!("{:x}", Sha256::digest(json.as_bytes())))
    }
}

impl fmt::Display for QueryTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&unparse(&self.to_expr()))
    }
}

/// A backend entry point.
///
/// Any `Fn(&QueryTree) -> R` is an executor.
pub trait Executor {
    type Output;

    fn execute(&self, tree: &QueryTree) -> Self::Output;
}

impl<F, R> Executor for F
where
    F: Fn(&QueryTree) -> R,
{
    type Output = R;

    fn execute(&self, tree: &QueryTree) -> R {
        self(tree)
    }
}
