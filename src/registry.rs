//! Rewrite callbacks keyed by function, shape or member.
//!
//! Backend integration code registers a callback for a placeholder function
//! (`deltaR(...)`), for a whole shape, or for one member of a shape. While
//! a stage is being built, every call site that matches a key runs its
//! callback, which may append annotations to the stream and must return a
//! replacement for the call.
//!
//! The table is copy-on-write. Each operator call works from one snapshot,
//! so a callback that registers another callback only affects later calls.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, OnceLock},
};

use tracing::debug;

use crate::{
    ast::{Expr, StageKind},
    capability::Shape,
    error::BuildError,
    stream::Stream,
    value::Value,
};

/// What a callback is registered for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallbackKey {
    /// Calls of a global function: `deltaR(a, b)`
    Function(String),
    /// Every member call on a shape
    Shape(String),
    /// One member of a shape: `Jet.pt`
    Member { shape: String, member: String },
    /// Parameterized calls of a member: `Jet.getAttribute[float](...)`
    Parameterized { shape: String, member: String },
}

impl CallbackKey {
    pub fn function(name: &str) -> Self {
        CallbackKey::Function(name.to_string())
    }

    pub fn shape(name: &str) -> Self {
        CallbackKey::Shape(name.to_string())
    }

    pub fn member(shape: &str, member: &str) -> Self {
        CallbackKey::Member {
            shape: shape.to_string(),
            member: member.to_string(),
        }
    }

    pub fn parameterized(shape: &str, member: &str) -> Self {
        CallbackKey::Parameterized {
            shape: shape.to_string(),
            member: member.to_string(),
        }
    }
}

impl fmt::Display for CallbackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackKey::Function(name) => write!(f, "function {}", name),
            CallbackKey::Shape(name) => write!(f, "shape {}", name),
            CallbackKey::Member { shape, member } => write!(f, "member {}.{}", shape, member),
            CallbackKey::Parameterized { shape, member } => {
                write!(f, "parameterized member {}.{}[...]", shape, member)
            }
        }
    }
}

/// Result of a callback.
pub struct Rewrite {
    /// The input stream, possibly extended with annotations
    pub stream: Stream,
    /// Replacement for the call site
    pub call: Expr,
    /// Shape of the replacement, when the callback knows it better than
    /// the capability model (e.g. from type arguments)
    pub shape: Option<Shape>,
}

impl Rewrite {
    /// Leave stream and call as they are
    pub fn unchanged(stream: Stream, call: Expr) -> Self {
        Rewrite {
            stream,
            call,
            shape: None,
        }
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }
}

/// A callback: current stream, call node and type arguments in, [`Rewrite`] out.
pub type RewriteFn = Arc<dyn Fn(Stream, Expr, &[Value]) -> Rewrite + Send + Sync>;

type Table = HashMap<CallbackKey, RewriteFn>;

/// Process-wide or per-session table of rewrite callbacks.
///
/// # Example
/// ```
/// use linqtree::registry::{CallbackKey, CallbackRegistry, Rewrite};
/// use linqtree::metadata::metadata;
///
/// let registry = CallbackRegistry::new();
/// registry.register(CallbackKey::function("deltaR"), |stream, call, _| {
///     Rewrite::unchanged(stream.annotate(metadata([("name", "deltaR")])), call)
/// });
/// assert!(registry.snapshot().contains(&CallbackKey::function("deltaR")));
/// ```
#[derive(Default)]
pub struct CallbackRegistry {
    table: Mutex<Arc<Table>>,
}

static GLOBAL: OnceLock<Arc<CallbackRegistry>> = OnceLock::new();

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default registry shared by sessions that are not given their own
    pub fn global() -> Arc<CallbackRegistry> {
        GLOBAL.get_or_init(|| Arc::new(CallbackRegistry::new())).clone()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, Arc<Table>> {
        // The table is replaced wholesale, so a poisoned guard still holds a consistent map
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a callback, replacing any previous one for the same key
    pub fn register<F>(&self, key: CallbackKey, callback: F)
    where
        F: Fn(Stream, Expr, &[Value]) -> Rewrite + Send + Sync + 'static,
    {
        debug!(%key, "registering callback");
        let mut table = self.table();
        Arc::make_mut(&mut table).insert(key, Arc::new(callback));
    }

    /// Remove every callback
    pub fn reset(&self) {
        *self.table() = Arc::new(Table::new());
    }

    /// Consistent view of the table at this instant
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            table: Arc::clone(&self.table()),
        }
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.table().len())
            .finish()
    }
}

/// Immutable view of a registry.
#[derive(Clone)]
pub struct RegistrySnapshot {
    table: Arc<Table>,
}

impl RegistrySnapshot {
    pub fn contains(&self, key: &CallbackKey) -> bool {
        self.table.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Run the callback for `key`, if any, and check its result.
    ///
    /// Without a callback the stream and call come back unchanged.
    pub fn dispatch(
        &self,
        key: &CallbackKey,
        stream: Stream,
        call: Expr,
        type_args: &[Value],
    ) -> Result<Rewrite, BuildError> {
        let Some(callback) = self.table.get(key).cloned() else {
            return Ok(Rewrite::unchanged(stream, call));
        };

        debug!(%key, "dispatching callback");
        let input = stream.clone();
        let rewrite = callback(stream, call, type_args);
        check_extension(key, &input, &rewrite.stream)?;
        Ok(rewrite)
    }
}

/// A callback may only put annotations on top of the stream it was given.
fn check_extension(key: &CallbackKey, input: &Stream, output: &Stream) -> Result<(), BuildError> {
    let violation = |reason: String| BuildError::CallbackContractViolation {
        key: key.to_string(),
        reason,
    };

    let mut cursor = Some(output.clone());
    while let Some(stage) = cursor {
        if stage.ptr_eq(input) {
            return Ok(());
        }
        if !matches!(stage.kind(), StageKind::Annotate { .. }) {
            return Err(violation(format!(
                "it added a {} stage; only annotations may be added",
                stage.kind().operator()
            )));
        }
        cursor = stage.parent().cloned();
    }
    Err(violation(
        "the returned stream does not extend the stream it was given".to_string(),
    ))
}
