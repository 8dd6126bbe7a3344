//! In-memory backend over literal values.
//!
//! [`LiteralDataset`] is a root factory for a list of values and
//! [`LiteralExecutor`] runs a finished [`QueryTree`] over it with the
//! [`Evaluator`]. Useful for checking what a query means without a real
//! backend.
//!
//! # Example
//! ```
//! use linqtree::literal::{LiteralDataset, LiteralExecutor};
//! use linqtree::{Session, Value};
//!
//! let session = Session::builder().build();
//! let numbers = LiteralDataset::new(vec![1, 2, 3, 4]).root(&session);
//! let result = numbers
//!     .filter("lambda n: n % 2 == 0").unwrap()
//!     .map("lambda n: n * 10").unwrap()
//!     .execute(&LiteralExecutor::new())
//!     .unwrap();
//!
//! assert_eq!(result, Ok(vec![Value::Integer(20), Value::Integer(40)]));
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::{
    ast::{RootSource, Stage},
    capability::Shape,
    error::EvalError,
    evaluator::Evaluator,
    stream::{Executor, QueryTree, Session, Stream},
    value::{Value, json_to_value, value_to_json},
};

/// Root kind of literal datasets
pub const LITERAL_DATASET: &str = "LiteralDataset";

/// A fixed list of values to start a stream from.
#[derive(Debug, Clone, PartialEq)]
pub struct LiteralDataset {
    items: Vec<Value>,
}

impl LiteralDataset {
    pub fn new<T: Into<Value>>(items: Vec<T>) -> Self {
        LiteralDataset {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    /// Common shape of the items, `any` when they disagree
    pub fn shape(&self) -> Shape {
        Shape::join_all(self.items.iter().map(Shape::of_value))
    }

    pub fn source(&self) -> RootSource {
        let handle = self.items.iter().cloned().map(value_to_json).collect();
        RootSource::new(LITERAL_DATASET, serde_json::Value::Array(handle))
    }

    pub fn root(&self, session: &Arc<Session>) -> Stream {
        session.root(self.source(), self.shape())
    }
}

/// Runs query trees rooted at a [`LiteralDataset`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralExecutor {
    evaluator: Evaluator,
}

impl LiteralExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self, tree: &QueryTree) -> Result<Vec<Value>, EvalError> {
        if tree.root.kind != LITERAL_DATASET {
            return Err(EvalError::Unsupported(format!(
                "queries over '{}' sources",
                tree.root.kind
            )));
        }
        let mut items = match json_to_value(tree.root.handle.clone()) {
            Value::List(items) => items,
            other => {
                return Err(EvalError::TypeError(format!(
                    "literal dataset handle must be a list, not {}",
                    other.type_name()
                )));
            }
        };

        for stage in &tree.stages {
            items = match stage {
                Stage::Map(lambda) => items
                    .into_iter()
                    .map(|item| self.evaluator.apply(lambda, vec![item], &[]))
                    .collect::<Result<_, _>>()?,
                Stage::FlatMap(lambda) => {
                    let mut flat = Vec::new();
                    for item in items {
                        match self.evaluator.apply(lambda, vec![item], &[])? {
                            Value::List(inner) | Value::Tuple(inner) => flat.extend(inner),
                            other => {
                                return Err(EvalError::TypeError(format!(
                                    "flat_map lambda returned a {}, not a sequence",
                                    other.type_name()
                                )));
                            }
                        }
                    }
                    flat
                }
                Stage::Filter(lambda) => {
                    let mut kept = Vec::with_capacity(items.len());
                    for item in items {
                        if self.evaluator.apply(lambda, vec![item.clone()], &[])?.is_truthy() {
                            kept.push(item);
                        }
                    }
                    kept
                }
                Stage::Annotate(_) => items,
            };
        }

        debug!(count = items.len(), "literal query finished");
        Ok(items)
    }
}

impl Executor for LiteralExecutor {
    type Output = Result<Vec<Value>, EvalError>;

    fn execute(&self, tree: &QueryTree) -> Self::Output {
        self.run(tree)
    }
}
