pub mod ast;
pub mod capability;
pub mod config;
pub mod desugar;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod literal;
pub mod metadata;
pub mod output;
pub mod parser;
pub mod quote;
pub mod registry;
pub mod resolve;
pub mod stream;
pub mod value;

#[cfg(feature = "cli")]
pub mod cli;

pub use ast::{BinOp, BoolOp, CmpOp, DictEntry, Expr, Lambda, MetadataScope, RootSource, Stage, StageKind, Token, UnaryOp};
pub use capability::{CapabilityFile, CapabilityLookup, CapabilityModel, Param, Shape, ShapeDescriptor};
pub use config::SessionConfig;
pub use error::{BuildError, ConfigError, EvalError, QuoteError};
pub use evaluator::Evaluator;
pub use lexer::{LexError, Lexer, Position};
pub use metadata::{KnownMetadata, Metadata, metadata};
pub use output::{to_json, to_json_pretty, unparse};
pub use parser::{ParseError, Parser};
pub use quote::{Callable, Capture, Captures, FunctionLibrary};
pub use registry::{CallbackKey, CallbackRegistry, Rewrite};
pub use stream::{Executor, QueryTree, Session, Stream};
pub use value::Value;
