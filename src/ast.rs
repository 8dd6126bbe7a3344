//! # linqtree - Expression and Stage Trees
//!
//! This module defines the node model shared by every pass of the compiler:
//! the expression trees produced by quoting a lambda, and the stage kinds
//! that chain those lambdas into a query.
//!
//! ## Architecture Overview
//!
//! - **[tokens]** - Lexical tokens of the lambda source language
//! - **[expressions]** - Expression nodes (literals, parameters, calls, comprehensions)
//! - **[operators]** - Arithmetic, comparison and boolean operators
//! - **[stage]** - Query stage kinds (map, flat-map, filter, annotate)
//!
//! ## Quick Start
//!
//! ```text
//! Events.FlatMap(lambda e: e.jets()).Filter(lambda j: j.pt() > 30).Map(lambda j: j.eta())
//! ```
//!
//! This chain produces one root stage and three operator stages. Each stage
//! carries a one-parameter lambda whose body is an [`Expr`].
//!
//! ## Core Concepts
//!
//! ### Immutability
//!
//! Expression nodes are plain values and stages are shared behind `Arc`.
//! Rewriting always builds new nodes, so a stage handed out earlier never
//! changes when someone chains further operators from it.
//!
//! ### Primitive Form
//!
//! Source idioms such as comprehensions and `sum(...)` appear right after
//! quoting but never in an emitted tree. After desugaring only the sequence
//! methods (`Map`, `FlatMap`, `Filter`, ...) and aggregate calls (`Sum`,
//! `Min`, `Max`, ...) remain.
//!
//! ## Examples
//!
//! ### Comprehension Lowering
//!
//! ```text
//! [j.pt() for j in e.jets() if j.eta() < 2.4]
//! e.jets().Filter(lambda j: j.eta() < 2.4).Map(lambda j: j.pt())
//! ```
//!
//! ### Aggregates
//!
//! ```text
//! sum(j for j in [1, 2, 3] if j > 1)
//! Sum([1, 2, 3].Filter(lambda j: j > 1))
//! ```
pub mod expressions;
pub mod operators;
pub mod stage;
pub mod tokens;

pub use expressions::{ComprehensionKind, DictEntry, Expr, Generator, Lambda, Target};
pub use operators::{BinOp, BoolOp, CmpOp, UnaryOp};
pub use stage::{MetadataScope, RootSource, Stage, StageKind};
pub use tokens::Token;
