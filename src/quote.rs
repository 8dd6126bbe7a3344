//! Turning callables into expression trees.
//!
//! A callable arrives as lambda source text, as the name of a function
//! defined in a [`FunctionLibrary`], or as a tree built with the
//! [`Expr`] builder API. Quoting parses it if needed and classifies
//! every name in the body:
//!
//! - names bound by the lambda or an enclosing comprehension become
//!   [`Expr::Parameter`];
//! - names found in the [`Captures`] become [`Expr::Literal`] snapshots;
//! - the brackets of `j.getAttribute[float]('x')` become the call's type
//!   arguments, captured literals included;
//! - anything else stays a global [`Expr::Name`] to be resolved later.
//!
//! Snapshots are taken by value, so changing a capture after quoting has
//! no effect on trees already built from it.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    ast::{Expr, Generator, Lambda},
    error::QuoteError,
    parser::parse_expression,
    stream::Stream,
    value::Value,
};

/// Something that can be quoted into a [`Lambda`].
#[derive(Debug, Clone, PartialEq)]
pub enum Callable {
    /// Lambda source, e.g. `lambda j: j.pt() > 30`
    Source(String),
    /// A function defined in the session's [`FunctionLibrary`]
    Named(String),
    /// A tree built directly with the builder API
    Lambda(Lambda),
}

impl From<&str> for Callable {
    fn from(source: &str) -> Self {
        Callable::Source(source.to_string())
    }
}

impl From<String> for Callable {
    fn from(source: String) -> Self {
        Callable::Source(source)
    }
}

impl From<Lambda> for Callable {
    fn from(lambda: Lambda) -> Self {
        Callable::Lambda(lambda)
    }
}

/// A value visible at the call site under some name.
#[derive(Debug, Clone)]
pub enum Capture {
    /// A value with a literal representation
    Literal(Value),
    /// A value of some host type with no literal form, identified by its type name
    Opaque(String),
    /// A stream, which cannot be embedded inside another stream's lambda
    Stream(Stream),
}

/// Named values visible to a lambda when it is quoted.
///
/// # Example
/// ```
/// use linqtree::{Captures, Value};
///
/// let captures = Captures::new().literal("cut", 30.0).literal("names", vec!["pt", "eta"]);
/// assert_eq!(captures.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Captures {
    entries: HashMap<String, Capture>,
}

impl Captures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn literal(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.entries
            .insert(name.to_string(), Capture::Literal(value.into()));
        self
    }

    pub fn opaque(mut self, name: &str, type_name: &str) -> Self {
        self.entries
            .insert(name.to_string(), Capture::Opaque(type_name.to_string()));
        self
    }

    pub fn stream(mut self, name: &str, stream: Stream) -> Self {
        self.entries.insert(name.to_string(), Capture::Stream(stream));
        self
    }

    pub fn insert(&mut self, name: &str, capture: Capture) {
        self.entries.insert(name.to_string(), capture);
    }

    pub fn get(&self, name: &str) -> Option<&Capture> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Named functions that callables may refer to by name.
///
/// A library function used inside a lambda body is inlined as a lambda
/// value and applied by desugaring.
#[derive(Debug, Clone, Default)]
pub struct FunctionLibrary {
    functions: HashMap<String, Lambda>,
}

impl FunctionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a function from lambda source
    pub fn define(&mut self, name: &str, source: &str) -> Result<(), QuoteError> {
        match parse_expression(source)? {
            Expr::Lambda(lambda) => {
                self.functions.insert(name.to_string(), lambda);
                Ok(())
            }
            _ => Err(QuoteError::UnsupportedConstruct(format!(
                "function '{}' must be defined by a lambda",
                name
            ))),
        }
    }

    pub fn define_lambda(&mut self, name: &str, lambda: Lambda) {
        self.functions.insert(name.to_string(), lambda);
    }

    pub fn get(&self, name: &str) -> Option<&Lambda> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

/// Quote a callable into a lambda with every name classified.
pub fn quote(
    callable: &Callable,
    captures: &Captures,
    library: &FunctionLibrary,
    max_depth: usize,
) -> Result<Lambda, QuoteError> {
    let raw = match callable {
        Callable::Source(source) => match parse_expression(source)? {
            Expr::Lambda(lambda) => lambda,
            other => {
                return Err(QuoteError::UnsupportedConstruct(format!(
                    "expected a lambda, found {}",
                    crate::output::unparse(&other)
                )));
            }
        },
        Callable::Named(name) => library
            .get(name)
            .cloned()
            .ok_or_else(|| QuoteError::SourceUnavailable(name.clone()))?,
        Callable::Lambda(lambda) => lambda.clone(),
    };

    let mut quoter = Quoter {
        captures,
        library,
        bound: raw.params.clone(),
        inlining: vec![],
        max_depth,
    };
    let body = quoter.classify(*raw.body, 0)?;
    debug!(params = ?raw.params, "quoted lambda");
    Ok(Lambda {
        params: raw.params,
        body: Box::new(body),
    })
}

struct Quoter<'a> {
    captures: &'a Captures,
    library: &'a FunctionLibrary,
    bound: Vec<String>,
    /// Library functions currently being inlined, to stop recursion
    inlining: Vec<String>,
    max_depth: usize,
}

impl Quoter<'_> {
    fn classify(&mut self, expr: Expr, depth: usize) -> Result<Expr, QuoteError> {
        if depth > self.max_depth {
            return Err(QuoteError::TooDeep(self.max_depth));
        }

        match expr {
            Expr::Name(name) | Expr::Parameter(name) if self.bound.contains(&name) => {
                Ok(Expr::Parameter(name))
            }
            Expr::Name(name) | Expr::Parameter(name) => self.free_name(name, depth),
            Expr::Lambda(Lambda { params, body }) => {
                let mark = self.bound.len();
                self.bound.extend(params.iter().cloned());
                let body = self.classify(*body, depth + 1);
                self.bound.truncate(mark);
                Ok(Expr::Lambda(Lambda {
                    params,
                    body: Box::new(body?),
                }))
            }
            Expr::Comprehension {
                kind,
                element,
                generators,
            } => {
                let mark = self.bound.len();
                let result = self.classify_comprehension(*element, generators, depth);
                self.bound.truncate(mark);
                let (element, generators) = result?;
                Ok(Expr::Comprehension {
                    kind,
                    element: Box::new(element),
                    generators,
                })
            }
            Expr::Call {
                func,
                args,
                keywords,
                type_args,
            } => {
                let (func, type_args) = match *func {
                    Expr::Subscript { base, index }
                        if type_args.is_empty() && matches!(base.as_ref(), Expr::Attribute { .. }) =>
                    {
                        match self.type_arguments(&index)? {
                            Some(type_args) => (base, type_args),
                            None => (Box::new(Expr::Subscript { base, index }), type_args),
                        }
                    }
                    func => (Box::new(func), type_args),
                };
                Expr::Call {
                    func,
                    args,
                    keywords,
                    type_args,
                }
                .try_map_children(&mut |child| self.classify(child, depth + 1))
            }
            other => other.try_map_children(&mut |child| self.classify(child, depth + 1)),
        }
    }

    /// Bracketed parameters of `obj.method[T, ...](args)`.
    ///
    /// Bare names become their own text unless a literal is captured under
    /// them. `None` when some item is neither a name nor a string, leaving
    /// the brackets as an ordinary subscript.
    fn type_arguments(&self, index: &Expr) -> Result<Option<Vec<Value>>, QuoteError> {
        let items = match index {
            Expr::Tuple(items) => items.as_slice(),
            single => std::slice::from_ref(single),
        };

        let mut type_args = Vec::with_capacity(items.len());
        for item in items {
            type_args.push(match item {
                Expr::Literal(Value::String(s)) => Value::String(s.clone()),
                Expr::Name(name) | Expr::Parameter(name) if self.bound.contains(name) => {
                    return Ok(None);
                }
                Expr::Name(name) | Expr::Parameter(name) => {
                    self.captured(name)?.unwrap_or_else(|| Value::String(name.clone()))
                }
                _ => return Ok(None),
            });
        }
        Ok(Some(type_args))
    }

    /// Literal snapshot of a captured variable
    fn captured(&self, name: &str) -> Result<Option<Value>, QuoteError> {
        match self.captures.get(name) {
            Some(Capture::Literal(value)) => Ok(Some(value.clone())),
            Some(Capture::Opaque(type_name)) => Err(QuoteError::NoLiteral {
                name: name.to_string(),
                type_name: type_name.clone(),
            }),
            Some(Capture::Stream(_)) => Err(QuoteError::NoLiteral {
                name: name.to_string(),
                type_name: "stream".to_string(),
            }),
            None => Ok(None),
        }
    }

    /// Each clause sees the targets of the clauses before it; the element sees all.
    fn classify_comprehension(
        &mut self,
        element: Expr,
        generators: Vec<Generator>,
        depth: usize,
    ) -> Result<(Expr, Vec<Generator>), QuoteError> {
        let mut classified = Vec::with_capacity(generators.len());
        for g in generators {
            let iter = self.classify(g.iter, depth + 1)?;
            self.bound.extend(g.target.names());
            let ifs = g
                .ifs
                .into_iter()
                .map(|c| self.classify(c, depth + 1))
                .collect::<Result<_, _>>()?;
            classified.push(Generator {
                target: g.target,
                iter,
                ifs,
            });
        }
        let element = self.classify(element, depth + 1)?;
        Ok((element, classified))
    }

    fn free_name(&mut self, name: String, depth: usize) -> Result<Expr, QuoteError> {
        if let Some(value) = self.captured(&name)? {
            return Ok(Expr::Literal(value));
        }

        if let Some(function) = self.library.get(&name) {
            if self.inlining.contains(&name) {
                return Err(QuoteError::UnsupportedConstruct(format!(
                    "recursive function '{}'",
                    name
                )));
            }
            // Library functions are closed over their own parameters only
            let outer = std::mem::take(&mut self.bound);
            self.inlining.push(name);
            let inlined = self.classify(Expr::Lambda(function.clone()), depth + 1);
            self.inlining.pop();
            self.bound = outer;
            return inlined;
        }

        Ok(Expr::Name(name))
    }
}
