//! Type-directed resolution of a desugared stage body.
//!
//! The [`Resolver`] walks the body bottom-up, giving every node a [`Shape`].
//! Calls are checked against the capability model: arguments are bound to
//! declared parameters, defaults filled in, and the declared return shape
//! carried upward. Whenever a call matches a registered callback key the
//! callback runs, after the call's arguments have been resolved, so nested
//! callbacks annotate the stream before outer ones.

use tracing::{debug, warn};

use crate::{
    ast::{BinOp, Expr, Lambda, UnaryOp},
    capability::{CapabilityLookup, MemberKind, MemberSpec, Shape, ShapeDescriptor, bind_arguments},
    error::BuildError,
    output::unparse,
    registry::{CallbackKey, RegistrySnapshot},
    stream::Stream,
    value::Value,
};

/// Methods every sequence exposes.
pub const SEQUENCE_METHODS: &[&str] = &["Map", "FlatMap", "Filter", "First", "Count"];

/// Functions available without declaration.
pub const BUILTIN_FUNCTIONS: &[&str] = &["Sum", "Min", "Max", "Count", "abs"];

pub struct Resolver<'a, C: CapabilityLookup + ?Sized> {
    capabilities: &'a C,
    callbacks: &'a RegistrySnapshot,
    stream: Stream,
    /// Shapes of the parameters in scope, innermost last
    scope: Vec<(String, Shape)>,
}

impl<'a, C: CapabilityLookup + ?Sized> Resolver<'a, C> {
    /// Resolve against `stream`, which callbacks may extend
    pub fn new(capabilities: &'a C, callbacks: &'a RegistrySnapshot, stream: Stream) -> Self {
        Resolver {
            capabilities,
            callbacks,
            stream,
            scope: vec![],
        }
    }

    /// The stream with every annotation contributed by callbacks so far
    pub fn into_stream(self) -> Stream {
        self.stream
    }

    /// Resolve a lambda whose parameters carry the given shapes.
    ///
    /// Returns the rewritten lambda and the shape of its body.
    pub fn resolve_lambda(
        &mut self,
        lambda: Lambda,
        params: &[Shape],
    ) -> Result<(Lambda, Shape), BuildError> {
        let mark = self.scope.len();
        for (i, name) in lambda.params.iter().enumerate() {
            let shape = params.get(i).cloned().unwrap_or(Shape::Any);
            self.scope.push((name.clone(), shape));
        }
        let body = self.resolve(*lambda.body);
        self.scope.truncate(mark);
        let (body, shape) = body?;
        Ok((
            Lambda {
                params: lambda.params,
                body: Box::new(body),
            },
            shape,
        ))
    }

    /// Resolve one expression, returning it rewritten along with its shape
    pub fn resolve(&mut self, expr: Expr) -> Result<(Expr, Shape), BuildError> {
        match expr {
            Expr::Literal(value) => {
                let shape = Shape::of_value(&value);
                Ok((Expr::Literal(value), shape))
            }
            Expr::Parameter(name) => {
                let shape = self
                    .scope
                    .iter()
                    .rev()
                    .find(|(n, _)| *n == name)
                    .map(|(_, s)| s.clone())
                    .unwrap_or(Shape::Any);
                Ok((Expr::Parameter(name), shape))
            }
            Expr::Name(name) => {
                let shape = if self.capabilities.function(&name).is_some()
                    || BUILTIN_FUNCTIONS.contains(&name.as_str())
                {
                    Shape::Callable
                } else {
                    warn!(name = %name, "unknown global name left for the backend");
                    Shape::Any
                };
                Ok((Expr::Name(name), shape))
            }
            Expr::Attribute { base, name } => {
                let (base, base_shape) = self.resolve(*base)?;
                self.attribute(base, base_shape, name)
            }
            Expr::Subscript { base, index } => {
                let (base, base_shape) = self.resolve(*base)?;
                let (index, _) = self.resolve(*index)?;
                let shape = self.subscript_shape(&base, &base_shape, &index)?;
                Ok((
                    Expr::Subscript {
                        base: Box::new(base),
                        index: Box::new(index),
                    },
                    shape,
                ))
            }
            Expr::Call {
                func,
                args,
                keywords,
                type_args,
            } => match *func {
                Expr::Name(name) => self.function_call(name, args, keywords, type_args),
                Expr::Attribute { base, name } => {
                    let (base, base_shape) = self.resolve(*base)?;
                    self.method_call(base, base_shape, name, args, keywords, type_args)
                }
                other => {
                    let (func, _) = self.resolve(other)?;
                    let (args, keywords) = self.resolve_arguments(args, keywords)?;
                    Ok((
                        Expr::Call {
                            func: Box::new(func),
                            args,
                            keywords,
                            type_args,
                        },
                        Shape::Any,
                    ))
                }
            },
            Expr::BinOp { op, left, right } => {
                let (left, ls) = self.resolve(*left)?;
                let (right, rs) = self.resolve(*right)?;
                let node = Expr::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                };
                let shape = arithmetic_shape(op, &ls, &rs).ok_or_else(|| mismatch(
                    &node,
                    format!("cannot apply '{}' to {} and {}", op.symbol(), ls, rs),
                ))?;
                Ok((node, shape))
            }
            Expr::UnaryOp { op, operand } => {
                let (operand, s) = self.resolve(*operand)?;
                let node = Expr::UnaryOp {
                    op,
                    operand: Box::new(operand),
                };
                let shape = match (op, s) {
                    (UnaryOp::Not, _) => Shape::Bool,
                    (_, Shape::Bool) => Shape::Int,
                    (_, s @ (Shape::Int | Shape::Float | Shape::Any)) => s,
                    (_, Shape::Named(_)) => Shape::Any,
                    (_, other) => {
                        return Err(mismatch(&node, format!("cannot negate a {}", other)));
                    }
                };
                Ok((node, shape))
            }
            Expr::Compare { op, left, right } => {
                let (left, _) = self.resolve(*left)?;
                let (right, _) = self.resolve(*right)?;
                Ok((
                    Expr::Compare {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    Shape::Bool,
                ))
            }
            Expr::BoolOp { op, values } => {
                let values = values
                    .into_iter()
                    .map(|v| self.resolve(v).map(|(e, _)| e))
                    .collect::<Result<_, _>>()?;
                Ok((Expr::BoolOp { op, values }, Shape::Bool))
            }
            Expr::IfExp { test, body, orelse } => {
                let (test, _) = self.resolve(*test)?;
                let (body, bs) = self.resolve(*body)?;
                let (orelse, os) = self.resolve(*orelse)?;
                let node = Expr::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                };
                let shape = bs.join(&os).ok_or_else(|| {
                    mismatch(&node, format!("branches give {} and {}", bs, os))
                })?;
                Ok((node, shape))
            }
            Expr::Lambda(lambda) => {
                let (lambda, _) = self.resolve_lambda(lambda, &[])?;
                Ok((Expr::Lambda(lambda), Shape::Callable))
            }
            Expr::List(items) => {
                let (items, shapes) = self.resolve_all(items)?;
                Ok((Expr::List(items), Shape::sequence(Shape::join_all(shapes))))
            }
            Expr::Tuple(items) => {
                let (items, shapes) = self.resolve_all(items)?;
                Ok((Expr::Tuple(items), Shape::Tuple(shapes)))
            }
            Expr::Dict(items) => {
                let mut entries = Vec::with_capacity(items.len());
                let mut fields = Vec::with_capacity(items.len());
                for (key, value) in items {
                    let (value, shape) = self.resolve(value)?;
                    fields.push((key.clone(), shape));
                    entries.push((key, value));
                }
                Ok((Expr::Dict(entries), Shape::Record(fields)))
            }
            comprehension @ Expr::Comprehension { .. } => Err(BuildError::UnsupportedExpression {
                expr: unparse(&comprehension),
                reason: "comprehension survived desugaring".to_string(),
            }),
            merge @ Expr::DictMerge(_) => Err(BuildError::UnsupportedExpression {
                expr: unparse(&merge),
                reason: "dictionary expansion survived desugaring".to_string(),
            }),
        }
    }

    fn resolve_all(&mut self, items: Vec<Expr>) -> Result<(Vec<Expr>, Vec<Shape>), BuildError> {
        let pairs = items
            .into_iter()
            .map(|item| self.resolve(item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs.into_iter().unzip())
    }

    fn resolve_arguments(
        &mut self,
        args: Vec<Expr>,
        keywords: Vec<(String, Expr)>,
    ) -> Result<(Vec<Expr>, Vec<(String, Expr)>), BuildError> {
        let (args, _) = self.resolve_all(args)?;
        let keywords = keywords
            .into_iter()
            .map(|(k, v)| self.resolve(v).map(|(e, _)| (k, e)))
            .collect::<Result<_, _>>()?;
        Ok((args, keywords))
    }

    /// Run the callback for `key` against the current stream
    fn dispatch(
        &mut self,
        key: CallbackKey,
        call: Expr,
        type_args: &[Value],
        shape: Shape,
    ) -> Result<(Expr, Shape), BuildError> {
        let rewrite = self
            .callbacks
            .dispatch(&key, self.stream.clone(), call, type_args)?;
        self.stream = rewrite.stream;
        Ok((rewrite.call, rewrite.shape.unwrap_or(shape)))
    }

    fn function_call(
        &mut self,
        name: String,
        args: Vec<Expr>,
        keywords: Vec<(String, Expr)>,
        type_args: Vec<Value>,
    ) -> Result<(Expr, Shape), BuildError> {
        let capabilities = self.capabilities;
        let (args, arg_shapes) = self.resolve_all(args)?;
        let (_, keywords) = self.resolve_arguments(vec![], keywords)?;
        let key = CallbackKey::Function(name.clone());
        let call = |args: Vec<Expr>, keywords: Vec<(String, Expr)>| Expr::Call {
            func: Box::new(Expr::Name(name.clone())),
            args,
            keywords,
            type_args: type_args.clone(),
        };

        if let Some(spec) = capabilities.function(&name) {
            let unbound = call(args.clone(), keywords.clone());
            let args = bind_arguments(&unbound, &spec.params, args, keywords)?;
            let returns = spec.returns.clone().unwrap_or_else(|| {
                warn!(function = %name, "function declared without a return shape");
                Shape::Any
            });
            return self.dispatch(key, call(args, vec![]), &type_args, returns);
        }

        let node = call(args, keywords);
        if BUILTIN_FUNCTIONS.contains(&name.as_str()) {
            let shape = builtin_function_shape(&name, &node, &arg_shapes)?;
            return self.dispatch(key, node, &type_args, shape);
        }

        if self.callbacks.contains(&key) {
            return self.dispatch(key, node, &type_args, Shape::Any);
        }
        Err(BuildError::UnresolvedCall {
            call: unparse(&node),
            reason: format!("no function named '{}' is declared", name),
        })
    }

    fn method_call(
        &mut self,
        base: Expr,
        base_shape: Shape,
        name: String,
        args: Vec<Expr>,
        keywords: Vec<(String, Expr)>,
        type_args: Vec<Value>,
    ) -> Result<(Expr, Shape), BuildError> {
        let capabilities = self.capabilities;
        let call = |base: Expr, args: Vec<Expr>, keywords: Vec<(String, Expr)>, type_args: Vec<Value>| {
            Expr::Call {
                func: Box::new(base.attr(&name)),
                args,
                keywords,
                type_args,
            }
        };

        let (owner, descriptor) = match base_shape {
            Shape::Any => {
                debug!(method = %name, "call on an untyped value passed through");
                let (args, keywords) = self.resolve_arguments(args, keywords)?;
                return Ok((call(base, args, keywords, type_args), Shape::Any));
            }
            Shape::Sequence(element) => {
                let builtin = SEQUENCE_METHODS.contains(&name.as_str());
                if builtin && keywords.is_empty() && type_args.is_empty() {
                    return self.sequence_method(base, *element, &name, args);
                }
                match capabilities.collection(&element.to_string()) {
                    Some(descriptor) if !builtin => (Shape::Sequence(element).to_string(), descriptor),
                    _ => {
                        let (args, keywords) = self.resolve_arguments(args, keywords)?;
                        let reason = if builtin {
                            format!("'{}' takes no keyword or type arguments on a sequence", name)
                        } else {
                            format!("a sequence of {} has no method '{}'", element, name)
                        };
                        return Err(BuildError::UnresolvedCall {
                            call: unparse(&call(base, args, keywords, type_args)),
                            reason,
                        });
                    }
                }
            }
            Shape::Named(shape_name) => match capabilities.shape(&shape_name) {
                Some(descriptor) => (shape_name, descriptor),
                None => {
                    let (args, keywords) = self.resolve_arguments(args, keywords)?;
                    return Err(BuildError::UnresolvedCall {
                        call: unparse(&call(base, args, keywords, type_args)),
                        reason: format!("shape '{}' is not declared", shape_name),
                    });
                }
            },
            other => {
                let (args, keywords) = self.resolve_arguments(args, keywords)?;
                return Err(BuildError::UnresolvedCall {
                    call: unparse(&call(base, args, keywords, type_args)),
                    reason: format!("a {} has no method '{}'", other, name),
                });
            }
        };

        let (args, keywords) = self.resolve_arguments(args, keywords)?;
        let member = match descriptor.member(&name) {
            Some(member) if member.kind == MemberKind::Method => member,
            Some(_) => {
                return Err(BuildError::UnresolvedCall {
                    call: unparse(&call(base, args, keywords, type_args)),
                    reason: format!("'{}.{}' is an attribute, not a method", owner, name),
                });
            }
            None if descriptor.dynamic => {
                debug!(shape = %owner, member = %name, "undeclared member accepted as any");
                return Ok((call(base, args, keywords, type_args), Shape::Any));
            }
            None => {
                return Err(BuildError::UnresolvedCall {
                    call: unparse(&call(base, args, keywords, type_args)),
                    reason: format!("'{}' has no member '{}'", owner, name),
                });
            }
        };

        let unbound = call(base.clone(), args.clone(), keywords.clone(), type_args.clone());
        let args = bind_arguments(&unbound, &member.params, args, keywords)?;
        let node = call(base, args, vec![], type_args.clone());

        if !type_args.is_empty() {
            let key = CallbackKey::parameterized(&owner, &name);
            if !self.callbacks.contains(&key) {
                debug!(%key, "no parameterized callback, call left untyped");
                return Ok((node, Shape::Any));
            }
            return self.dispatch(key, node, &type_args, Shape::Any);
        }

        let returns = declared_return(&owner, &name, member);
        let (node, shape) = self.dispatch(CallbackKey::Shape(owner.clone()), node, &[], returns)?;
        self.dispatch(CallbackKey::member(&owner, &name), node, &[], shape)
    }

    /// The operators every sequence carries
    fn sequence_method(
        &mut self,
        base: Expr,
        element: Shape,
        name: &str,
        args: Vec<Expr>,
    ) -> Result<(Expr, Shape), BuildError> {
        let mut args = args;
        match (name, args.len()) {
            ("First", 0) => Ok((base.method(name, args), element)),
            ("Count", 0) => Ok((base.method(name, args), Shape::Int)),
            ("Map" | "FlatMap" | "Filter", 1) => {
                let (func, body) = match args.remove(0) {
                    Expr::Lambda(lambda) => {
                        let (lambda, body) = self.resolve_lambda(lambda, &[element.clone()])?;
                        (Expr::Lambda(lambda), body)
                    }
                    other => {
                        let (func, _) = self.resolve(other)?;
                        (func, Shape::Any)
                    }
                };
                let node = base.method(name, vec![func]);
                let shape = match (name, body) {
                    ("Map", body) => Shape::sequence(body),
                    ("FlatMap", Shape::Sequence(inner)) => Shape::Sequence(inner),
                    ("FlatMap", Shape::Any) => Shape::sequence(Shape::Any),
                    ("FlatMap", other) => {
                        return Err(mismatch(
                            &node,
                            format!("FlatMap needs a sequence, the lambda gives {}", other),
                        ));
                    }
                    (_, Shape::Bool | Shape::Any) => Shape::sequence(element),
                    (_, other) => {
                        return Err(mismatch(
                            &node,
                            format!("Filter needs a bool, the lambda gives {}", other),
                        ));
                    }
                };
                Ok((node, shape))
            }
            (method, n) => {
                let (args, _) = self.resolve_all(args)?;
                Err(BuildError::UnresolvedCall {
                    call: unparse(&base.method(method, args)),
                    reason: format!("'{}' does not take {} arguments", method, n),
                })
            }
        }
    }

    fn attribute(
        &mut self,
        base: Expr,
        base_shape: Shape,
        name: String,
    ) -> Result<(Expr, Shape), BuildError> {
        let capabilities = self.capabilities;
        let node = base.attr(&name);
        match base_shape {
            Shape::Any => {
                debug!(attribute = %name, "access on an untyped value passed through");
                Ok((node, Shape::Any))
            }
            Shape::Record(fields) => match fields.into_iter().find(|(f, _)| *f == name) {
                Some((_, shape)) => Ok((node, shape)),
                None => Err(BuildError::UnresolvedCall {
                    call: unparse(&node),
                    reason: format!("record has no field '{}'", name),
                }),
            },
            Shape::Sequence(_) if SEQUENCE_METHODS.contains(&name.as_str()) => {
                Ok((node, Shape::Callable))
            }
            Shape::Sequence(element) => match capabilities.collection(&element.to_string()) {
                Some(descriptor) => {
                    let owner = Shape::Sequence(element).to_string();
                    self.member_attribute(&owner, descriptor, node, &name)
                }
                None => Err(BuildError::UnresolvedCall {
                    call: unparse(&node),
                    reason: format!("a sequence of {} has no attribute '{}'", element, name),
                }),
            },
            Shape::Named(shape_name) => match capabilities.shape(&shape_name) {
                Some(descriptor) => self.member_attribute(&shape_name, descriptor, node, &name),
                None => Err(BuildError::UnresolvedCall {
                    call: unparse(&node),
                    reason: format!("shape '{}' is not declared", shape_name),
                }),
            },
            other => Err(BuildError::UnresolvedCall {
                call: unparse(&node),
                reason: format!("a {} has no attribute '{}'", other, name),
            }),
        }
    }

    /// Attribute read on a declared shape or collection
    fn member_attribute(
        &mut self,
        owner: &str,
        descriptor: &ShapeDescriptor,
        node: Expr,
        name: &str,
    ) -> Result<(Expr, Shape), BuildError> {
        match descriptor.member(name) {
            Some(member) if member.kind == MemberKind::Attribute => {
                let returns = declared_return(owner, name, member);
                let (node, shape) =
                    self.dispatch(CallbackKey::Shape(owner.to_string()), node, &[], returns)?;
                self.dispatch(CallbackKey::member(owner, name), node, &[], shape)
            }
            Some(_) => Ok((node, Shape::Callable)),
            None if descriptor.dynamic => Ok((node, Shape::Any)),
            None => Err(BuildError::UnresolvedCall {
                call: unparse(&node),
                reason: format!("'{}' has no member '{}'", owner, name),
            }),
        }
    }

    fn subscript_shape(&self, base: &Expr, base_shape: &Shape, index: &Expr) -> Result<Shape, BuildError> {
        let node = || Expr::Subscript {
            base: Box::new(base.clone()),
            index: Box::new(index.clone()),
        };
        match (base_shape, index) {
            (Shape::Any, _) => Ok(Shape::Any),
            (Shape::Sequence(element), _) => Ok(element.as_ref().clone()),
            (Shape::Str, _) => Ok(Shape::Str),
            (Shape::Tuple(items), Expr::Literal(Value::Integer(i))) => {
                let position = if *i < 0 { items.len() as i64 + i } else { *i };
                usize::try_from(position)
                    .ok()
                    .and_then(|p| items.get(p))
                    .cloned()
                    .ok_or_else(|| mismatch(&node(), format!("index {} out of range for {}", i, base_shape)))
            }
            (Shape::Tuple(items), _) => Ok(Shape::join_all(items.iter().cloned())),
            (Shape::Record(fields), Expr::Literal(Value::String(key))) => fields
                .iter()
                .find(|(f, _)| f == key)
                .map(|(_, s)| s.clone())
                .ok_or_else(|| mismatch(&node(), format!("record has no field '{}'", key))),
            (Shape::Named(name), _) => {
                debug!(shape = %name, "indexing a declared shape left to the backend");
                Ok(Shape::Any)
            }
            (Shape::Record(_), _) => Ok(Shape::Any),
            (other, _) => Err(mismatch(&node(), format!("a {} cannot be indexed", other))),
        }
    }
}

fn declared_return(shape: &str, member: &str, spec: &MemberSpec) -> Shape {
    spec.returns.clone().unwrap_or_else(|| {
        warn!(shape, member, "member declared without a return shape");
        Shape::Any
    })
}

fn mismatch(expr: &Expr, reason: String) -> BuildError {
    BuildError::ShapeMismatch {
        expr: unparse(expr),
        reason,
    }
}

/// Result shape of arithmetic, `None` when the operands do not fit
pub fn arithmetic_shape(op: BinOp, left: &Shape, right: &Shape) -> Option<Shape> {
    let numeric = |s: &Shape| s.is_numeric() || *s == Shape::Bool;
    match (left, right) {
        (Shape::Any, _) | (_, Shape::Any) => Some(Shape::Any),
        (Shape::Named(_), _) | (_, Shape::Named(_)) => {
            debug!(op = op.symbol(), %left, %right, "arithmetic on a declared shape left to the backend");
            Some(Shape::Any)
        }
        (l, r) if numeric(l) && numeric(r) => Some(
            if op == BinOp::Divide || *l == Shape::Float || *r == Shape::Float {
                Shape::Float
            } else {
                Shape::Int
            },
        ),
        (Shape::Str, Shape::Str) if op == BinOp::Add => Some(Shape::Str),
        (Shape::Sequence(_), Shape::Sequence(_)) if op == BinOp::Add => left.join(right),
        _ => None,
    }
}

fn builtin_function_shape(name: &str, call: &Expr, args: &[Shape]) -> Result<Shape, BuildError> {
    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(BuildError::UnresolvedCall {
                call: unparse(call),
                reason: format!("'{}' takes {} argument, {} given", name, expected, args.len()),
            })
        }
    };
    arity(1)?;
    match (name, &args[0]) {
        ("Count", _) => Ok(Shape::Int),
        ("abs", s) if s.is_numeric() => Ok(s.clone()),
        ("abs", _) => Ok(Shape::Any),
        (_, Shape::Sequence(element)) => Ok(element.as_ref().clone()),
        _ => Ok(Shape::Any),
    }
}
