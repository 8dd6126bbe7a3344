use serde::Serialize;

use crate::ast::{BinOp, BoolOp, CmpOp, UnaryOp};
use crate::value::Value;

/// Expression tree node.
///
/// Produced by quoting a lambda, rewritten by desugaring and resolution,
/// and finally handed to a backend inside the stages of a query tree.
/// Nodes are plain values: rewriting always builds new nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", content = "value", rename_all = "snake_case")]
pub enum Expr {
    /// Embedded constant
    ///
    /// # Example
    /// ```text
    /// 30.0
    /// ['pt', 'eta']
    /// ```
    Literal(Value),

    /// A parameter bound by an enclosing lambda
    Parameter(String),

    /// A free global symbol, resolved against registered functions
    ///
    /// # Example
    /// ```text
    /// abs
    /// Sum
    /// ```
    Name(String),

    /// Attribute access
    ///
    /// # Example
    /// ```text
    /// e.jets
    /// ```
    Attribute { base: Box<Expr>, name: String },

    /// Indexing
    ///
    /// # Example
    /// ```text
    /// pair[0]
    /// ```
    Subscript { base: Box<Expr>, index: Box<Expr> },

    /// Invocation
    ///
    /// `type_args` carries the bracketed parameters of a parameterized call
    /// such as `j.getAttribute[float]('x')`. `keywords` is emptied once the
    /// call has been bound against a declared signature.
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<(String, Expr)>,
        type_args: Vec<Value>,
    },

    /// Arithmetic
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Negation, unary plus, logical not
    UnaryOp { op: UnaryOp, operand: Box<Expr> },

    /// Single comparison (chains are split by the parser)
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `and` / `or` over two or more operands
    BoolOp { op: BoolOp, values: Vec<Expr> },

    /// `body if test else orelse`
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },

    /// Anonymous function, only valid as a call argument or stage body
    Lambda(Lambda),

    /// List literal
    List(Vec<Expr>),

    /// Tuple literal
    Tuple(Vec<Expr>),

    /// Dict literal with string keys, used to shape multi-field records
    ///
    /// # Example
    /// ```text
    /// {'pt': j.pt(), 'eta': j.eta()}
    /// ```
    Dict(Vec<(String, Expr)>),

    /// Dict literal with `**` expansions, flattened into a [`Expr::Dict`]
    /// by desugaring
    ///
    /// # Example
    /// ```text
    /// {**base, 'eta': j.eta()}
    /// ```
    DictMerge(Vec<DictEntry>),

    /// List comprehension or generator expression.
    ///
    /// Never survives desugaring.
    Comprehension {
        kind: ComprehensionKind,
        element: Box<Expr>,
        generators: Vec<Generator>,
    },
}

/// One entry of a dict literal that expands other dicts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DictEntry {
    /// `'key': value`
    Pair(String, Expr),
    /// `**value`
    Spread(Expr),
}

impl DictEntry {
    pub fn value(&self) -> &Expr {
        match self {
            DictEntry::Pair(_, v) | DictEntry::Spread(v) => v,
        }
    }
}

/// Anonymous function: parameter names and a body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Box<Expr>,
}

impl Lambda {
    pub fn new<S: Into<String>>(params: impl IntoIterator<Item = S>, body: Expr) -> Self {
        Lambda {
            params: params.into_iter().map(Into::into).collect(),
            body: Box::new(body),
        }
    }

    /// True for `lambda x: x`
    pub fn is_identity(&self) -> bool {
        matches!((self.params.as_slice(), self.body.as_ref()),
            ([p], Expr::Parameter(name)) if p == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComprehensionKind {
    /// `[x for x in s]`
    List,
    /// `(x for x in s)`
    Generator,
}

/// One `for target in iter if cond...` clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generator {
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

/// Loop variable of a comprehension clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Name(String),
    Tuple(Vec<Target>),
}

impl Target {
    /// All names bound by this target, left to right
    pub fn names(&self) -> Vec<String> {
        match self {
            Target::Name(n) => vec![n.clone()],
            Target::Tuple(items) => items.iter().flat_map(Target::names).collect(),
        }
    }
}

fn boxed<E>(
    e: Box<Expr>,
    f: &mut dyn FnMut(Expr) -> Result<Expr, E>,
) -> Result<Box<Expr>, E> {
    f(*e).map(Box::new)
}

// Builder API. Trees built this way go through the same capture, desugar and
// resolution passes as quoted source.
impl Expr {
    pub fn literal(v: impl Into<Value>) -> Expr {
        Expr::Literal(v.into())
    }

    pub fn param(name: &str) -> Expr {
        Expr::Parameter(name.to_string())
    }

    pub fn name(name: &str) -> Expr {
        Expr::Name(name.to_string())
    }

    pub fn lambda(params: &[&str], body: Expr) -> Expr {
        Expr::Lambda(Lambda::new(params.iter().copied(), body))
    }

    pub fn attr(self, name: &str) -> Expr {
        Expr::Attribute {
            base: Box::new(self),
            name: name.to_string(),
        }
    }

    pub fn index(self, index: Expr) -> Expr {
        Expr::Subscript {
            base: Box::new(self),
            index: Box::new(index),
        }
    }

    /// Plain call of `self` with positional arguments
    pub fn call(self, args: Vec<Expr>) -> Expr {
        Expr::Call {
            func: Box::new(self),
            args,
            keywords: vec![],
            type_args: vec![],
        }
    }

    /// `self.name(args...)`
    pub fn method(self, name: &str, args: Vec<Expr>) -> Expr {
        self.attr(name).call(args)
    }

    pub fn binop(self, op: BinOp, right: Expr) -> Expr {
        Expr::BinOp {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn compare(self, op: CmpOp, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn boolop(op: BoolOp, values: Vec<Expr>) -> Expr {
        Expr::BoolOp { op, values }
    }

    /// The function name if this is a call of a global symbol
    pub fn called_name(&self) -> Option<&str> {
        match self {
            Expr::Call { func, .. } => match func.as_ref() {
                Expr::Name(n) => Some(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// The method name and receiver if this is `receiver.method(...)`
    pub fn called_method(&self) -> Option<(&Expr, &str)> {
        match self {
            Expr::Call { func, .. } => match func.as_ref() {
                Expr::Attribute { base, name } => Some((base, name)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn contains_comprehension(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Comprehension { .. }) {
                found = true;
            }
        });
        found
    }

    /// Direct child expressions, in source order
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Parameter(_) | Expr::Name(_) => vec![],
            Expr::Attribute { base, .. } => vec![base.as_ref()],
            Expr::Subscript { base, index } => vec![base.as_ref(), index.as_ref()],
            Expr::Call {
                func,
                args,
                keywords,
                ..
            } => std::iter::once(func.as_ref())
                .chain(args)
                .chain(keywords.iter().map(|(_, v)| v))
                .collect(),
            Expr::BinOp { left, right, .. } | Expr::Compare { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            Expr::UnaryOp { operand, .. } => vec![operand.as_ref()],
            Expr::BoolOp { values, .. } | Expr::List(values) | Expr::Tuple(values) => {
                values.iter().collect()
            }
            Expr::IfExp { test, body, orelse } => {
                vec![test.as_ref(), body.as_ref(), orelse.as_ref()]
            }
            Expr::Lambda(l) => vec![l.body.as_ref()],
            Expr::Dict(items) => items.iter().map(|(_, v)| v).collect(),
            Expr::DictMerge(entries) => entries.iter().map(DictEntry::value).collect(),
            Expr::Comprehension {
                element,
                generators,
                ..
            } => generators
                .iter()
                .flat_map(|g| std::iter::once(&g.iter).chain(&g.ifs))
                .chain(std::iter::once(element.as_ref()))
                .collect(),
        }
    }

    /// Pre-order visit of every node, descending into lambdas and generators
    pub fn walk(&self, visit: &mut dyn FnMut(&Expr)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Rebuild this node with `f` applied to each direct child expression.
    ///
    /// Lambda bodies and comprehension parts count as children.
    pub fn try_map_children<E>(
        self,
        f: &mut dyn FnMut(Expr) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        Ok(match self {
            e @ (Expr::Literal(_) | Expr::Parameter(_) | Expr::Name(_)) => e,
            Expr::Attribute { base, name } => Expr::Attribute {
                base: boxed(base, f)?,
                name,
            },
            Expr::Subscript { base, index } => Expr::Subscript {
                base: boxed(base, f)?,
                index: boxed(index, f)?,
            },
            Expr::Call {
                func,
                args,
                keywords,
                type_args,
            } => Expr::Call {
                func: boxed(func, f)?,
                args: args.into_iter().map(&mut *f).collect::<Result<_, _>>()?,
                keywords: keywords
                    .into_iter()
                    .map(|(k, v)| f(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
                type_args,
            },
            Expr::BinOp { op, left, right } => Expr::BinOp {
                op,
                left: boxed(left, f)?,
                right: boxed(right, f)?,
            },
            Expr::Compare { op, left, right } => Expr::Compare {
                op,
                left: boxed(left, f)?,
                right: boxed(right, f)?,
            },
            Expr::UnaryOp { op, operand } => Expr::UnaryOp {
                op,
                operand: boxed(operand, f)?,
            },
            Expr::BoolOp { op, values } => Expr::BoolOp {
                op,
                values: values.into_iter().map(&mut *f).collect::<Result<_, _>>()?,
            },
            Expr::IfExp { test, body, orelse } => Expr::IfExp {
                test: boxed(test, f)?,
                body: boxed(body, f)?,
                orelse: boxed(orelse, f)?,
            },
            Expr::Lambda(Lambda { params, body }) => Expr::Lambda(Lambda {
                params,
                body: boxed(body, f)?,
            }),
            Expr::List(items) => {
                Expr::List(items.into_iter().map(&mut *f).collect::<Result<_, _>>()?)
            }
            Expr::Tuple(items) => {
                Expr::Tuple(items.into_iter().map(&mut *f).collect::<Result<_, _>>()?)
            }
            Expr::Dict(items) => Expr::Dict(
                items
                    .into_iter()
                    .map(|(k, v)| f(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::DictMerge(entries) => Expr::DictMerge(
                entries
                    .into_iter()
                    .map(|entry| match entry {
                        DictEntry::Pair(k, v) => f(v).map(|v| DictEntry::Pair(k, v)),
                        DictEntry::Spread(v) => f(v).map(DictEntry::Spread),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Comprehension {
                kind,
                element,
                generators,
            } => Expr::Comprehension {
                kind,
                element: boxed(element, f)?,
                generators: generators
                    .into_iter()
                    .map(|g| {
                        Ok(Generator {
                            target: g.target,
                            iter: f(g.iter)?,
                            ifs: g.ifs.into_iter().map(&mut *f).collect::<Result<_, _>>()?,
                        })
                    })
                    .collect::<Result<_, E>>()?,
            },
        })
    }

    /// Replace free occurrences of the given parameters.
    ///
    /// Lambdas and comprehension targets that rebind a name shadow it.
    pub fn substitute(self, bindings: &[(String, Expr)]) -> Expr {
        if bindings.is_empty() {
            return self;
        }
        match self {
            Expr::Parameter(name) => bindings
                .iter()
                .rev()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or(Expr::Parameter(name)),
            Expr::Lambda(Lambda { params, body }) => {
                let inner: Vec<_> = bindings
                    .iter()
                    .filter(|(k, _)| !params.contains(k))
                    .cloned()
                    .collect();
                Expr::Lambda(Lambda {
                    params,
                    body: Box::new(body.substitute(&inner)),
                })
            }
            Expr::Comprehension {
                kind,
                element,
                generators,
            } => {
                // Each clause sees the targets of the clauses before it.
                let mut visible: Vec<(String, Expr)> = bindings.to_vec();
                let mut rebuilt = Vec::with_capacity(generators.len());
                for g in generators {
                    let iter = g.iter.substitute(&visible);
                    let bound = g.target.names();
                    visible.retain(|(k, _)| !bound.contains(k));
                    let ifs = g.ifs.into_iter().map(|c| c.substitute(&visible)).collect();
                    rebuilt.push(Generator {
                        target: g.target,
                        iter,
                        ifs,
                    });
                }
                Expr::Comprehension {
                    kind,
                    element: Box::new(element.substitute(&visible)),
                    generators: rebuilt,
                }
            }
            other => match other.try_map_children::<std::convert::Infallible>(&mut |c| {
                Ok(c.substitute(bindings))
            }) {
                Ok(e) => e,
                Err(never) => match never {},
            },
        }
    }
}
