//! Shapes and the capabilities they expose.
//!
//! A *shape* is the declared type of the items flowing through a stage. A
//! [`ShapeDescriptor`] lists the members a named shape exposes, with their
//! parameters, defaults and return shapes. Backend integration code declares
//! descriptors up front; resolution only ever reads them.
//!
//! Resolution is generic over [`CapabilityLookup`], so backends can plug in
//! their own source of descriptors. [`CapabilityModel`] is the stock
//! implementation, buildable in code or loaded from JSON through
//! [`CapabilityFile`].

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    ast::Expr,
    config::SessionConfig,
    error::{BuildError, ConfigError},
    value::Value,
};

/// Declared type of a value.
///
/// Written in JSON descriptors as text: `float`, `Sequence[Jet]`,
/// `Tuple[int, str]`, `{pt: float, eta: float}`, `Jet`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Unknown; anything goes and nothing is checked
    Any,
    Bool,
    Int,
    Float,
    Str,
    None,
    Sequence(Box<Shape>),
    Tuple(Vec<Shape>),
    /// Named fields, e.g. the result of a dict literal
    Record(Vec<(String, Shape)>),
    /// A shape declared in the capability model
    Named(String),
    /// A method referenced but not called
    Callable,
}

impl Shape {
    pub fn sequence(element: Shape) -> Shape {
        Shape::Sequence(Box::new(element))
    }

    pub fn named(name: &str) -> Shape {
        Shape::Named(name.to_string())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Shape::Int | Shape::Float)
    }

    /// Item shape of a sequence
    pub fn element(&self) -> Option<&Shape> {
        match self {
            Shape::Sequence(inner) => Some(inner),
            _ => None,
        }
    }

    /// Name used for registry keys and error messages
    pub fn type_name(&self) -> String {
        match self {
            Shape::Named(n) => n.clone(),
            Shape::Sequence(_) => "Sequence".to_string(),
            Shape::Tuple(_) => "Tuple".to_string(),
            Shape::Record(_) => "Record".to_string(),
            other => other.to_string(),
        }
    }

    /// Shape of a literal value
    pub fn of_value(value: &Value) -> Shape {
        match value {
            Value::None => Shape::None,
            Value::Boolean(_) => Shape::Bool,
            Value::Integer(_) => Shape::Int,
            Value::Float(_) => Shape::Float,
            Value::String(_) => Shape::Str,
            Value::List(items) => Shape::sequence(Shape::join_all(items.iter().map(Shape::of_value))),
            Value::Tuple(items) => Shape::Tuple(items.iter().map(Shape::of_value).collect()),
            Value::Record(fields) => Shape::Record(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Shape::of_value(v)))
                    .collect(),
            ),
        }
    }

    /// Common shape of two alternatives, if they have one.
    ///
    /// Numeric shapes widen to `Float`; `Any` absorbs everything.
    pub fn join(&self, other: &Shape) -> Option<Shape> {
        match (self, other) {
            (a, b) if a == b => Some(a.clone()),
            (Shape::Any, _) | (_, Shape::Any) => Some(Shape::Any),
            (a, b) if a.is_numeric() && b.is_numeric() => Some(Shape::Float),
            (Shape::Sequence(a), Shape::Sequence(b)) => a.join(b).map(Shape::sequence),
            _ => None,
        }
    }

    /// Join over many shapes, `Any` when empty or incompatible
    pub fn join_all(shapes: impl IntoIterator<Item = Shape>) -> Shape {
        let mut shapes = shapes.into_iter();
        let Some(first) = shapes.next() else {
            return Shape::Any;
        };
        shapes.try_fold(first, |acc, s| acc.join(&s)).unwrap_or(Shape::Any)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Any => write!(f, "any"),
            Shape::Bool => write!(f, "bool"),
            Shape::Int => write!(f, "int"),
            Shape::Float => write!(f, "float"),
            Shape::Str => write!(f, "str"),
            Shape::None => write!(f, "None"),
            Shape::Callable => write!(f, "Callable"),
            Shape::Named(n) => write!(f, "{}", n),
            Shape::Sequence(inner) => write!(f, "Sequence[{}]", inner),
            Shape::Tuple(items) => {
                write!(f, "Tuple[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Shape::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, shape)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, shape)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl FromStr for Shape {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parser = ShapeParser {
            text,
            chars: text.char_indices().peekable(),
        };
        let shape = parser.shape()?;
        parser.skip_spaces();
        match parser.chars.peek().map(|(_, c)| *c) {
            None => Ok(shape),
            Some(c) => Err(parser.error(&format!("unexpected '{}'", c))),
        }
    }
}

struct ShapeParser<'a> {
    text: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl ShapeParser<'_> {
    fn error(&self, reason: &str) -> ConfigError {
        ConfigError::InvalidShape {
            text: self.text.to_string(),
            reason: reason.to_string(),
        }
    }

    fn skip_spaces(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_spaces();
        self.chars.next_if(|(_, c)| *c == expected).is_some()
    }

    fn expect(&mut self, expected: char) -> Result<(), ConfigError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected)))
        }
    }

    fn identifier(&mut self) -> Result<String, ConfigError> {
        self.skip_spaces();
        let mut name = String::new();
        while let Some((_, c)) = self.chars.next_if(|(_, c)| c.is_alphanumeric() || *c == '_') {
            name.push(c);
        }
        if name.is_empty() {
            return Err(self.error("expected a shape name"));
        }
        Ok(name)
    }

    /// Comma-separated items up to `close`
    fn list<T>(
        &mut self,
        close: char,
        mut item: impl FnMut(&mut Self) -> Result<T, ConfigError>,
    ) -> Result<Vec<T>, ConfigError> {
        let mut items = vec![];
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(item(self)?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(',')?;
        }
    }

    fn shape(&mut self) -> Result<Shape, ConfigError> {
        if self.eat('{') {
            let fields = self.list('}', |p| {
                let name = p.identifier()?;
                p.expect(':')?;
                Ok((name, p.shape()?))
            })?;
            return Ok(Shape::Record(fields));
        }

        let name = self.identifier()?;
        let args = if self.eat('[') {
            Some(self.list(']', Self::shape)?)
        } else {
            None
        };

        match (name.as_str(), args) {
            ("any" | "Any", None) => Ok(Shape::Any),
            ("bool", None) => Ok(Shape::Bool),
            ("int", None) => Ok(Shape::Int),
            ("float", None) => Ok(Shape::Float),
            ("str", None) => Ok(Shape::Str),
            ("None", None) => Ok(Shape::None),
            ("Callable", None) => Ok(Shape::Callable),
            ("Sequence" | "Iterable" | "List", Some(mut args)) if args.len() == 1 => {
                Ok(Shape::sequence(args.remove(0)))
            }
            ("Tuple", Some(args)) => Ok(Shape::Tuple(args)),
            (_, None) => Ok(Shape::Named(name)),
            (other, Some(_)) => Err(self.error(&format!("'{}' takes no type arguments here", other))),
        }
    }
}

impl Serialize for Shape {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Shape {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Substituted when the call site omits the argument
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Param {
    pub fn required(name: &str) -> Self {
        Param {
            name: name.to_string(),
            default: None,
        }
    }

    pub fn optional(name: &str, default: impl Into<Value>) -> Self {
        Param {
            name: name.to_string(),
            default: Some(default.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    /// Called with parentheses: `j.pt()`
    #[default]
    Method,
    /// Read without a call: `e.run_number`
    Attribute,
}

/// One member of a named shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemberSpec {
    #[serde(default)]
    pub kind: MemberKind,
    #[serde(default)]
    pub params: Vec<Param>,
    /// `None` when the declaration gives no return shape
    #[serde(default)]
    pub returns: Option<Shape>,
}

/// A global function.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionSpec {
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub returns: Option<Shape>,
}

impl FunctionSpec {
    pub fn new(params: Vec<Param>, returns: Shape) -> Self {
        FunctionSpec {
            params,
            returns: Some(returns),
        }
    }
}

/// Capabilities of one named shape.
///
/// # Example
/// ```
/// use linqtree::capability::{Param, Shape, ShapeDescriptor};
///
/// let jet = ShapeDescriptor::new()
///     .method("pt", vec![], Shape::Float)
///     .method("getAttribute", vec![Param::required("name")], Shape::Any);
/// assert!(jet.member("pt").is_some());
/// assert!(jet.member("phi").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    #[serde(default)]
    pub members: HashMap<String, MemberSpec>,
    /// Accept undeclared members, typed as `any`
    #[serde(default)]
    pub dynamic: bool,
}

impl ShapeDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, name: &str, params: Vec<Param>, returns: Shape) -> Self {
        self.members.insert(
            name.to_string(),
            MemberSpec {
                kind: MemberKind::Method,
                params,
                returns: Some(returns),
            },
        );
        self
    }

    pub fn attribute(mut self, name: &str, returns: Shape) -> Self {
        self.members.insert(
            name.to_string(),
            MemberSpec {
                kind: MemberKind::Attribute,
                params: vec![],
                returns: Some(returns),
            },
        );
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn member(&self, name: &str) -> Option<&MemberSpec> {
        self.members.get(name)
    }
}

/// Source of shape and function declarations consulted during resolution.
pub trait CapabilityLookup {
    fn shape(&self, name: &str) -> Option<&ShapeDescriptor>;

    fn function(&self, name: &str) -> Option<&FunctionSpec>;

    /// Extra members of sequences whose items have the shape named `item`
    /// (`float`, `Jet`, ...), on top of the built-in sequence operators.
    fn collection(&self, _item: &str) -> Option<&ShapeDescriptor> {
        None
    }
}

/// HashMap-backed [`CapabilityLookup`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityModel {
    #[serde(default)]
    shapes: HashMap<String, ShapeDescriptor>,
    #[serde(default)]
    functions: HashMap<String, FunctionSpec>,
    /// Keyed by item shape
    #[serde(default)]
    collections: HashMap<String, ShapeDescriptor>,
}

impl CapabilityModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shape(mut self, name: &str, descriptor: ShapeDescriptor) -> Self {
        self.shapes.insert(name.to_string(), descriptor);
        self
    }

    pub fn with_function(mut self, name: &str, spec: FunctionSpec) -> Self {
        self.functions.insert(name.to_string(), spec);
        self
    }

    /// Declare members available on `Sequence[item]`
    pub fn with_collection(mut self, item: &str, descriptor: ShapeDescriptor) -> Self {
        self.collections.insert(item.to_string(), descriptor);
        self
    }
}

impl CapabilityLookup for CapabilityModel {
    fn shape(&self, name: &str) -> Option<&ShapeDescriptor> {
        self.shapes.get(name)
    }

    fn function(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(name)
    }

    fn collection(&self, item: &str) -> Option<&ShapeDescriptor> {
        self.collections.get(item)
    }
}

/// Contents of a capability file.
///
/// ```text
/// {
///   "config": {"max_rewrite_passes": 32},
///   "shapes": {
///     "Event": {"members": {"jets": {"returns": "Sequence[Jet]",
///                                    "params": [{"name": "collection", "default": "AntiKt4"}]}}},
///     "Jet": {"members": {"pt": {"returns": "float"}}}
///   },
///   "functions": {"deltaR": {"params": [{"name": "a"}, {"name": "b"}], "returns": "float"}},
///   "collections": {"Jet": {"members": {"sumPt": {"returns": "float"}}}}
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityFile {
    #[serde(default)]
    pub config: SessionConfig,
    #[serde(flatten)]
    pub model: CapabilityModel,
}

impl CapabilityFile {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Bind call arguments to declared parameters.
///
/// Positional arguments fill parameters left to right, keywords fill the
/// rest by name, and declared defaults fill whatever remains. The result is
/// the complete positional argument list.
pub fn bind_arguments(
    call: &Expr,
    params: &[Param],
    args: Vec<Expr>,
    keywords: Vec<(String, Expr)>,
) -> Result<Vec<Expr>, BuildError> {
    let unresolved = |reason: String| BuildError::UnresolvedCall {
        call: crate::output::unparse(call),
        reason,
    };

    if args.len() > params.len() {
        return Err(unresolved(format!(
            "takes {} arguments but {} were given",
            params.len(),
            args.len()
        )));
    }

    let mut slots: Vec<Option<Expr>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);

    for (name, value) in keywords {
        let Some(position) = params.iter().position(|p| p.name == name) else {
            return Err(unresolved(format!("unexpected keyword argument '{}'", name)));
        };
        if slots[position].is_some() {
            return Err(unresolved(format!("multiple values for argument '{}'", name)));
        }
        slots[position] = Some(value);
    }

    slots
        .into_iter()
        .zip(params)
        .map(|(slot, param)| match (slot, &param.default) {
            (Some(arg), _) => Ok(arg),
            (None, Some(default)) => Ok(Expr::Literal(default.clone())),
            (None, None) => Err(unresolved(format!(
                "missing required argument '{}'",
                param.name
            ))),
        })
        .collect()
}
