use rust_decimal::{Decimal, prelude::FromPrimitive, prelude::ToPrimitive};

use crate::{
    ast::{BinOp, BoolOp, CmpOp, DictEntry, Expr, Lambda, UnaryOp},
    error::EvalError,
    value::Value,
};

/// Parameter bindings visible to an expression, innermost last
pub type Scope = [(String, Value)];

/// Interpreter for expression trees over literal values.
///
/// Used to constant-fold conditions while desugaring and by the literal
/// backend to run finished query trees in memory. Only primitive forms are
/// understood: comprehensions and lowercase builtins must be desugared
/// first.
///
/// # Example
/// ```
/// use linqtree::{Evaluator, Value, parser::parse_expression};
///
/// let expr = parse_expression("Sum([1, 2, 3].Filter(lambda j: j > 1))").unwrap();
/// assert_eq!(Evaluator::new().eval_closed(&expr), Ok(Value::Integer(5)));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    max_depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_max_depth(256)
    }

    /// Fail with [`EvalError::TooDeep`] instead of descending more than
    /// `max_depth` nodes
    pub fn with_max_depth(max_depth: usize) -> Self {
        Evaluator { max_depth }
    }

    /// Evaluate an expression with no free parameters
    pub fn eval_closed(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval(expr, &[])
    }

    /// Apply a lambda to positional arguments
    pub fn apply(&self, lambda: &Lambda, args: Vec<Value>, scope: &Scope) -> Result<Value, EvalError> {
        self.apply_at(lambda, args, scope, 0)
    }

    pub fn eval(&self, expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
        self.eval_at(expr, scope, 0)
    }

    fn apply_at(
        &self,
        lambda: &Lambda,
        args: Vec<Value>,
        scope: &Scope,
        depth: usize,
    ) -> Result<Value, EvalError> {
        if lambda.params.len() != args.len() {
            return Err(EvalError::TypeError(format!(
                "lambda takes {} arguments, got {}",
                lambda.params.len(),
                args.len()
            )));
        }
        let mut inner = scope.to_vec();
        inner.extend(lambda.params.iter().cloned().zip(args));
        self.eval_at(&lambda.body, &inner, depth + 1)
    }

    fn eval_at(&self, expr: &Expr, scope: &Scope, depth: usize) -> Result<Value, EvalError> {
        if depth > self.max_depth {
            return Err(EvalError::TooDeep(self.max_depth));
        }
        let next = depth + 1;
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            // Unquoted trees still carry parameters as names
            Expr::Parameter(name) | Expr::Name(name) => scope
                .iter()
                .rev()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| EvalError::Unbound(name.clone())),
            Expr::Attribute { base, name } => {
                let object = self.eval_at(base, scope, next)?;
                object.field(name).cloned().ok_or_else(|| {
                    EvalError::AccessError(format!(
                        "{} has no attribute '{}'",
                        object.type_name(),
                        name
                    ))
                })
            }
            Expr::Subscript { base, index } => {
                let object = self.eval_at(base, scope, next)?;
                let key = self.eval_at(index, scope, next)?;
                self.apply_subscript(&object, &key)
            }
            Expr::Call { func, args, .. } => self.eval_call(func, args, scope, next),
            Expr::BinOp { op, left, right } => {
                let left_val = self.eval_at(left, scope, next)?;
                let right_val = self.eval_at(right, scope, next)?;
                self.apply_binop(*op, &left_val, &right_val)
            }
            Expr::UnaryOp { op, operand } => {
                let value = self.eval_at(operand, scope, next)?;
                match (op, value) {
                    (UnaryOp::Not, v) => Ok(Value::Boolean(!v.is_truthy())),
                    (UnaryOp::Negate, Value::Integer(n)) => n
                        .checked_neg()
                        .map(Value::Integer)
                        .ok_or_else(|| EvalError::TypeError("integer overflow".to_string())),
                    (UnaryOp::Negate, Value::Float(n)) => Ok(Value::Float(-n)),
                    (UnaryOp::Plus, v @ (Value::Integer(_) | Value::Float(_))) => Ok(v),
                    (_, v) => Err(EvalError::TypeError(format!(
                        "bad operand type for unary operator: {}",
                        v.type_name()
                    ))),
                }
            }
            Expr::Compare { op, left, right } => {
                let left_val = self.eval_at(left, scope, next)?;
                let right_val = self.eval_at(right, scope, next)?;
                self.apply_compare(*op, &left_val, &right_val)
                    .map(Value::Boolean)
            }
            Expr::BoolOp { op, values } => {
                // Python semantics: the deciding operand is the result
                let mut last = Value::Boolean(*op == BoolOp::And);
                for value in values {
                    last = self.eval_at(value, scope, next)?;
                    let decided = match op {
                        BoolOp::And => !last.is_truthy(),
                        BoolOp::Or => last.is_truthy(),
                    };
                    if decided {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval_at(test, scope, next)?.is_truthy() {
                    self.eval_at(body, scope, next)
                } else {
                    self.eval_at(orelse, scope, next)
                }
            }
            Expr::List(items) => Ok(Value::List(self.eval_all(items, scope, next)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items, scope, next)?)),
            Expr::Dict(items) => {
                let mut fields = Vec::with_capacity(items.len());
                for (key, value) in items {
                    fields.push((key.clone(), self.eval_at(value, scope, next)?));
                }
                Ok(Value::Record(fields))
            }
            Expr::DictMerge(entries) => {
                let mut fields: Vec<(String, Value)> = vec![];
                let mut assign = |key: String, value: Value| {
                    match fields.iter_mut().find(|(k, _)| *k == key) {
                        Some(slot) => slot.1 = value,
                        None => fields.push((key, value)),
                    }
                };
                for entry in entries {
                    match entry {
                        DictEntry::Pair(key, value) => {
                            assign(key.clone(), self.eval_at(value, scope, next)?)
                        }
                        DictEntry::Spread(value) => match self.eval_at(value, scope, next)? {
                            Value::Record(items) => items.into_iter().for_each(|(k, v)| assign(k, v)),
                            other => {
                                return Err(EvalError::TypeError(format!(
                                    "'**' requires a record, got {}",
                                    other.type_name()
                                )));
                            }
                        },
                    }
                }
                Ok(Value::Record(fields))
            }
            Expr::Lambda(_) => Err(EvalError::Unsupported(
                "a lambda outside a sequence method".to_string(),
            )),
            Expr::Comprehension { .. } => Err(EvalError::Unsupported(
                "a comprehension; desugar it first".to_string(),
            )),
        }
    }

    fn eval_all(&self, items: &[Expr], scope: &Scope, depth: usize) -> Result<Vec<Value>, EvalError> {
        items.iter().map(|e| self.eval_at(e, scope, depth)).collect()
    }

    fn eval_call(
        &self,
        func: &Expr,
        args: &[Expr],
        scope: &Scope,
        depth: usize,
    ) -> Result<Value, EvalError> {
        match func {
            Expr::Attribute { base, name } => {
                let receiver = self.eval_at(base, scope, depth)?;
                self.eval_method_call(&receiver, name, args, scope, depth)
            }
            Expr::Name(name) => {
                let values = self.eval_all(args, scope, depth)?;
                self.eval_function(name, &values)
            }
            Expr::Lambda(lambda) => {
                let values = self.eval_all(args, scope, depth)?;
                self.apply_at(lambda, values, scope, depth)
            }
            other => Err(EvalError::Unsupported(format!(
                "calling a {}",
                match other {
                    Expr::Subscript { .. } => "subscript",
                    _ => "computed value",
                }
            ))),
        }
    }

    fn eval_function(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match (name, args) {
            ("Sum", [seq]) => self.sequence_sum(seq),
            ("Min", [seq]) => self.sequence_extreme(seq, "Min", std::cmp::Ordering::Less),
            ("Max", [seq]) => self.sequence_extreme(seq, "Max", std::cmp::Ordering::Greater),
            ("Count", [seq]) => Ok(Value::Integer(items_of(seq, "Count")?.len() as i64)),
            ("abs", [Value::Integer(n)]) => n
                .checked_abs()
                .map(Value::Integer)
                .ok_or_else(|| EvalError::TypeError("integer overflow".to_string())),
            ("abs", [Value::Float(n)]) => Ok(Value::Float(n.abs())),
            ("abs", [other]) => Err(EvalError::TypeError(format!(
                "bad operand type for abs(): {}",
                other.type_name()
            ))),
            (name, args) => Err(EvalError::Unsupported(format!(
                "function '{}' with {} arguments",
                name,
                args.len()
            ))),
        }
    }

    /// Sequence methods, with lambda arguments closed over `scope`
    fn eval_method_call(
        &self,
        receiver: &Value,
        method: &str,
        args: &[Expr],
        scope: &Scope,
        depth: usize,
    ) -> Result<Value, EvalError> {
        let items = items_of(receiver, method)?;
        match (method, args) {
            ("Map", [Expr::Lambda(f)]) => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    mapped.push(self.apply_at(f, vec![item.clone()], scope, depth)?);
                }
                Ok(Value::List(mapped))
            }
            ("FlatMap", [Expr::Lambda(f)]) => {
                let mut flattened = vec![];
                for item in items {
                    let inner = self.apply_at(f, vec![item.clone()], scope, depth)?;
                    flattened.extend(items_of(&inner, "FlatMap")?.iter().cloned());
                }
                Ok(Value::List(flattened))
            }
            ("Filter", [Expr::Lambda(f)]) => {
                let mut kept = vec![];
                for item in items {
                    if self.apply_at(f, vec![item.clone()], scope, depth)?.is_truthy() {
                        kept.push(item.clone());
                    }
                }
                Ok(Value::List(kept))
            }
            ("First", []) => items.first().cloned().ok_or_else(|| {
                EvalError::AccessError(".First() on an empty sequence".to_string())
            }),
            ("Count", []) => Ok(Value::Integer(items.len() as i64)),
            (method, _) => Err(EvalError::Unsupported(format!(
                "sequence method .{}() with {} arguments",
                method,
                args.len()
            ))),
        }
    }

    fn sequence_sum(&self, seq: &Value) -> Result<Value, EvalError> {
        let mut total = Value::Integer(0);
        for item in items_of(seq, "Sum")? {
            if !matches!(item, Value::Integer(_) | Value::Float(_)) {
                return Err(EvalError::TypeError(format!(
                    "Sum() requires numeric values, got {}",
                    item.type_name()
                )));
            }
            total = self.apply_binop(BinOp::Add, &total, item)?;
        }
        Ok(total)
    }

    fn sequence_extreme(
        &self,
        seq: &Value,
        name: &str,
        keep: std::cmp::Ordering,
    ) -> Result<Value, EvalError> {
        let items = items_of(seq, name)?;
        let mut best: Option<&Value> = None;
        for item in items {
            best = match best {
                None => Some(item),
                Some(current) if order(item, current)? == keep => Some(item),
                Some(current) => Some(current),
            };
        }
        best.cloned()
            .ok_or_else(|| EvalError::AccessError(format!("{}() of an empty sequence", name)))
    }

    fn apply_subscript(&self, object: &Value, key: &Value) -> Result<Value, EvalError> {
        match (object, key) {
            (Value::List(items) | Value::Tuple(items), Value::Integer(n)) => {
                let index = if *n < 0 {
                    // Negative index: count from end (-1 = last, -2 = second to last)
                    items.len() as i64 + n
                } else {
                    *n
                };
                usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        EvalError::AccessError(format!(
                            "index {} out of range for {} items",
                            n,
                            items.len()
                        ))
                    })
            }
            (Value::Record(_), Value::String(k)) => object
                .field(k)
                .cloned()
                .ok_or_else(|| EvalError::AccessError(format!("no field '{}'", k))),
            _ => Err(EvalError::TypeError(format!(
                "cannot index {} with {}",
                object.type_name(),
                key.type_name()
            ))),
        }
    }

    fn apply_binop(&self, op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => integer_arith(op, *a, *b),
            (Value::Float(a), Value::Float(b)) => float_arith(op, *a, *b),
            (Value::Integer(a), Value::Float(b)) => {
                if let Some(ad) = Decimal::from_i64(*a)
                    && let Some(bd) = Decimal::from_f64(*b)
                    && let Some(r) = decimal_arith(op, ad, bd)
                {
                    return Ok(Value::Float(r));
                }
                float_arith(op, *a as f64, *b)
            }
            (Value::Float(a), Value::Integer(b)) => {
                if let Some(ad) = Decimal::from_f64(*a)
                    && let Some(bd) = Decimal::from_i64(*b)
                    && let Some(r) = decimal_arith(op, ad, bd)
                {
                    return Ok(Value::Float(r));
                }
                float_arith(op, *a, *b as f64)
            }
            (Value::String(a), Value::String(b)) if op == BinOp::Add => {
                Ok(Value::String(format!("{}{}", a, b)))
            }
            (Value::List(a), Value::List(b)) if op == BinOp::Add => {
                Ok(Value::List(a.iter().chain(b).cloned().collect()))
            }
            (Value::Tuple(a), Value::Tuple(b)) if op == BinOp::Add => {
                Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
            }
            (a, b) => Err(EvalError::TypeError(format!(
                "unsupported operand types for {}: {} and {}",
                op.symbol(),
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    fn apply_compare(&self, op: CmpOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
        use std::cmp::Ordering::*;

        Ok(match op {
            CmpOp::Equal | CmpOp::Is => values_equal(left, right),
            CmpOp::NotEqual | CmpOp::IsNot => !values_equal(left, right),
            CmpOp::LessThan => order(left, right)? == Less,
            CmpOp::GreaterThan => order(left, right)? == Greater,
            CmpOp::LessEqual => order(left, right)? != Greater,
            CmpOp::GreaterEqual => order(left, right)? != Less,
            CmpOp::In | CmpOp::NotIn => {
                let found = match right {
                    Value::List(items) | Value::Tuple(items) => {
                        items.iter().any(|item| values_equal(left, item))
                    }
                    Value::String(haystack) => match left {
                        Value::String(needle) => haystack.contains(needle.as_str()),
                        other => {
                            return Err(EvalError::TypeError(format!(
                                "'in <str>' requires a string, got {}",
                                other.type_name()
                            )));
                        }
                    },
                    Value::Record(_) => match left {
                        Value::String(key) => right.field(key).is_some(),
                        _ => false,
                    },
                    other => {
                        return Err(EvalError::TypeError(format!(
                            "argument of type {} is not a container",
                            other.type_name()
                        )));
                    }
                };
                found == (op == CmpOp::In)
            }
        })
    }
}

fn items_of<'a>(value: &'a Value, method: &str) -> Result<&'a [Value], EvalError> {
    value.as_items().ok_or_else(|| {
        EvalError::TypeError(format!(
            "{} requires a sequence, got {}",
            method,
            value.type_name()
        ))
    })
}

/// Equality with ints and floats comparing by value
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
            (*x as f64) == *y
        }
        (Value::List(x) | Value::Tuple(x), Value::List(y) | Value::Tuple(y))
            if std::mem::discriminant(a) == std::mem::discriminant(b) =>
        {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Result<std::cmp::Ordering, EvalError> {
    let ordering = match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        EvalError::TypeError(format!(
            "cannot order {} and {}",
            a.type_name(),
            b.type_name()
        ))
    })
}

fn integer_arith(op: BinOp, a: i64, b: i64) -> Result<Value, EvalError> {
    let overflow = || EvalError::TypeError("integer overflow".to_string());
    match op {
        BinOp::Add => a.checked_add(b).map(Value::Integer).ok_or_else(overflow),
        BinOp::Subtract => a.checked_sub(b).map(Value::Integer).ok_or_else(overflow),
        BinOp::Multiply => a.checked_mul(b).map(Value::Integer).ok_or_else(overflow),
        BinOp::Divide => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinOp::FloorDivide | BinOp::Modulo => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            // Floor semantics: the remainder takes the sign of the divisor
            let mut quotient = a.checked_div(b).ok_or_else(overflow)?;
            let mut remainder = a % b;
            if remainder != 0 && ((remainder < 0) != (b < 0)) {
                quotient -= 1;
                remainder += b;
            }
            Ok(Value::Integer(if op == BinOp::FloorDivide {
                quotient
            } else {
                remainder
            }))
        }
        BinOp::Power => match u32::try_from(b) {
            Ok(exp) => a.checked_pow(exp).map(Value::Integer).ok_or_else(overflow),
            Err(_) => Ok(Value::Float((a as f64).powf(b as f64))),
        },
    }
}

fn float_arith(op: BinOp, a: f64, b: f64) -> Result<Value, EvalError> {
    let zero_divisor = matches!(op, BinOp::Divide | BinOp::FloorDivide | BinOp::Modulo) && b == 0.0;
    if zero_divisor {
        return Err(EvalError::DivisionByZero);
    }
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Subtract => a - b,
        BinOp::Multiply => a * b,
        BinOp::Divide => a / b,
        BinOp::FloorDivide => (a / b).floor(),
        BinOp::Modulo => a - b * (a / b).floor(),
        BinOp::Power => a.powf(b),
    }))
}

/// Exact arithmetic for mixed int/float operands, so `0.1 + 2` stays `2.1`
fn decimal_arith(op: BinOp, a: Decimal, b: Decimal) -> Option<f64> {
    let result = match op {
        BinOp::Add => a.checked_add(b)?,
        BinOp::Subtract => a.checked_sub(b)?,
        BinOp::Multiply => a.checked_mul(b)?,
        BinOp::Divide => a.checked_div(b)?,
        _ => return None,
    };
    result.to_f64()
}
