//! Lowering of source idioms into the primitive operator set.
//!
//! Each idiom is a [`RewriteRule`]. The [`Desugarer`] tries the rules
//! top-down at every node and repeats whole passes until nothing fires,
//! because lowering an outer form can expose an inner one.
//!
//! # Example
//! ```text
//! [j.pt() for j in e.jets() if j.eta() < 2.4]
//! e.jets().Filter(lambda j: j.eta() < 2.4).Map(lambda j: j.pt())
//!
//! sum(j for j in [1, 2, 3] if j > 1)
//! Sum([1, 2, 3].Filter(lambda j: j > 1))
//! ```

use std::collections::HashSet;

use tracing::debug;

use crate::{
    ast::{BoolOp, CmpOp, DictEntry, Expr, Generator, Lambda, Target},
    config::SessionConfig,
    error::BuildError,
    evaluator::Evaluator,
    output::unparse,
    value::Value,
};

/// Lowercase builtins that have no primitive form of their own.
pub const SOURCE_BUILTINS: &[&str] = &["sum", "min", "max", "any", "all", "map", "filter", "len"];

/// State shared by the rules during one desugaring run.
pub struct RewriteContext {
    next_fresh: usize,
    taken: HashSet<String>,
    evaluator: Evaluator,
}

impl RewriteContext {
    fn for_tree(expr: &Expr, evaluator: Evaluator) -> Self {
        let mut taken = HashSet::new();
        expr.walk(&mut |e| match e {
            Expr::Parameter(n) | Expr::Name(n) => {
                taken.insert(n.clone());
            }
            Expr::Lambda(l) => taken.extend(l.params.iter().cloned()),
            Expr::Comprehension { generators, .. } => {
                for g in generators {
                    taken.extend(g.target.names());
                }
            }
            _ => {}
        });
        RewriteContext {
            next_fresh: 0,
            taken,
            evaluator,
        }
    }

    /// A parameter name unused anywhere in the tree being rewritten.
    ///
    /// Names are numbered from zero per run, so quoting the same lambda twice
    /// synthesizes the same names.
    pub fn fresh_param(&mut self) -> String {
        loop {
            let name = format!("t_{}", self.next_fresh);
            self.next_fresh += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }

    /// Constant-fold a closed condition, if it folds to a boolean
    pub fn fold_bool(&self, expr: &Expr) -> Option<bool> {
        match self.evaluator.eval_closed(expr) {
            Ok(Value::Boolean(b)) => Some(b),
            _ => None,
        }
    }
}

/// One source idiom and its lowering.
pub trait RewriteRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrite `expr` if this rule recognises it at the top level.
    fn apply(&self, expr: &Expr, cx: &mut RewriteContext) -> Result<Option<Expr>, BuildError>;
}

/// Fixed-point driver over an ordered rule list.
pub struct Desugarer {
    rules: Vec<Box<dyn RewriteRule>>,
    max_passes: usize,
    evaluator: Evaluator,
}

impl Desugarer {
    /// The standard rule set
    pub fn new(config: &SessionConfig) -> Self {
        Desugarer {
            rules: vec![
                Box::new(ApplyLambda),
                Box::new(AggregateBuiltin),
                Box::new(AnyAll),
                Box::new(FilterMapBuiltin),
                Box::new(LenToCount),
                Box::new(LiteralMembership),
                Box::new(TupleIndex),
                Box::new(DictMerge),
                Box::new(LowerComprehension),
            ],
            max_passes: config.max_rewrite_passes,
            evaluator: Evaluator::with_max_depth(config.max_depth),
        }
    }

    pub fn with_rules(rules: Vec<Box<dyn RewriteRule>>, max_passes: usize) -> Self {
        Desugarer {
            rules,
            max_passes,
            evaluator: Evaluator::new(),
        }
    }

    pub fn run(&self, expr: Expr) -> Result<Expr, BuildError> {
        let mut cx = RewriteContext::for_tree(&expr, self.evaluator);
        let mut current = expr;

        for pass in 0..self.max_passes {
            let mut changed = false;
            current = self.pass(current, &mut cx, &mut changed)?;
            if !changed {
                debug!(passes = pass, "desugaring reached a fixed point");
                return Ok(current);
            }
        }

        Err(BuildError::UnsupportedExpression {
            expr: unparse(&current),
            reason: format!("no fixed point after {} rewrite passes", self.max_passes),
        })
    }

    fn pass(
        &self,
        expr: Expr,
        cx: &mut RewriteContext,
        changed: &mut bool,
    ) -> Result<Expr, BuildError> {
        let mut expr = expr;
        for rule in &self.rules {
            if let Some(next) = rule.apply(&expr, cx)? {
                debug!(rule = rule.name(), "rewrote {}", unparse(&expr));
                *changed = true;
                expr = next;
                break;
            }
        }
        expr.try_map_children(&mut |child| self.pass(child, cx, changed))
    }
}

/// Desugar with the standard rules
pub fn desugar(expr: Expr, config: &SessionConfig) -> Result<Expr, BuildError> {
    Desugarer::new(config).run(expr)
}

/// Reject anything the primitive operators cannot express.
///
/// Catches comprehensions and builtins that no rule could lower, and
/// lambdas used anywhere but as a call argument.
pub fn ensure_primitive(expr: &Expr) -> Result<(), BuildError> {
    check_primitive(expr, false)
}

fn check_primitive(expr: &Expr, lambda_allowed: bool) -> Result<(), BuildError> {
    let unsupported = |reason: &str| BuildError::UnsupportedExpression {
        expr: unparse(expr),
        reason: reason.to_string(),
    };

    match expr {
        Expr::Comprehension { .. } => Err(unsupported(
            "comprehensions are only supported over literal sequences or as generators feeding an operator",
        )),
        Expr::DictMerge(_) => Err(unsupported(
            "'**' needs a dict literal, a record or a conditional with a constant test",
        )),
        Expr::Lambda(l) if lambda_allowed => check_primitive(&l.body, false),
        Expr::Lambda(_) => Err(unsupported("a lambda may only appear as a call argument")),
        Expr::Call {
            func,
            args,
            keywords,
            ..
        } => {
            if let Expr::Name(name) = func.as_ref()
                && SOURCE_BUILTINS.contains(&name.as_str())
            {
                return Err(unsupported(&format!(
                    "'{}' needs a literal sequence or generator argument",
                    name
                )));
            }
            check_primitive(func, false)?;
            for arg in args.iter().chain(keywords.iter().map(|(_, v)| v)) {
                check_primitive(arg, true)?;
            }
            Ok(())
        }
        other => other
            .children()
            .into_iter()
            .try_for_each(|child| check_primitive(child, false)),
    }
}

/// True while `expr` still holds forms that a later pass may lower
fn still_lowering(expr: &Expr) -> bool {
    let mut pending = false;
    expr.walk(&mut |e| match e {
        Expr::Comprehension { .. } | Expr::DictMerge(_) => pending = true,
        Expr::Call { func, .. } => {
            if let Expr::Name(name) = func.as_ref()
                && SOURCE_BUILTINS.contains(&name.as_str())
            {
                pending = true;
            }
        }
        _ => {}
    });
    pending
}

/// Elements of a syntactically literal sequence
fn literal_items(expr: &Expr) -> Option<Vec<Expr>> {
    match expr {
        Expr::List(items) | Expr::Tuple(items) => Some(items.clone()),
        Expr::Literal(Value::List(values) | Value::Tuple(values)) => {
            Some(values.iter().cloned().map(Expr::Literal).collect())
        }
        _ => None,
    }
}

fn single_argument<'a>(expr: &'a Expr, names: &[&str]) -> Option<(&'a str, &'a Expr)> {
    match expr {
        Expr::Call {
            func,
            args,
            keywords,
            type_args,
        } if keywords.is_empty() && type_args.is_empty() && args.len() == 1 => match func.as_ref() {
            Expr::Name(name) if names.contains(&name.as_str()) => Some((name, &args[0])),
            _ => None,
        },
        _ => None,
    }
}

/// `(lambda x: body)(arg)` becomes `body` with `x` replaced
struct ApplyLambda;

impl RewriteRule for ApplyLambda {
    fn name(&self) -> &'static str {
        "apply-lambda"
    }

    fn apply(&self, expr: &Expr, _cx: &mut RewriteContext) -> Result<Option<Expr>, BuildError> {
        let Expr::Call {
            func,
            args,
            keywords,
            type_args,
        } = expr
        else {
            return Ok(None);
        };
        let Expr::Lambda(Lambda { params, body }) = func.as_ref() else {
            return Ok(None);
        };
        if !keywords.is_empty() || !type_args.is_empty() || params.len() != args.len() {
            return Ok(None);
        }

        let bindings: Vec<(String, Expr)> = params.iter().cloned().zip(args.iter().cloned()).collect();
        Ok(Some(body.as_ref().clone().substitute(&bindings)))
    }
}

/// `sum`/`min`/`max` over a generator or literal sequence
struct AggregateBuiltin;

impl RewriteRule for AggregateBuiltin {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn apply(&self, expr: &Expr, cx: &mut RewriteContext) -> Result<Option<Expr>, BuildError> {
        let Some((name, arg)) = single_argument(expr, &["sum", "min", "max"]) else {
            return Ok(None);
        };
        let aggregate = match name {
            "sum" => "Sum",
            "min" => "Min",
            _ => "Max",
        };

        let source = match arg {
            Expr::Comprehension {
                element,
                generators,
                ..
            } => lower_generators(element, generators, true, cx),
            Expr::List(_) | Expr::Tuple(_) | Expr::Literal(Value::List(_) | Value::Tuple(_)) => {
                arg.clone()
            }
            _ => return Ok(None),
        };
        Ok(Some(Expr::name(aggregate).call(vec![source])))
    }
}

/// `any`/`all` over a literal sequence become an `or`/`and` chain
struct AnyAll;

impl RewriteRule for AnyAll {
    fn name(&self) -> &'static str {
        "any-all"
    }

    fn apply(&self, expr: &Expr, cx: &mut RewriteContext) -> Result<Option<Expr>, BuildError> {
        let Some((name, arg)) = single_argument(expr, &["any", "all"]) else {
            return Ok(None);
        };

        let items = match arg {
            Expr::Comprehension {
                element,
                generators,
                ..
            } => match expand_literal(element, generators, cx)? {
                Some(items) => items,
                None => return Ok(None),
            },
            other => match literal_items(other) {
                Some(items) => items,
                None => return Ok(None),
            },
        };

        let is_all = name == "all";
        let op = if is_all { BoolOp::And } else { BoolOp::Or };
        Ok(Some(match items.len() {
            0 => Expr::literal(is_all),
            1 => items.into_iter().next().unwrap_or(Expr::literal(is_all)),
            _ => Expr::boolop(op, items),
        }))
    }
}

/// `filter(f, s)` becomes `s.Filter(f)` and `map(f, s)` becomes `s.Map(f)`
struct FilterMapBuiltin;

impl RewriteRule for FilterMapBuiltin {
    fn name(&self) -> &'static str {
        "filter-map"
    }

    fn apply(&self, expr: &Expr, _cx: &mut RewriteContext) -> Result<Option<Expr>, BuildError> {
        let Expr::Call {
            func,
            args,
            keywords,
            type_args,
        } = expr
        else {
            return Ok(None);
        };
        if !keywords.is_empty() || !type_args.is_empty() || args.len() != 2 {
            return Ok(None);
        }
        let method = match func.as_ref() {
            Expr::Name(n) if n == "filter" => "Filter",
            Expr::Name(n) if n == "map" => "Map",
            _ => return Ok(None),
        };
        Ok(Some(args[1].clone().method(method, vec![args[0].clone()])))
    }
}

/// `len(s)` becomes `s.Count()`
struct LenToCount;

impl RewriteRule for LenToCount {
    fn name(&self) -> &'static str {
        "len"
    }

    fn apply(&self, expr: &Expr, _cx: &mut RewriteContext) -> Result<Option<Expr>, BuildError> {
        Ok(single_argument(expr, &["len"]).map(|(_, arg)| arg.clone().method("Count", vec![])))
    }
}

/// `x in [a, b]` becomes `x == a or x == b`; `not in` becomes an `and` of `!=`
struct LiteralMembership;

impl RewriteRule for LiteralMembership {
    fn name(&self) -> &'static str {
        "membership"
    }

    fn apply(&self, expr: &Expr, _cx: &mut RewriteContext) -> Result<Option<Expr>, BuildError> {
        let Expr::Compare { op, left, right } = expr else {
            return Ok(None);
        };
        let (each, join) = match op {
            CmpOp::In => (CmpOp::Equal, BoolOp::Or),
            CmpOp::NotIn => (CmpOp::NotEqual, BoolOp::And),
            _ => return Ok(None),
        };
        let Some(items) = literal_items(right) else {
            return Ok(None);
        };

        let mut tests: Vec<Expr> = items
            .into_iter()
            .map(|item| left.as_ref().clone().compare(each, item))
            .collect();
        Ok(Some(match tests.len() {
            0 => Expr::literal(*op == CmpOp::NotIn),
            1 => tests.remove(0),
            _ => Expr::boolop(join, tests),
        }))
    }
}

/// `(a, b, c)[1]` becomes `b`
struct TupleIndex;

impl RewriteRule for TupleIndex {
    fn name(&self) -> &'static str {
        "tuple-index"
    }

    fn apply(&self, expr: &Expr, _cx: &mut RewriteContext) -> Result<Option<Expr>, BuildError> {
        let Expr::Subscript { base, index } = expr else {
            return Ok(None);
        };
        let Expr::Literal(Value::Integer(i)) = index.as_ref() else {
            return Ok(None);
        };
        let items = match base.as_ref() {
            Expr::Tuple(items) => items.clone(),
            Expr::Literal(Value::Tuple(values)) => values.iter().cloned().map(Expr::Literal).collect(),
            _ => return Ok(None),
        };

        let len = items.len() as i64;
        let position = if *i < 0 { len + i } else { *i };
        if !(0..len).contains(&position) {
            return Err(BuildError::UnsupportedExpression {
                expr: unparse(expr),
                reason: format!("index {} is out of range for a tuple of {} items", i, len),
            });
        }
        Ok(items.into_iter().nth(position as usize))
    }
}

/// `{**a, 'k': v}` becomes one dict literal.
///
/// Later keys win but keep the position of their first occurrence. An
/// expanded value must be a dict literal, a record literal, or a
/// conditional between those whose test folds to a constant.
struct DictMerge;

impl RewriteRule for DictMerge {
    fn name(&self) -> &'static str {
        "dict-merge"
    }

    fn apply(&self, expr: &Expr, cx: &mut RewriteContext) -> Result<Option<Expr>, BuildError> {
        let Expr::DictMerge(entries) = expr else {
            return Ok(None);
        };

        let mut merged: Vec<(String, Expr)> = vec![];
        for entry in entries {
            let pairs = match entry {
                DictEntry::Pair(key, value) => vec![(key.clone(), value.clone())],
                DictEntry::Spread(value) => match spread_pairs(value, cx) {
                    Ok(Some(pairs)) => pairs,
                    Ok(None) => return Ok(None),
                    Err(reason) => {
                        return Err(BuildError::UnsupportedExpression {
                            expr: unparse(expr),
                            reason,
                        });
                    }
                },
            };
            for (key, value) in pairs {
                match merged.iter_mut().find(|(k, _)| *k == key) {
                    Some(slot) => slot.1 = value,
                    None => merged.push((key, value)),
                }
            }
        }
        Ok(Some(Expr::Dict(merged)))
    }
}

/// Fields of an expanded value, `None` while it is not a dict yet
fn spread_pairs(
    value: &Expr,
    cx: &RewriteContext,
) -> Result<Option<Vec<(String, Expr)>>, String> {
    match value {
        Expr::Dict(items) => Ok(Some(items.clone())),
        Expr::Literal(Value::Record(fields)) => Ok(Some(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), Expr::Literal(v.clone())))
                .collect(),
        )),
        Expr::IfExp { test, body, orelse } => match cx.fold_bool(test) {
            Some(true) => spread_pairs(body, cx),
            Some(false) => spread_pairs(orelse, cx),
            None if still_lowering(test) => Ok(None),
            None => Err(format!(
                "conditional dictionary expansion needs a constant test, got `{}`",
                unparse(test)
            )),
        },
        _ => Ok(None),
    }
}

/// Comprehensions: expanded when every source is literal, otherwise lowered
/// to `Filter`/`Map`/`FlatMap` calls
struct LowerComprehension;

impl RewriteRule for LowerComprehension {
    fn name(&self) -> &'static str {
        "comprehension"
    }

    fn apply(&self, expr: &Expr, cx: &mut RewriteContext) -> Result<Option<Expr>, BuildError> {
        let Expr::Comprehension {
            element,
            generators,
            ..
        } = expr
        else {
            return Ok(None);
        };
        if generators.iter().any(|g| g.iter.contains_comprehension()) {
            return Ok(None);
        }

        if let Some(items) = expand_literal(element, generators, cx)? {
            return Ok(Some(Expr::List(items)));
        }
        Ok(Some(lower_generators(element, generators, false, cx)))
    }
}

/// Lower comprehension clauses to operator calls.
///
/// The innermost clause maps, outer clauses flat-map, and every `if`
/// becomes a `Filter` on its own clause's source. With `elide_identity`
/// an innermost `Map(lambda x: x)` is dropped.
fn lower_generators(
    element: &Expr,
    generators: &[Generator],
    elide_identity: bool,
    cx: &mut RewriteContext,
) -> Expr {
    let mut body = element.clone();
    let innermost = generators.len().saturating_sub(1);

    for (i, g) in generators.iter().enumerate().rev() {
        let (param, bindings) = match &g.target {
            Target::Name(n) => (n.clone(), vec![]),
            tuple => {
                let param = cx.fresh_param();
                let mut bindings = vec![];
                destructure(tuple, Expr::Parameter(param.clone()), &mut bindings);
                (param, bindings)
            }
        };

        let mut source = g.iter.clone();
        for cond in &g.ifs {
            let predicate = Lambda::new([param.clone()], cond.clone().substitute(&bindings));
            source = source.method("Filter", vec![Expr::Lambda(predicate)]);
        }

        let selector = Lambda::new([param], body.substitute(&bindings));
        body = if i < innermost {
            source.method("FlatMap", vec![Expr::Lambda(selector)])
        } else if elide_identity && selector.is_identity() {
            source
        } else {
            source.method("Map", vec![Expr::Lambda(selector)])
        };
    }
    body
}

/// Bind each name of a tuple target to an index into `value`
fn destructure(target: &Target, value: Expr, bindings: &mut Vec<(String, Expr)>) {
    match target {
        Target::Name(n) => bindings.push((n.clone(), value)),
        Target::Tuple(items) => {
            for (i, item) in items.iter().enumerate() {
                destructure(item, value.clone().index(Expr::literal(i as i64)), bindings);
            }
        }
    }
}

/// Expand a comprehension whose sources are all literal sequences.
///
/// Returns `None` when some source is not literal, an item cannot be
/// destructured, or an `if` clause does not fold to a boolean; the caller
/// lowers the comprehension instead.
fn expand_literal(
    element: &Expr,
    generators: &[Generator],
    cx: &mut RewriteContext,
) -> Result<Option<Vec<Expr>>, BuildError> {
    let mut out = vec![];
    let complete = expand_from(element, generators, &[], cx, &mut out)?;
    Ok(complete.then_some(out))
}

fn expand_from(
    element: &Expr,
    generators: &[Generator],
    bindings: &[(String, Expr)],
    cx: &mut RewriteContext,
    out: &mut Vec<Expr>,
) -> Result<bool, BuildError> {
    let Some((g, rest)) = generators.split_first() else {
        out.push(element.clone().substitute(bindings));
        return Ok(true);
    };
    let Some(items) = literal_items(&g.iter.clone().substitute(bindings)) else {
        return Ok(false);
    };

    for item in items {
        let mut scope = bindings.to_vec();
        if !bind_literal(&g.target, item, &mut scope)? {
            return Ok(false);
        }
        let mut keep = true;
        for cond in &g.ifs {
            match cx.fold_bool(&cond.clone().substitute(&scope)) {
                Some(true) => {}
                Some(false) => {
                    keep = false;
                    break;
                }
                None => return Ok(false),
            }
        }
        if keep && !expand_from(element, rest, &scope, cx, out)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn bind_literal(
    target: &Target,
    item: Expr,
    scope: &mut Vec<(String, Expr)>,
) -> Result<bool, BuildError> {
    match target {
        Target::Name(n) => {
            scope.push((n.clone(), item));
            Ok(true)
        }
        Target::Tuple(targets) => {
            let Some(parts) = literal_items(&item) else {
                return Ok(false);
            };
            if parts.len() != targets.len() {
                return Err(BuildError::UnsupportedExpression {
                    expr: unparse(&item),
                    reason: format!(
                        "cannot unpack {} items into {} names",
                        parts.len(),
                        targets.len()
                    ),
                });
            }
            for (t, part) in targets.iter().zip(parts) {
                if !bind_literal(t, part, scope)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}
