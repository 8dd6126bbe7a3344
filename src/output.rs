//! Rendering of expression trees and query trees.
//!
//! Trees render back to lambda source with [`unparse()`], which is also what
//! every error message quotes. Finished query trees render to JSON with
//! [`to_json()`] and [`to_json_pretty()`].
//!
//! Rendering is deterministic: the same tree always gives the same text,
//! and parsing the text of a quoted tree gives the tree back.
//!
//! # Examples
//!
//! ```
//! use linqtree::output::unparse;
//! use linqtree::parser::parse_expression;
//!
//! let source = "lambda j: j.pt() / 1000.0 if j.eta() < 2.4 else -1";
//! let expr = parse_expression(source).unwrap();
//! assert_eq!(unparse(&expr), source);
//! ```

use std::fmt;

use serde::Serialize;

use crate::{
    ast::{BinOp, BoolOp, ComprehensionKind, DictEntry, Expr, Generator, Lambda, Target, UnaryOp},
    value::Value,
};

// Binding strength, loosest first
const LAMBDA: u8 = 1;
const OR: u8 = 2;
const AND: u8 = 3;
const NOT: u8 = 4;
const COMPARE: u8 = 5;
const SUM: u8 = 6;
const TERM: u8 = 7;
const UNARY: u8 = 8;
const POWER: u8 = 9;
const ATOM: u8 = 10;

pub struct SourcePrinter {
    out: String,
}

impl SourcePrinter {
    pub fn new() -> Self {
        SourcePrinter { out: String::new() }
    }

    pub fn print(mut self, expr: &Expr) -> String {
        self.expr(expr, 0);
        self.out
    }

    fn precedence(expr: &Expr) -> u8 {
        match expr {
            Expr::Lambda(_) | Expr::IfExp { .. } => LAMBDA,
            Expr::BoolOp { op: BoolOp::Or, .. } => OR,
            Expr::BoolOp { op: BoolOp::And, .. } => AND,
            Expr::UnaryOp {
                op: UnaryOp::Not, ..
            } => NOT,
            Expr::Compare { .. } => COMPARE,
            Expr::BinOp {
                op: BinOp::Add | BinOp::Subtract,
                ..
            } => SUM,
            Expr::BinOp { op: BinOp::Power, .. } => POWER,
            Expr::BinOp { .. } => TERM,
            Expr::UnaryOp { .. } => UNARY,
            Expr::Literal(Value::Integer(n)) if *n < 0 => UNARY,
            Expr::Literal(Value::Float(n)) if n.is_sign_negative() => UNARY,
            _ => ATOM,
        }
    }

    /// Print `expr`, parenthesized if it binds looser than `min`
    fn expr(&mut self, expr: &Expr, min: u8) {
        let wrap = Self::precedence(expr) < min;
        if wrap {
            self.out.push('(');
        }
        self.node(expr);
        if wrap {
            self.out.push(')');
        }
    }

    fn node(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(value) => self.value(value),
            Expr::Parameter(name) | Expr::Name(name) => self.out.push_str(name),
            Expr::Attribute { base, name } => {
                self.expr(base, ATOM);
                self.out.push('.');
                self.out.push_str(name);
            }
            Expr::Subscript { base, index } => {
                self.expr(base, ATOM);
                self.out.push('[');
                self.expr(index, 0);
                self.out.push(']');
            }
            Expr::Call {
                func,
                args,
                keywords,
                type_args,
            } => {
                self.expr(func, ATOM);
                if !type_args.is_empty() {
                    self.out.push('[');
                    for (i, arg) in type_args.iter().enumerate() {
                        self.separator(i);
                        self.type_arg(arg);
                    }
                    self.out.push(']');
                }
                self.out.push('(');
                match (args.as_slice(), keywords.is_empty()) {
                    // A lone generator argument needs no parentheses of its own
                    (
                        [Expr::Comprehension {
                            kind: ComprehensionKind::Generator,
                            element,
                            generators,
                        }],
                        true,
                    ) => self.comprehension_body(element, generators),
                    _ => {
                        for (i, arg) in args.iter().enumerate() {
                            self.separator(i);
                            self.expr(arg, 0);
                        }
                    }
                }
                for (i, (name, value)) in keywords.iter().enumerate() {
                    self.separator(args.len() + i);
                    self.out.push_str(name);
                    self.out.push('=');
                    self.expr(value, 0);
                }
                self.out.push(')');
            }
            Expr::BinOp { op, left, right } => {
                let level = Self::precedence(expr);
                // ** groups to the right, everything else to the left
                let (l, r) = if *op == BinOp::Power {
                    (ATOM, UNARY)
                } else {
                    (level, level + 1)
                };
                self.expr(left, l);
                self.out.push(' ');
                self.out.push_str(op.symbol());
                self.out.push(' ');
                self.expr(right, r);
            }
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => {
                    self.out.push_str("not ");
                    self.expr(operand, NOT);
                }
                UnaryOp::Negate => {
                    self.out.push('-');
                    self.expr(operand, UNARY);
                }
                UnaryOp::Plus => {
                    self.out.push('+');
                    self.expr(operand, UNARY);
                }
            },
            Expr::Compare { op, left, right } => {
                self.expr(left, COMPARE + 1);
                self.out.push(' ');
                self.out.push_str(op.symbol());
                self.out.push(' ');
                self.expr(right, COMPARE + 1);
            }
            Expr::BoolOp { op, values } => {
                let level = Self::precedence(expr);
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.out.push(' ');
                        self.out.push_str(op.keyword());
                        self.out.push(' ');
                    }
                    self.expr(value, level + 1);
                }
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(body, OR);
                self.out.push_str(" if ");
                self.expr(test, OR);
                self.out.push_str(" else ");
                self.expr(orelse, LAMBDA);
            }
            Expr::Lambda(lambda) => self.lambda(lambda),
            Expr::List(items) => {
                self.out.push('[');
                self.items(items);
                self.out.push(']');
            }
            Expr::Tuple(items) => {
                self.out.push('(');
                self.items(items);
                if items.len() == 1 {
                    self.out.push(',');
                }
                self.out.push(')');
            }
            Expr::Dict(items) => {
                self.out.push('{');
                for (i, (key, value)) in items.iter().enumerate() {
                    self.separator(i);
                    self.string(key);
                    self.out.push_str(": ");
                    self.expr(value, 0);
                }
                self.out.push('}');
            }
            Expr::DictMerge(entries) => {
                self.out.push('{');
                for (i, entry) in entries.iter().enumerate() {
                    self.separator(i);
                    match entry {
                        DictEntry::Pair(key, value) => {
                            self.string(key);
                            self.out.push_str(": ");
                            self.expr(value, 0);
                        }
                        DictEntry::Spread(value) => {
                            self.out.push_str("**");
                            self.expr(value, OR);
                        }
                    }
                }
                self.out.push('}');
            }
            Expr::Comprehension {
                kind,
                element,
                generators,
            } => {
                let (open, close) = match kind {
                    ComprehensionKind::List => ('[', ']'),
                    ComprehensionKind::Generator => ('(', ')'),
                };
                self.out.push(open);
                self.comprehension_body(element, generators);
                self.out.push(close);
            }
        }
    }

    fn comprehension_body(&mut self, element: &Expr, generators: &[Generator]) {
        self.expr(element, 0);
        for g in generators {
            self.out.push_str(" for ");
            self.target(&g.target, false);
            self.out.push_str(" in ");
            self.expr(&g.iter, OR);
            for cond in &g.ifs {
                self.out.push_str(" if ");
                self.expr(cond, OR);
            }
        }
    }

    fn lambda(&mut self, lambda: &Lambda) {
        self.out.push_str("lambda");
        for (i, param) in lambda.params.iter().enumerate() {
            self.out.push_str(if i == 0 { " " } else { ", " });
            self.out.push_str(param);
        }
        self.out.push_str(": ");
        self.expr(&lambda.body, LAMBDA);
    }

    fn items(&mut self, items: &[Expr]) {
        for (i, item) in items.iter().enumerate() {
            self.separator(i);
            self.expr(item, 0);
        }
    }

    fn target(&mut self, target: &Target, nested: bool) {
        match target {
            Target::Name(name) => self.out.push_str(name),
            Target::Tuple(items) => {
                if nested {
                    self.out.push('(');
                }
                for (i, item) in items.iter().enumerate() {
                    self.separator(i);
                    self.target(item, true);
                }
                if nested {
                    self.out.push(')');
                }
            }
        }
    }

    fn separator(&mut self, index: usize) {
        if index > 0 {
            self.out.push_str(", ");
        }
    }

    /// Bare type names print unquoted, as they were written
    fn type_arg(&mut self, value: &Value) {
        match value {
            Value::String(s) if is_identifier(s) => self.out.push_str(s),
            other => self.value(other),
        }
    }

    fn value(&mut self, value: &Value) {
        match value {
            Value::None => self.out.push_str("None"),
            Value::Boolean(true) => self.out.push_str("True"),
            Value::Boolean(false) => self.out.push_str("False"),
            Value::Integer(n) => self.out.push_str(&n.to_string()),
            // Debug keeps the fractional part: 30.0, not 30
            Value::Float(n) => self.out.push_str(&format!("{:?}", n)),
            Value::String(s) => self.string(s),
            Value::List(items) => {
                self.out.push('[');
                self.values(items);
                self.out.push(']');
            }
            Value::Tuple(items) => {
                self.out.push('(');
                self.values(items);
                if items.len() == 1 {
                    self.out.push(',');
                }
                self.out.push(')');
            }
            Value::Record(fields) => {
                self.out.push('{');
                for (i, (key, value)) in fields.iter().enumerate() {
                    self.separator(i);
                    self.string(key);
                    self.out.push_str(": ");
                    self.value(value);
                }
                self.out.push('}');
            }
        }
    }

    fn values(&mut self, items: &[Value]) {
        for (i, item) in items.iter().enumerate() {
            self.separator(i);
            self.value(item);
        }
    }

    fn string(&mut self, s: &str) {
        self.out.push('\'');
        for c in s.chars() {
            match c {
                '\'' => self.out.push_str("\\'"),
                '\\' => self.out.push_str("\\\\"),
                '\n' => self.out.push_str("\\n"),
                '\r' => self.out.push_str("\\r"),
                '\t' => self.out.push_str("\\t"),
                c => self.out.push(c),
            }
        }
        self.out.push('\'');
    }
}

impl Default for SourcePrinter {
    fn default() -> Self {
        Self::new()
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Render an expression as lambda source.
pub fn unparse(expr: &Expr) -> String {
    SourcePrinter::new().print(expr)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&unparse(self))
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut printer = SourcePrinter::new();
        printer.lambda(self);
        f.write_str(&printer.out)
    }
}

/// Compact JSON, the form handed to backends.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Pretty-printed JSON with 2-space indentation.
pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}
