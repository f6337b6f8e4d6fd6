#![forbid(unsafe_code)]

//! Restricted expression language for display conditions and class
//! expressions.
//!
//! Expressions are parsed into a small AST and evaluated over JSON
//! snapshots. Nothing is executed: the language has literals, identifiers,
//! member and index access, `!`/unary `-`, arithmetic, comparisons, loose
//! and strict equality, `&&`/`||` and the ternary operator. Operators follow
//! the usual scripting coercions, so `item.count > 0 && !item.done` reads the
//! way a template author expects.
//!
//! # Identifier resolution
//!
//! [`ItemScope`] resolves a bare identifier in this order:
//!
//! 1. `item`, the current list item (or bound value);
//! 2. `state`, a snapshot of every root variable;
//! 3. the list's root variable name, as an alias of the current item;
//! 4. a property of the current item (`done` means `item.done`);
//! 5. a root variable.

mod parser;

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value as Json;

pub use crate::error::ExprError;
pub use parser::parse;

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Json),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    LooseEq,
    LooseNe,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn from_punct(p: &str) -> Option<Self> {
        Some(match p {
            "||" => Self::Or,
            "&&" => Self::And,
            "==" => Self::LooseEq,
            "!=" => Self::LooseNe,
            "===" => Self::StrictEq,
            "!==" => Self::StrictNe,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Rem,
            _ => return None,
        })
    }

    const fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::LooseEq | Self::LooseNe | Self::StrictEq | Self::StrictNe => 3,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Rem => 6,
        }
    }
}

impl Expr {
    /// Every bare identifier the expression reads, in first-use order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers(&self, out: &mut Vec<String>) {
        match self {
            Self::Literal(_) => {}
            Self::Ident(name) => {
                if !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
            Self::Member(base, _) | Self::Unary(_, base) => base.collect_identifiers(out),
            Self::Index(a, b) | Self::Binary(_, a, b) => {
                a.collect_identifiers(out);
                b.collect_identifiers(out);
            }
            Self::Conditional(a, b, c) => {
                a.collect_identifiers(out);
                b.collect_identifiers(out);
                c.collect_identifiers(out);
            }
        }
    }

    /// Evaluate against `scope`.
    pub fn evaluate(&self, scope: &dyn Scope) -> Result<Json, ExprError> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Ident(name) => scope
                .lookup(name)
                .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
            Self::Member(base, name) => member(&base.evaluate(scope)?, name),
            Self::Index(base, index) => {
                let base = base.evaluate(scope)?;
                let key = match index.evaluate(scope)? {
                    Json::String(s) => s,
                    other => display(&other),
                };
                member(&base, &key)
            }
            Self::Unary(op, operand) => {
                let v = operand.evaluate(scope)?;
                Ok(match op {
                    UnaryOp::Not => Json::Bool(!truthy(&v)),
                    UnaryOp::Neg => crate::value::number_to_json(-to_number(&v)),
                    UnaryOp::Plus => crate::value::number_to_json(to_number(&v)),
                })
            }
            Self::Binary(BinaryOp::And, a, b) => {
                let lhs = a.evaluate(scope)?;
                if truthy(&lhs) { b.evaluate(scope) } else { Ok(lhs) }
            }
            Self::Binary(BinaryOp::Or, a, b) => {
                let lhs = a.evaluate(scope)?;
                if truthy(&lhs) { Ok(lhs) } else { b.evaluate(scope) }
            }
            Self::Binary(op, a, b) => Ok(binary(*op, &a.evaluate(scope)?, &b.evaluate(scope)?)),
            Self::Conditional(cond, then, otherwise) => {
                if truthy(&cond.evaluate(scope)?) {
                    then.evaluate(scope)
                } else {
                    otherwise.evaluate(scope)
                }
            }
        }
    }
}

fn member(base: &Json, name: &str) -> Result<Json, ExprError> {
    match base {
        Json::Null => Err(ExprError::NullAccess(name.to_owned())),
        Json::Object(map) => Ok(map.get(name).cloned().unwrap_or(Json::Null)),
        Json::Array(items) if name == "length" => Ok(Json::from(items.len())),
        Json::Array(items) => Ok(crate::path::parse_index(name)
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Json::Null)),
        Json::String(s) if name == "length" => Ok(Json::from(s.chars().count())),
        _ => Ok(Json::Null),
    }
}

fn binary(op: BinaryOp, a: &Json, b: &Json) -> Json {
    use crate::value::number_to_json;
    match op {
        BinaryOp::Add => match (a, b) {
            (Json::String(_), _) | (_, Json::String(_)) => {
                Json::String(format!("{}{}", display(a), display(b)))
            }
            _ => number_to_json(to_number(a) + to_number(b)),
        },
        BinaryOp::Sub => number_to_json(to_number(a) - to_number(b)),
        BinaryOp::Mul => number_to_json(to_number(a) * to_number(b)),
        BinaryOp::Div => number_to_json(to_number(a) / to_number(b)),
        BinaryOp::Rem => number_to_json(to_number(a) % to_number(b)),
        BinaryOp::Lt => Json::Bool(compare(a, b).is_some_and(|o| o.is_lt())),
        BinaryOp::Le => Json::Bool(compare(a, b).is_some_and(|o| o.is_le())),
        BinaryOp::Gt => Json::Bool(compare(a, b).is_some_and(|o| o.is_gt())),
        BinaryOp::Ge => Json::Bool(compare(a, b).is_some_and(|o| o.is_ge())),
        BinaryOp::LooseEq => Json::Bool(loose_eq(a, b)),
        BinaryOp::LooseNe => Json::Bool(!loose_eq(a, b)),
        BinaryOp::StrictEq => Json::Bool(strict_eq(a, b)),
        BinaryOp::StrictNe => Json::Bool(!strict_eq(a, b)),
        // Lazily evaluated in `Expr::evaluate`; kept total for direct calls.
        BinaryOp::And => if truthy(a) { b.clone() } else { a.clone() },
        BinaryOp::Or => if truthy(a) { a.clone() } else { b.clone() },
    }
}

/// Scripting truthiness over JSON.
#[must_use]
pub fn truthy(v: &Json) -> bool {
    match v {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Json::String(s) => !s.is_empty(),
        Json::Array(_) | Json::Object(_) => true,
    }
}

fn to_number(v: &Json) -> f64 {
    match v {
        Json::Null => 0.0,
        Json::Bool(b) => f64::from(u8::from(*b)),
        Json::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Json::String(s) => {
            let s = s.trim();
            if s.is_empty() { 0.0 } else { s.parse().unwrap_or(f64::NAN) }
        }
        Json::Array(_) | Json::Object(_) => f64::NAN,
    }
}

/// String form used for concatenation and computed keys.
fn display(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        Json::Null => "null".to_owned(),
        other => other.to_string(),
    }
}

fn compare(a: &Json, b: &Json) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        _ => to_number(a).partial_cmp(&to_number(b)),
    }
}

fn strict_eq(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn loose_eq(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Null, Json::Null) => true,
        (Json::Null, _) | (_, Json::Null) => false,
        (Json::String(x), Json::String(y)) => x == y,
        (Json::Array(_) | Json::Object(_), _) | (_, Json::Array(_) | Json::Object(_)) => a == b,
        _ => to_number(a) == to_number(b),
    }
}

/// Name resolution for [`Expr::evaluate`].
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<Json>;
}

/// Scope for a bound node: an optional current item, its list alias, and a
/// snapshot of every root variable.
#[derive(Debug, Clone, Copy)]
pub struct ItemScope<'a> {
    state: &'a Json,
    item: Option<&'a Json>,
    alias: Option<&'a str>,
}

impl<'a> ItemScope<'a> {
    /// Scope with no current item. `state` is an object of root variables.
    #[must_use]
    pub const fn new(state: &'a Json) -> Self {
        Self {
            state,
            item: None,
            alias: None,
        }
    }

    /// Set the current item, reachable as `item` and as `alias`.
    #[must_use]
    pub const fn with_item(mut self, item: &'a Json, alias: Option<&'a str>) -> Self {
        self.item = Some(item);
        self.alias = alias;
        self
    }
}

impl Scope for ItemScope<'_> {
    fn lookup(&self, name: &str) -> Option<Json> {
        if name == "item" {
            return Some(self.item.cloned().unwrap_or(Json::Null));
        }
        if name == "state" {
            return Some(self.state.clone());
        }
        if let Some(item) = self.item {
            if self.alias == Some(name) {
                return Some(item.clone());
            }
            if let Some(v) = item.as_object().and_then(|o| o.get(name)) {
                return Some(v.clone());
            }
        }
        self.state.as_object().and_then(|o| o.get(name)).cloned()
    }
}

/// Evaluates display conditions and class expressions.
pub trait ExpressionEvaluator {
    /// Evaluate `source` to a JSON value.
    fn evaluate(&self, source: &str, scope: &dyn Scope) -> Result<Json, ExprError>;

    /// Bare identifiers `source` reads.
    fn identifiers(&self, source: &str) -> Result<Vec<String>, ExprError>;

    /// Evaluate `source` as a display condition.
    fn condition(&self, source: &str, scope: &dyn Scope) -> Result<bool, ExprError> {
        self.evaluate(source, scope).map(|v| truthy(&v))
    }

    /// Evaluate `source` as a class expression: a non-blank string result
    /// is split on whitespace, anything else yields no classes.
    fn classes(&self, source: &str, scope: &dyn Scope) -> Result<Vec<String>, ExprError> {
        Ok(match self.evaluate(source, scope)? {
            Json::String(s) => s.split_whitespace().map(str::to_owned).collect(),
            _ => Vec::new(),
        })
    }
}

/// Default evaluator. Parsed expressions are cached by source text.
#[derive(Debug, Default)]
pub struct RestrictedEvaluator {
    cache: RefCell<AHashMap<String, Rc<Expr>>>,
}

impl RestrictedEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, source: &str) -> Result<Rc<Expr>, ExprError> {
        if let Some(expr) = self.cache.borrow().get(source) {
            return Ok(Rc::clone(expr));
        }
        let expr = Rc::new(parse(source)?);
        self.cache
            .borrow_mut()
            .insert(source.to_owned(), Rc::clone(&expr));
        Ok(expr)
    }

    /// Number of cached parses.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl ExpressionEvaluator for RestrictedEvaluator {
    fn evaluate(&self, source: &str, scope: &dyn Scope) -> Result<Json, ExprError> {
        self.compile(source)?.evaluate(scope)
    }

    fn identifiers(&self, source: &str) -> Result<Vec<String>, ExprError> {
        Ok(self.compile(source)?.identifiers())
    }
}
