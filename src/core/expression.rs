// src/core/expression.rs
//
// Embedded expression language. Variables are free identifiers resolved
// against the run's variable map; nothing can be assigned or called besides a
// fixed set of read-only string/array methods.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "core/expr.pest"]
struct ExprGrammar;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("{0} is not defined")]
    UnknownVariable(String),
    #[error("Cannot read properties of {target} (reading '{property}')")]
    NullAccess { target: String, property: String },
    #[error("{0} is not a function")]
    NotCallable(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
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
    fn from_symbol(symbol: &str) -> Result<Self, ExprError> {
        Ok(match symbol {
            "||" => BinaryOp::Or,
            "&&" => BinaryOp::And,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::NotEq,
            "===" => BinaryOp::StrictEq,
            "!==" => BinaryOp::StrictNotEq,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            other => return Err(ExprError::Syntax(format!("unknown operator '{}'", other))),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Number(f64),
    Undefined,
    Array(Vec<Expr>),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// Result of evaluating an expression.
///
/// NaN and the infinities have no JSON form, so they stay raw floats until
/// the value leaves the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Undefined,
    Json(Value),
    NonFinite(f64),
}

impl Evaluated {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Evaluated::Undefined)
    }

    fn is_nullish(&self) -> bool {
        matches!(self, Evaluated::Undefined | Evaluated::Json(Value::Null))
    }

    /// JSON form. `undefined` is `None`; non-finite numbers become `null`.
    pub fn into_json(self) -> Option<Value> {
        match self {
            Evaluated::Undefined => None,
            Evaluated::Json(v) => Some(v),
            Evaluated::NonFinite(_) => Some(Value::Null),
        }
    }

    /// String form used when the value is spliced into text.
    pub fn render(&self) -> String {
        match self {
            Evaluated::Undefined => "undefined".to_string(),
            Evaluated::Json(v) => display_string(v),
            Evaluated::NonFinite(n) => format_number(*n),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Evaluated::Undefined => false,
            Evaluated::NonFinite(n) => !n.is_nan(),
            Evaluated::Json(Value::Null) => false,
            Evaluated::Json(Value::Bool(b)) => *b,
            Evaluated::Json(Value::Number(n)) => {
                n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false)
            }
            Evaluated::Json(Value::String(s)) => !s.is_empty(),
            Evaluated::Json(Value::Array(_) | Value::Object(_)) => true,
        }
    }
}

impl From<Option<Value>> for Evaluated {
    fn from(value: Option<Value>) -> Self {
        value.map(Evaluated::Json).unwrap_or(Evaluated::Undefined)
    }
}

/// A parsed expression.
#[derive(Debug, Clone)]
pub struct Expression {
    ast: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let mut pairs = ExprGrammar::parse(Rule::expression, source)
            .map_err(|e| ExprError::Syntax(e.to_string()))?;
        let root = pairs
            .next()
            .ok_or_else(|| ExprError::Syntax("empty expression".to_string()))?;
        let body = root
            .into_inner()
            .next()
            .ok_or_else(|| ExprError::Syntax("empty expression".to_string()))?;
        Ok(Expression { ast: build(body)? })
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    pub fn evaluate_raw(&self, vars: &Map<String, Value>) -> Result<Evaluated, ExprError> {
        eval(&self.ast, vars)
    }

    /// JSON result; `None` stands for `undefined`.
    pub fn evaluate(&self, vars: &Map<String, Value>) -> Result<Option<Value>, ExprError> {
        Ok(self.evaluate_raw(vars)?.into_json())
    }
}

/// Parses and evaluates `source` in one step.
pub fn evaluate(source: &str, vars: &Map<String, Value>) -> Result<Option<Value>, ExprError> {
    Expression::parse(source)?.evaluate(vars)
}

/// Like [`evaluate`] but keeps `undefined` and non-finite numbers apart.
pub fn evaluate_raw(source: &str, vars: &Map<String, Value>) -> Result<Evaluated, ExprError> {
    Expression::parse(source)?.evaluate_raw(vars)
}

/// Evaluates `source` and coerces the result to a boolean.
pub fn evaluate_bool(source: &str, vars: &Map<String, Value>) -> Result<bool, ExprError> {
    Ok(evaluate_raw(source, vars)?.is_truthy())
}

// ---------------------------------------------------------------------------
// AST construction
// ---------------------------------------------------------------------------

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>) -> Result<Pair<'i, Rule>, ExprError> {
    pairs
        .next()
        .ok_or_else(|| ExprError::Syntax("unexpected end of expression".to_string()))
}

fn build(pair: Pair<Rule>) -> Result<Expr, ExprError> {
    match pair.as_rule() {
        Rule::ternary => {
            let mut inner = pair.into_inner();
            let cond = build(next_pair(&mut inner)?)?;
            match (inner.next(), inner.next()) {
                (Some(then), Some(otherwise)) => Ok(Expr::Ternary(
                    Box::new(cond),
                    Box::new(build(then)?),
                    Box::new(build(otherwise)?),
                )),
                _ => Ok(cond),
            }
        }
        Rule::or_expr
        | Rule::and_expr
        | Rule::eq_expr
        | Rule::rel_expr
        | Rule::add_expr
        | Rule::mul_expr => {
            let mut inner = pair.into_inner();
            let mut lhs = build(next_pair(&mut inner)?)?;
            while let Some(op) = inner.next() {
                let rhs = build(next_pair(&mut inner)?)?;
                let op = BinaryOp::from_symbol(op.as_str())?;
                lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
            }
            Ok(lhs)
        }
        Rule::unary => {
            let mut ops = Vec::new();
            let mut operand = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::unary_op => ops.push(match p.as_str() {
                        "!" => UnaryOp::Not,
                        "-" => UnaryOp::Neg,
                        _ => UnaryOp::Plus,
                    }),
                    _ => operand = Some(build(p)?),
                }
            }
            let mut expr =
                operand.ok_or_else(|| ExprError::Syntax("missing operand".to_string()))?;
            for op in ops.into_iter().rev() {
                expr = Expr::Unary(op, Box::new(expr));
            }
            Ok(expr)
        }
        Rule::postfix => {
            let mut inner = pair.into_inner();
            let mut expr = build(next_pair(&mut inner)?)?;
            for accessor in inner {
                expr = match accessor.as_rule() {
                    Rule::member => {
                        let name = next_pair(&mut accessor.into_inner())?.as_str().to_string();
                        Expr::Member(Box::new(expr), name)
                    }
                    Rule::index => {
                        let key = build(next_pair(&mut accessor.into_inner())?)?;
                        Expr::Index(Box::new(expr), Box::new(key))
                    }
                    Rule::call_member => {
                        let mut parts = accessor.into_inner();
                        let name = next_pair(&mut parts)?.as_str().to_string();
                        let args = parts.map(build).collect::<Result<Vec<_>, _>>()?;
                        Expr::Call(Box::new(expr), name, args)
                    }
                    other => {
                        return Err(ExprError::Syntax(format!("unexpected {:?}", other)));
                    }
                };
            }
            Ok(expr)
        }
        Rule::array => Ok(Expr::Array(
            pair.into_inner().map(build).collect::<Result<Vec<_>, _>>()?,
        )),
        Rule::number => {
            let n: f64 = pair
                .as_str()
                .parse()
                .map_err(|_| ExprError::Syntax(format!("invalid number '{}'", pair.as_str())))?;
            Ok(Expr::Number(n))
        }
        Rule::string => {
            let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Expr::Literal(Value::String(unescape(raw))))
        }
        Rule::keyword => Ok(match pair.as_str() {
            "true" => Expr::Literal(Value::Bool(true)),
            "false" => Expr::Literal(Value::Bool(false)),
            "null" => Expr::Literal(Value::Null),
            _ => Expr::Undefined,
        }),
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        other => Err(ExprError::Syntax(format!("unexpected {:?}", other))),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push('u');
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, vars: &Map<String, Value>) -> Result<Evaluated, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(Evaluated::Json(v.clone())),
        Expr::Number(n) => Ok(number_value(*n)),
        Expr::Undefined => Ok(Evaluated::Undefined),
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, vars)?.into_json().unwrap_or(Value::Null));
            }
            Ok(Evaluated::Json(Value::Array(out)))
        }
        Expr::Ident(name) => vars
            .get(name)
            .cloned()
            .map(Evaluated::Json)
            .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
        Expr::Member(target, name) => {
            let target = eval(target, vars)?;
            property(&target, name)
        }
        Expr::Index(target, key) => {
            let target = eval(target, vars)?;
            let key = eval(key, vars)?;
            index(&target, &key)
        }
        Expr::Call(target, name, args) => {
            let target = eval(target, vars)?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, vars)?);
            }
            call_method(&target, name, &values)
        }
        Expr::Unary(op, operand) => {
            let v = eval(operand, vars)?;
            Ok(match op {
                UnaryOp::Not => Evaluated::Json(Value::Bool(!v.is_truthy())),
                UnaryOp::Neg => number_value(-to_number(&v)),
                UnaryOp::Plus => number_value(to_number(&v)),
            })
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let l = eval(lhs, vars)?;
            if l.is_truthy() {
                Ok(l)
            } else {
                eval(rhs, vars)
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let l = eval(lhs, vars)?;
            if l.is_truthy() {
                eval(rhs, vars)
            } else {
                Ok(l)
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, vars)?;
            let r = eval(rhs, vars)?;
            Ok(binary(*op, &l, &r))
        }
        Expr::Ternary(cond, then, otherwise) => {
            if eval(cond, vars)?.is_truthy() {
                eval(then, vars)
            } else {
                eval(otherwise, vars)
            }
        }
    }
}

fn binary(op: BinaryOp, l: &Evaluated, r: &Evaluated) -> Evaluated {
    let flag = |b: bool| Evaluated::Json(Value::Bool(b));
    match op {
        BinaryOp::Add => {
            let stringy = |v: &Evaluated| {
                matches!(
                    v,
                    Evaluated::Json(Value::String(_) | Value::Array(_) | Value::Object(_))
                )
            };
            if stringy(l) || stringy(r) {
                Evaluated::Json(Value::String(format!("{}{}", l.render(), r.render())))
            } else {
                number_value(to_number(l) + to_number(r))
            }
        }
        BinaryOp::Sub => number_value(to_number(l) - to_number(r)),
        BinaryOp::Mul => number_value(to_number(l) * to_number(r)),
        BinaryOp::Div => number_value(to_number(l) / to_number(r)),
        BinaryOp::Rem => number_value(to_number(l) % to_number(r)),
        BinaryOp::Eq => flag(loose_eq(l, r)),
        BinaryOp::NotEq => flag(!loose_eq(l, r)),
        BinaryOp::StrictEq => flag(strict_eq(l, r)),
        BinaryOp::StrictNotEq => flag(!strict_eq(l, r)),
        BinaryOp::Lt => flag(compare(l, r) == Some(Ordering::Less)),
        BinaryOp::Le => flag(matches!(
            compare(l, r),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => flag(compare(l, r) == Some(Ordering::Greater)),
        BinaryOp::Ge => flag(matches!(
            compare(l, r),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        // short-circuit operators are handled in `eval`
        BinaryOp::Or | BinaryOp::And => Evaluated::Undefined,
    }
}

fn compare(l: &Evaluated, r: &Evaluated) -> Option<Ordering> {
    match (l, r) {
        (Evaluated::Json(Value::String(a)), Evaluated::Json(Value::String(b))) => Some(a.cmp(b)),
        _ => to_number(l).partial_cmp(&to_number(r)),
    }
}

fn is_numeric(v: &Evaluated) -> bool {
    matches!(v, Evaluated::NonFinite(_) | Evaluated::Json(Value::Number(_)))
}

fn strict_eq(l: &Evaluated, r: &Evaluated) -> bool {
    match (l, r) {
        (Evaluated::Undefined, Evaluated::Undefined) => true,
        _ if is_numeric(l) && is_numeric(r) => to_number(l) == to_number(r),
        (Evaluated::Json(a), Evaluated::Json(b)) => a == b,
        _ => false,
    }
}

fn loose_eq(l: &Evaluated, r: &Evaluated) -> bool {
    if l.is_nullish() || r.is_nullish() {
        return l.is_nullish() && r.is_nullish();
    }
    match (l, r) {
        (Evaluated::Json(Value::Bool(a)), Evaluated::Json(Value::Bool(b))) => a == b,
        (Evaluated::Json(Value::Bool(_)), _) | (_, Evaluated::Json(Value::Bool(_))) => {
            to_number(l) == to_number(r)
        }
        (Evaluated::NonFinite(_), _) | (_, Evaluated::NonFinite(_)) => {
            to_number(l) == to_number(r)
        }
        (Evaluated::Json(Value::Number(_)), Evaluated::Json(Value::String(_)))
        | (Evaluated::Json(Value::String(_)), Evaluated::Json(Value::Number(_))) => {
            to_number(l) == to_number(r)
        }
        (Evaluated::Json(Value::String(s)), other) | (other, Evaluated::Json(Value::String(s)))
            if matches!(other, Evaluated::Json(Value::Array(_) | Value::Object(_))) =>
        {
            other.render() == *s
        }
        _ => strict_eq(l, r),
    }
}

fn null_access(target: &Evaluated, property: &str) -> ExprError {
    ExprError::NullAccess {
        target: if target.is_undefined() { "undefined" } else { "null" }.to_string(),
        property: property.to_string(),
    }
}

fn property(target: &Evaluated, name: &str) -> Result<Evaluated, ExprError> {
    match target {
        Evaluated::Undefined | Evaluated::Json(Value::Null) => Err(null_access(target, name)),
        Evaluated::Json(Value::Object(map)) => Ok(map.get(name).cloned().into()),
        Evaluated::Json(Value::Array(items)) if name == "length" => {
            Ok(Evaluated::Json(Value::from(items.len())))
        }
        Evaluated::Json(Value::String(s)) if name == "length" => {
            Ok(Evaluated::Json(Value::from(s.encode_utf16().count())))
        }
        Evaluated::Json(Value::Array(items)) => Ok(name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i).cloned())
            .into()),
        _ => Ok(Evaluated::Undefined),
    }
}

fn index(target: &Evaluated, key: &Evaluated) -> Result<Evaluated, ExprError> {
    let position = |n: &Number| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0);
    match (target, key) {
        (Evaluated::Json(Value::Array(items)), Evaluated::Json(Value::Number(n))) => Ok(position(n)
            .and_then(|f| items.get(f as usize).cloned())
            .into()),
        (Evaluated::Json(Value::String(s)), Evaluated::Json(Value::Number(n))) => Ok(position(n)
            .and_then(|f| s.chars().nth(f as usize))
            .map(|c| Value::String(c.to_string()))
            .into()),
        _ => property(target, &key.render()),
    }
}

fn call_method(target: &Evaluated, name: &str, args: &[Evaluated]) -> Result<Evaluated, ExprError> {
    let arg_str = |i: usize| {
        args.get(i)
            .map(Evaluated::render)
            .unwrap_or_else(|| "undefined".to_string())
    };
    let arg_int = |i: usize| {
        args.get(i)
            .filter(|a| !a.is_undefined())
            .map(|a| to_number(a) as i64)
    };

    let result = match target {
        Evaluated::Undefined | Evaluated::Json(Value::Null) => {
            return Err(null_access(target, name));
        }
        Evaluated::Json(Value::String(s)) => match name {
            "includes" => Value::Bool(s.contains(&arg_str(0))),
            "startsWith" => Value::Bool(s.starts_with(&arg_str(0))),
            "endsWith" => Value::Bool(s.ends_with(&arg_str(0))),
            "indexOf" => {
                let needle = arg_str(0);
                match s.find(&needle) {
                    Some(byte_pos) => Value::from(s[..byte_pos].chars().count() as i64),
                    None => Value::from(-1),
                }
            }
            "trim" => Value::String(s.trim().to_string()),
            "toLowerCase" => Value::String(s.to_lowercase()),
            "toUpperCase" => Value::String(s.to_uppercase()),
            "split" => {
                let sep = arg_str(0);
                let parts: Vec<Value> = if sep.is_empty() {
                    s.chars().map(|c| Value::String(c.to_string())).collect()
                } else {
                    s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect()
                };
                Value::Array(parts)
            }
            "slice" => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_bounds(chars.len(), arg_int(0), arg_int(1));
                Value::String(chars[start..end].iter().collect())
            }
            _ => return Err(ExprError::NotCallable(format!("string.{}", name))),
        },
        Evaluated::Json(Value::Array(items)) => {
            let needle = args.first().cloned().unwrap_or(Evaluated::Undefined);
            let matches_needle = |i: &Value| strict_eq(&Evaluated::Json(i.clone()), &needle);
            match name {
                "includes" => Value::Bool(items.iter().any(matches_needle)),
                "indexOf" => Value::from(
                    items
                        .iter()
                        .position(matches_needle)
                        .map(|p| p as i64)
                        .unwrap_or(-1),
                ),
                "join" => {
                    let sep = match args.first() {
                        Some(sep) if !sep.is_undefined() => sep.render(),
                        _ => ",".to_string(),
                    };
                    Value::String(
                        items.iter().map(element_string).collect::<Vec<_>>().join(&sep),
                    )
                }
                "slice" => {
                    let (start, end) = slice_bounds(items.len(), arg_int(0), arg_int(1));
                    Value::Array(items[start..end].to_vec())
                }
                _ => return Err(ExprError::NotCallable(format!("array.{}", name))),
            }
        }
        _ => return Err(ExprError::NotCallable(name.to_string())),
    };
    Ok(Evaluated::Json(result))
}

fn slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let clamp = |i: i64| -> usize {
        if i < 0 {
            (len as i64 + i).max(0) as usize
        } else {
            (i as usize).min(len)
        }
    };
    let start = clamp(start.unwrap_or(0));
    let end = end.map(clamp).unwrap_or(len);
    (start, end.max(start))
}

// ---------------------------------------------------------------------------
// Coercions
// ---------------------------------------------------------------------------

pub fn to_number(value: &Evaluated) -> f64 {
    match value {
        Evaluated::Undefined => f64::NAN,
        Evaluated::NonFinite(n) => *n,
        Evaluated::Json(Value::Null) => 0.0,
        Evaluated::Json(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Evaluated::Json(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Evaluated::Json(Value::String(s)) => parse_numeric(s),
        Evaluated::Json(Value::Array(items)) => match items.len() {
            0 => 0.0,
            1 => parse_numeric(&element_string(&items[0])),
            _ => f64::NAN,
        },
        Evaluated::Json(Value::Object(_)) => f64::NAN,
    }
}

/// Numeric reading of text. Blank is 0; `Infinity` is spelled out; Rust-only
/// spellings such as `inf` or `nan` are not numbers.
fn parse_numeric(text: &str) -> f64 {
    let t = text.trim();
    if t.is_empty() {
        return 0.0;
    }
    let (negative, body) = match t.as_bytes()[0] {
        b'-' => (true, &t[1..]),
        b'+' => (false, &t[1..]),
        _ => (false, t),
    };
    if body == "Infinity" {
        return if negative { f64::NEG_INFINITY } else { f64::INFINITY };
    }
    let plain = body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !plain {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

/// Converts a float into an evaluation result, keeping integral values integral.
pub fn number_value(n: f64) -> Evaluated {
    if !n.is_finite() {
        Evaluated::NonFinite(n)
    } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Evaluated::Json(Value::from(n as i64))
    } else {
        Number::from_f64(n)
            .map(|num| Evaluated::Json(Value::Number(num)))
            .unwrap_or(Evaluated::NonFinite(n))
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

/// String form of a defined value, the way template output renders it.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                format_number(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(element_string).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn element_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => display_string(other),
    }
}
