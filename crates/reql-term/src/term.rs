use std::collections::BTreeMap;
use std::fmt;

use serde_json::Number;

use crate::proto;

/// A node of a parsed query syntax tree.
///
/// Objects are kept in a `BTreeMap`: key order carries no meaning in the
/// protocol, so two objects are equal when their key sets and values are.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Op(Operation),
    Array(Vec<Term>),
    Object(BTreeMap<String, Term>),
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

/// A term-type application: `[term_id, args, options]` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub term_id: i64,
    pub args: Vec<Term>,
    /// Optional arguments. An absent map and an empty map are the same value.
    pub options: BTreeMap<String, Term>,
}

impl Operation {
    pub fn new(term_id: i64, args: Vec<Term>) -> Self {
        Self {
            term_id,
            args,
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Term) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Human-readable term-type name, falling back to the raw id.
    pub fn name(&self) -> String {
        proto::term_name(self.term_id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("TERM_{}", self.term_id))
    }
}

impl Term {
    pub fn op(term_id: i64, args: Vec<Term>) -> Self {
        Term::Op(Operation::new(term_id, args))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Term::String(s.into())
    }

    pub fn int(n: i64) -> Self {
        Term::Number(Number::from(n))
    }

    pub fn as_op(&self) -> Option<&Operation> {
        match self {
            Term::Op(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Term::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Term::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Scalar value equality with JSON number semantics (`1` equals `1.0`).
    ///
    /// Returns `false` for any pair that is not two scalars of the same kind.
    pub fn scalar_eq(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Null, Term::Null) => true,
            (Term::Bool(a), Term::Bool(b)) => a == b,
            (Term::String(a), Term::String(b)) => a == b,
            (Term::Number(a), Term::Number(b)) => numbers_equal(a, b),
            _ => false,
        }
    }
}

/// Compare two JSON numbers by value.
pub fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

impl From<Operation> for Term {
    fn from(op: Operation) -> Self {
        Term::Op(op)
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::String(s.to_string())
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Term::String(s)
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Term::Bool(b)
    }
}

impl From<i64> for Term {
    fn from(n: i64) -> Self {
        Term::int(n)
    }
}

/// Renders terms with term-type names, e.g. `FILTER(TABLE("turtles"), {"herdId": 7})`.
/// Operation options are appended as `key=value` arguments.
impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Op(op) => {
                write!(f, "{}(", op.name())?;
                let mut first = true;
                for arg in &op.args {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{arg}")?;
                }
                for (key, value) in &op.options {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{key}={value}")?;
                }
                f.write_str(")")
            }
            Term::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Term::Object(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {value}", serde_json::Value::String(key.clone()))?;
                }
                f.write_str("}")
            }
            Term::Null => f.write_str("null"),
            Term::Bool(b) => write!(f, "{b}"),
            Term::Number(n) => write!(f, "{n}"),
            Term::String(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
        }
    }
}
