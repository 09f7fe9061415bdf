//! Tagged control values and the control map.
//!
//! Events emitted toward a target carry a `ControlMap`: named parameters
//! whose values are drawn from the `Value` union. Signal-valued entries are
//! resolved to concrete values once per tick, before emission.

use crate::pattern::Pattern;
use crate::time::Time;
use std::collections::HashMap;
use std::fmt;

/// A named-parameter map, the canonical event payload.
pub type ControlMap = HashMap<String, Value>;

/// A tagged control value.
#[derive(Clone)]
pub enum Value {
    Int(i32),
    Double(f64),
    Rational(Time),
    Str(String),
    Bool(bool),
    Blob(Vec<u8>),
    /// A live signal; resolved by querying it at the current cycle.
    Sig(Pattern<Value>),
    List(Vec<Value>),
}

impl Value {
    /// Numeric view as a float. Strings parse; booleans count as 0/1.
    pub fn as_f(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(f) => Some(*f),
            Value::Rational(r) => Some(r.as_f64()),
            Value::Str(s) => s.parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Numeric view as an integer. Floats truncate; strings parse.
    pub fn as_i(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(f) => Some(*f as i32),
            Value::Rational(r) => Some(r.as_f64() as i32),
            Value::Str(s) => s
                .parse::<i32>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i32)),
            Value::Bool(b) => Some(*b as i32),
            _ => None,
        }
    }

    pub fn as_s(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Double(f) => Some(f.to_string()),
            Value::Rational(r) => Some(r.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn as_b(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Double(f) => Some(*f != 0.0),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_) | Value::Rational(_))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Double(d) => write!(f, "Double({})", d),
            Value::Rational(r) => write!(f, "Rational({})", r),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Blob(b) => write!(f, "Blob({} bytes)", b.len()),
            Value::Sig(_) => write!(f, "Sig(..)"),
            Value::List(l) => write!(f, "List({:?})", l),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Rational(a), Value::Rational(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Signals compare unequal; they have no extensional identity.
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Rational(r) => write!(f, "{}", r),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Value::Sig(_) => write!(f, "<signal>"),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<Time> for Value {
    fn from(t: Time) -> Self {
        Value::Rational(t)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
