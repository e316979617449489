use serde::Serialize;
use std::fmt;

/// Represents a case value fed into parametrized tests.
///
/// Case sources produce ordered sequences of `Value`; the plan builder checks
/// every produced value against the kind declared for the parameter field it
/// feeds.
///
/// # Examples
///
/// ```rust
/// use gantry::value::{Kind, Value};
/// let v = Value::Int(3);
/// assert_eq!(v.kind(), Kind::Int);
/// assert_eq!(v.as_int(), Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// The element kind of a `Value`, used to type-check case sources against
/// declared parameter fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Kind {
    Bool,
    Int,
    Float,
    Str,
}

impl Value {
    /// Returns the kind of this value.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Str(_) => Kind::Str,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Bool => "Bool",
            Kind::Int => "Int",
            Kind::Float => "Float",
            Kind::Str => "Str",
        };
        write!(f, "{}", name)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert_eq!(Value::from(true).kind(), Kind::Bool);
        assert_eq!(Value::from(7i64).kind(), Kind::Int);
        assert_eq!(Value::from(1.5f64).kind(), Kind::Float);
        assert_eq!(Value::from("x").kind(), Kind::Str);
    }

    #[test]
    fn typed_accessors_reject_other_kinds() {
        assert_eq!(Value::Int(1).as_str(), None);
        assert_eq!(Value::Str("a".into()).as_int(), None);
    }
}
