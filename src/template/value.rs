// src/template/value.rs
//! Dynamic values produced by template evaluation

use crate::template::error::EvalError;
use std::fmt;

/// A template value
///
/// Single-action templates keep their value's type when converted to JSON,
/// mixed templates are rendered to a string.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
}

impl Value {
    /// Name used in type-mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
        }
    }

    /// Go-template style truthiness
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty() && s != "false" && s != "0",
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Bool(b) => *b,
            Value::List(items) => !items.is_empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Str(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn to_i64(&self, func: &'static str) -> Result<i64, EvalError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
            Value::Str(s) => s.trim().parse::<i64>().map_err(|_| EvalError::Invalid {
                func,
                reason: format!("'{}' is not an integer", s),
            }),
            other => Err(EvalError::TypeMismatch {
                func,
                expected: "int",
                found: other.type_name(),
            }),
        }
    }

    pub fn to_f64(&self, func: &'static str) -> Result<f64, EvalError> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            Value::Str(s) => s.trim().parse::<f64>().map_err(|_| EvalError::Invalid {
                func,
                reason: format!("'{}' is not a number", s),
            }),
            other => Err(EvalError::TypeMismatch {
                func,
                expected: "number",
                found: other.type_name(),
            }),
        }
    }

    pub fn into_list(self, func: &'static str) -> Result<Vec<Value>, EvalError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(EvalError::TypeMismatch {
                func,
                expected: "list",
                found: other.type_name(),
            }),
        }
    }

    /// Convert to JSON, keeping scalar types
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Value::Str(s) => serde_json::Value::String(s),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Value::into_json).collect())
            }
        }
    }

    /// Convert from JSON; objects and null are carried as their JSON text
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Str(String::new()),
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(_) => Value::Str(value.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
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

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
