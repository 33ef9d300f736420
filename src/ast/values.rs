use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ast::path::PathSegment;
use crate::error::{ScriptError, ScriptResult};
use crate::types::ValueType;

pub(crate) static NULL: Value = Value::Null;

/// A dynamic value: a parameter object, a bound variable, or the result of
/// evaluating an expression.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Convert any serializable value (structs, maps, scalars).
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> ScriptResult<Self> {
        serde_json::to_value(value)
            .map(Value::from)
            .map_err(|e| ScriptError::evaluation(format!("cannot convert parameter: {}", e)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Scalars are everything that has no properties of its own.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Null | Value::List(_) | Value::Map(_))
    }

    /// Conditional truthiness used by `if` and `when`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
        }
    }

    /// Runtime type, used when a placeholder's type comes from a binding.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Object,
            Value::Bool(_) => ValueType::Boolean,
            Value::Int(_) => ValueType::Long,
            Value::Float(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(n) if n.fract() == 0.0 => Some(*n as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Property access. A missing key in a map reads as `Null`; anything
    /// without properties yields `None`.
    pub fn property(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => Some(entries.get(name).unwrap_or(&NULL)),
            _ => None,
        }
    }

    /// Index access: list position or map key.
    pub fn index(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::List(items) => {
                let pos = usize::try_from(key.as_i64()?).ok()?;
                items.get(pos)
            }
            Value::Map(entries) => {
                let key = match key {
                    Value::String(s) => s.clone(),
                    other if other.is_scalar() => other.to_string(),
                    _ => return None,
                };
                Some(entries.get(&key).unwrap_or(&NULL))
            }
            _ => None,
        }
    }

    /// Walk a parsed property path.
    pub fn select(&self, segments: &[PathSegment]) -> Option<&Value> {
        let mut current = self;
        for segment in segments {
            current = match segment {
                PathSegment::Property(name) => current.property(name)?,
                PathSegment::Index(key) => {
                    let key = key.trim_matches(|c| c == '\'' || c == '"');
                    match current {
                        Value::List(_) => current.index(&Value::Int(key.parse().ok()?))?,
                        _ => current.index(&Value::String(key.to_string()))?,
                    }
                }
            };
        }
        Some(current)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Value::from(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::Float(0.5).is_truthy());
    }

    #[test]
    fn test_from_json_keeps_integers() {
        let v = Value::from(json!({"id": 7, "ratio": 0.5, "tags": ["a"]}));
        assert_eq!(v.property("id"), Some(&Value::Int(7)));
        assert_eq!(v.property("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(v.property("missing"), Some(&Value::Null));
    }

    #[test]
    fn test_select_path() {
        let v = Value::from(json!({"orders": [{"item": {"name": "pen"}}]}));
        let path = crate::ast::path::PropertyPath::parse("orders[0].item.name");
        assert_eq!(v.select(path.segments()), Some(&Value::from("pen")));

        let bad = crate::ast::path::PropertyPath::parse("orders.item");
        assert_eq!(v.select(bad.segments()), None);
    }

    #[test]
    fn test_display() {
        let v = Value::from(json!([1, "a", null]));
        assert_eq!(v.to_string(), "[1, a, null]");
    }
}
