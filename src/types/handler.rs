//! Built-in type handlers.
//!
//! A handler converts an in-process [`Value`] into the representation a
//! driver binds (`to_parameter`) and a raw column value back
//! (`from_column`). `Null` passes through every built-in handler untouched.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ast::Value;
use crate::error::{ScriptError, ScriptResult};
use crate::types::{EnumType, JdbcType};

/// Which converter enum types receive by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumHandlerKind {
    #[default]
    Name,
    Ordinal,
}

pub trait TypeHandler: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn to_parameter(&self, value: &Value, jdbc_type: Option<JdbcType>) -> ScriptResult<Value>;

    fn from_column(&self, value: &Value) -> ScriptResult<Value>;
}

fn mismatch(handler: &str, value: &Value) -> ScriptError {
    ScriptError::evaluation(format!(
        "{} handler cannot convert {} value '{}'",
        handler,
        value.type_name(),
        value
    ))
}

#[derive(Debug)]
pub struct ObjectHandler;

impl TypeHandler for ObjectHandler {
    fn name(&self) -> &str {
        "object"
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        Ok(value.clone())
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        Ok(value.clone())
    }
}

#[derive(Debug)]
pub struct BooleanHandler;

impl BooleanHandler {
    fn convert(&self, value: &Value) -> ScriptResult<Value> {
        match value {
            Value::Null | Value::Bool(_) => Ok(value.clone()),
            Value::Int(n) => Ok(Value::Bool(*n != 0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "y" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "n" | "no" => Ok(Value::Bool(false)),
                _ => Err(mismatch(self.name(), value)),
            },
            _ => Err(mismatch(self.name(), value)),
        }
    }
}

impl TypeHandler for BooleanHandler {
    fn name(&self) -> &str {
        "boolean"
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        self.convert(value)
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        self.convert(value)
    }
}

/// Integral types, range-checked.
#[derive(Debug)]
pub struct IntegerHandler {
    name: &'static str,
    min: i64,
    max: i64,
}

impl IntegerHandler {
    pub const BYTE: Self = Self::new("byte", i8::MIN as i64, i8::MAX as i64);
    pub const SHORT: Self = Self::new("short", i16::MIN as i64, i16::MAX as i64);
    pub const INTEGER: Self = Self::new("integer", i32::MIN as i64, i32::MAX as i64);
    pub const LONG: Self = Self::new("long", i64::MIN, i64::MAX);

    const fn new(name: &'static str, min: i64, max: i64) -> Self {
        Self { name, min, max }
    }

    fn convert(&self, value: &Value) -> ScriptResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let n = match value {
            Value::Bool(b) => i64::from(*b),
            other => other.as_i64().ok_or_else(|| mismatch(self.name, other))?,
        };
        if n < self.min || n > self.max {
            return Err(ScriptError::evaluation(format!(
                "{} out of range for {}",
                n, self.name
            )));
        }
        Ok(Value::Int(n))
    }
}

impl TypeHandler for IntegerHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        self.convert(value)
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        self.convert(value)
    }
}

#[derive(Debug)]
pub struct FloatHandler {
    name: &'static str,
}

impl FloatHandler {
    pub const FLOAT: Self = Self { name: "float" };
    pub const DOUBLE: Self = Self { name: "double" };

    fn convert(&self, value: &Value) -> ScriptResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            other => other
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| mismatch(self.name, other)),
        }
    }
}

impl TypeHandler for FloatHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        self.convert(value)
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        self.convert(value)
    }
}

/// Exact numerics travel as their decimal text so no precision is lost.
#[derive(Debug)]
pub struct DecimalHandler;

impl DecimalHandler {
    fn convert(&self, value: &Value) -> ScriptResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Int(n) => Ok(Value::String(n.to_string())),
            Value::Float(n) if n.is_finite() => Ok(Value::String(n.to_string())),
            Value::String(s) if s.trim().parse::<f64>().is_ok() => {
                Ok(Value::String(s.trim().to_string()))
            }
            other => Err(mismatch(self.name(), other)),
        }
    }
}

impl TypeHandler for DecimalHandler {
    fn name(&self) -> &str {
        "decimal"
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        self.convert(value)
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        self.convert(value)
    }
}

/// Character data. Scalars are stringified; collections are rejected.
#[derive(Debug)]
pub struct StringHandler {
    name: &'static str,
}

impl StringHandler {
    pub const STRING: Self = Self { name: "string" };
    pub const CLOB: Self = Self { name: "clob" };
    pub const NSTRING: Self = Self { name: "nstring" };
    pub const NCLOB: Self = Self { name: "nclob" };
    pub const SQLXML: Self = Self { name: "sqlxml" };

    fn convert(&self, value: &Value) -> ScriptResult<Value> {
        match value {
            Value::Null | Value::String(_) => Ok(value.clone()),
            other if other.is_scalar() => Ok(Value::String(other.to_string())),
            other => Err(mismatch(self.name, other)),
        }
    }
}

impl TypeHandler for StringHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        self.convert(value)
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        self.convert(value)
    }
}

/// Binary data as a list of byte values. Strings bind as their UTF-8 bytes.
#[derive(Debug)]
pub struct BytesHandler {
    name: &'static str,
}

impl BytesHandler {
    pub const BYTES: Self = Self { name: "bytes" };
    pub const BLOB: Self = Self { name: "blob" };

    fn convert(&self, value: &Value) -> ScriptResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) => Ok(Value::List(
                s.bytes().map(|b| Value::Int(i64::from(b))).collect(),
            )),
            Value::List(items) => items
                .iter()
                .map(|item| match item.as_i64() {
                    Some(b) if (0..=255).contains(&b) => Ok(Value::Int(b)),
                    _ => Err(mismatch(self.name, item)),
                })
                .collect::<ScriptResult<Vec<_>>>()
                .map(Value::List),
            other => Err(mismatch(self.name, other)),
        }
    }
}

impl TypeHandler for BytesHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        self.convert(value)
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        self.convert(value)
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Temporal {
    Date,
    Time,
    Timestamp,
}

/// Dates and times, normalised to ISO text. Integers are epoch milliseconds.
#[derive(Debug)]
pub struct TemporalHandler {
    kind: Temporal,
}

impl TemporalHandler {
    pub const DATE: Self = Self {
        kind: Temporal::Date,
    };
    pub const TIME: Self = Self {
        kind: Temporal::Time,
    };
    pub const TIMESTAMP: Self = Self {
        kind: Temporal::Timestamp,
    };

    fn convert(&self, value: &Value) -> ScriptResult<Value> {
        let timestamp = match value {
            Value::Null => return Ok(Value::Null),
            Value::Int(millis) => DateTime::<Utc>::from_timestamp_millis(*millis).map(|t| t.naive_utc()),
            Value::String(s) => parse_temporal(s.trim(), self.kind),
            _ => None,
        };

        let Some(timestamp) = timestamp else {
            return Err(mismatch(self.name(), value));
        };
        let text = match self.kind {
            Temporal::Date => timestamp.format(DATE_FORMAT),
            Temporal::Time => timestamp.format(TIME_FORMAT),
            Temporal::Timestamp => timestamp.format(TIMESTAMP_FORMAT),
        };
        Ok(Value::String(text.to_string()))
    }
}

fn parse_temporal(text: &str, kind: Temporal) -> Option<NaiveDateTime> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", TIMESTAMP_FORMAT] {
        if let Ok(t) = NaiveDateTime::parse_from_str(text, format) {
            return Some(t);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, DATE_FORMAT) {
        return d.and_hms_opt(0, 0, 0);
    }
    if kind == Temporal::Time {
        if let Ok(t) = NaiveTime::parse_from_str(text, TIME_FORMAT) {
            return NaiveDate::from_ymd_opt(1970, 1, 1).map(|d| d.and_time(t));
        }
    }
    None
}

impl TypeHandler for TemporalHandler {
    fn name(&self) -> &str {
        match self.kind {
            Temporal::Date => "date",
            Temporal::Time => "time",
            Temporal::Timestamp => "timestamp",
        }
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        self.convert(value)
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        self.convert(value)
    }
}

/// Lists bind as arrays; each element is kept as is.
#[derive(Debug)]
pub struct ArrayHandler;

impl TypeHandler for ArrayHandler {
    fn name(&self) -> &str {
        "array"
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        match value {
            Value::Null | Value::List(_) => Ok(value.clone()),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        self.to_parameter(value, None)
    }
}

/// Enum values bound by variant name.
#[derive(Debug)]
pub struct EnumNameHandler {
    enum_type: Arc<EnumType>,
}

impl EnumNameHandler {
    pub fn new(enum_type: Arc<EnumType>) -> Self {
        Self { enum_type }
    }
}

impl TypeHandler for EnumNameHandler {
    fn name(&self) -> &str {
        "enum_name"
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) if self.enum_type.ordinal(s).is_some() => Ok(value.clone()),
            other => Err(unknown_variant(&self.enum_type, other)),
        }
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        self.to_parameter(value, None)
    }
}

/// Enum values bound by their position among the declared variants.
#[derive(Debug)]
pub struct EnumOrdinalHandler {
    enum_type: Arc<EnumType>,
}

impl EnumOrdinalHandler {
    pub fn new(enum_type: Arc<EnumType>) -> Self {
        Self { enum_type }
    }
}

impl TypeHandler for EnumOrdinalHandler {
    fn name(&self) -> &str {
        "enum_ordinal"
    }

    fn to_parameter(&self, value: &Value, _: Option<JdbcType>) -> ScriptResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) => self
                .enum_type
                .ordinal(s)
                .map(Value::from)
                .ok_or_else(|| unknown_variant(&self.enum_type, value)),
            other => Err(unknown_variant(&self.enum_type, other)),
        }
    }

    fn from_column(&self, value: &Value) -> ScriptResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            other => other
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .and_then(|n| self.enum_type.variants.get(n))
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| unknown_variant(&self.enum_type, other)),
        }
    }
}

fn unknown_variant(enum_type: &EnumType, value: &Value) -> ScriptError {
    ScriptError::evaluation(format!(
        "'{}' is not a variant of {} (expected one of: {})",
        value,
        enum_type.name,
        enum_type.variants.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_range() {
        let byte = IntegerHandler::BYTE;
        assert_eq!(byte.to_parameter(&Value::from("12"), None).unwrap(), Value::Int(12));
        assert!(byte.to_parameter(&Value::Int(300), None).is_err());
        assert_eq!(byte.to_parameter(&Value::Null, None).unwrap(), Value::Null);
    }

    #[test]
    fn test_string_stringifies_scalars() {
        let handler = StringHandler::STRING;
        assert_eq!(
            handler.to_parameter(&Value::Int(7), None).unwrap(),
            Value::from("7")
        );
        assert!(handler.to_parameter(&Value::List(vec![]), None).is_err());
    }

    #[test]
    fn test_timestamp_normalises() {
        let handler = TemporalHandler::TIMESTAMP;
        assert_eq!(
            handler
                .to_parameter(&Value::from("2024-03-01T10:15:00Z"), None)
                .unwrap(),
            Value::from("2024-03-01 10:15:00")
        );
        assert_eq!(
            handler.to_parameter(&Value::Int(0), None).unwrap(),
            Value::from("1970-01-01 00:00:00")
        );
    }

    #[test]
    fn test_date_from_timestamp_text() {
        let handler = TemporalHandler::DATE;
        assert_eq!(
            handler
                .to_parameter(&Value::from("2024-03-01 23:59:59"), None)
                .unwrap(),
            Value::from("2024-03-01")
        );
        assert!(handler.to_parameter(&Value::from("yesterday"), None).is_err());
    }

    #[test]
    fn test_enum_handlers() {
        let status = Arc::new(EnumType::new(
            "Status",
            vec!["ACTIVE".to_string(), "CLOSED".to_string()],
        ));
        let by_name = EnumNameHandler::new(status.clone());
        let by_ordinal = EnumOrdinalHandler::new(status);

        assert_eq!(
            by_name.to_parameter(&Value::from("CLOSED"), None).unwrap(),
            Value::from("CLOSED")
        );
        assert!(by_name.to_parameter(&Value::from("OPEN"), None).is_err());
        assert_eq!(
            by_ordinal.to_parameter(&Value::from("CLOSED"), None).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            by_ordinal.from_column(&Value::Int(0)).unwrap(),
            Value::from("ACTIVE")
        );
    }

    #[test]
    fn test_bytes_from_string() {
        let handler = BytesHandler::BYTES;
        assert_eq!(
            handler.to_parameter(&Value::from("hi"), None).unwrap(),
            Value::List(vec![Value::Int(104), Value::Int(105)])
        );
    }
}
