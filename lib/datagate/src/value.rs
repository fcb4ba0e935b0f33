//! Column values and the converters between their in-memory, wire and
//! request-parameter forms.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde_json::Value as JsonValue;

use crate::ConversionError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// The in-memory representation of one column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
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
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Short name of the variant, used in type-mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Bool(_) => "boolean",
            Value::Date(_) => "date",
        }
    }

    /// Compare two values.
    ///
    /// `Null` sorts before everything else and equals itself. Integers and
    /// floats compare numerically; any other mix of variants is unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Untyped conversion from the wire form.
    pub fn from_json(json: &JsonValue) -> Result<Value, ConversionError> {
        match json {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| ConversionError(format!("unsupported number {n}"))),
            },
            other => Err(ConversionError(format!("unsupported value {other}"))),
        }
    }

    /// Untyped conversion to the wire form.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Int(n) => JsonValue::from(*n),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Date(d) => JsonValue::String(d.format(DATE_FORMAT).to_string()),
        }
    }

    /// Untyped request-parameter form.
    pub fn to_input(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
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

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Bidirectional mapping between [`Value`] and the storage/wire
/// representation (`serde_json::Value`) and the request-parameter string
/// form of a column.
///
/// `null` is handled by the caller; converters only see non-null values.
pub trait ValueConverter: Send + Sync + fmt::Debug {
    fn to_json(&self, value: &Value) -> JsonValue {
        value.to_json()
    }

    fn from_json(&self, json: &JsonValue) -> Result<Value, ConversionError>;

    fn to_input(&self, value: &Value) -> String {
        value.to_input()
    }

    fn from_input(&self, input: &str) -> Result<Value, ConversionError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringConverter;

impl ValueConverter for StringConverter {
    fn from_json(&self, json: &JsonValue) -> Result<Value, ConversionError> {
        match json {
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Number(n) => Ok(Value::String(n.to_string())),
            JsonValue::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(ConversionError(format!("expected a string, got {other}"))),
        }
    }

    fn from_input(&self, input: &str) -> Result<Value, ConversionError> {
        Ok(Value::String(input.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerConverter;

impl ValueConverter for IntegerConverter {
    fn from_json(&self, json: &JsonValue) -> Result<Value, ConversionError> {
        match json {
            JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Ok(Value::Int(i)),
                (None, Some(f)) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
                _ => Err(ConversionError(format!("expected an integer, got {n}"))),
            },
            JsonValue::String(s) => self.from_input(s),
            other => Err(ConversionError(format!("expected an integer, got {other}"))),
        }
    }

    fn from_input(&self, input: &str) -> Result<Value, ConversionError> {
        input
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ConversionError(format!("'{input}' is not an integer")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FloatConverter;

impl ValueConverter for FloatConverter {
    fn from_json(&self, json: &JsonValue) -> Result<Value, ConversionError> {
        match json {
            JsonValue::Number(n) => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| ConversionError(format!("expected a number, got {n}"))),
            JsonValue::String(s) => self.from_input(s),
            other => Err(ConversionError(format!("expected a number, got {other}"))),
        }
    }

    fn from_input(&self, input: &str) -> Result<Value, ConversionError> {
        input
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| ConversionError(format!("'{input}' is not a number")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanConverter;

impl ValueConverter for BooleanConverter {
    fn from_json(&self, json: &JsonValue) -> Result<Value, ConversionError> {
        match json {
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::String(s) => self.from_input(s),
            other => Err(ConversionError(format!("expected a boolean, got {other}"))),
        }
    }

    fn from_input(&self, input: &str) -> Result<Value, ConversionError> {
        match input.trim() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            other => Err(ConversionError(format!("'{other}' is not a boolean"))),
        }
    }
}

/// Date-only values stored as `YYYY-MM-DD`.
///
/// RFC 3339 date-times are accepted on input and truncated to their date.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateConverter;

impl ValueConverter for DateConverter {
    fn from_json(&self, json: &JsonValue) -> Result<Value, ConversionError> {
        match json {
            JsonValue::String(s) => self.from_input(s),
            other => Err(ConversionError(format!("expected a date string, got {other}"))),
        }
    }

    fn from_input(&self, input: &str) -> Result<Value, ConversionError> {
        let input = input.trim();
        if let Ok(date) = NaiveDate::parse_from_str(input, DATE_FORMAT) {
            return Ok(Value::Date(date));
        }
        DateTime::parse_from_rfc3339(input)
            .map(|dt| Value::Date(dt.date_naive()))
            .map_err(|_| ConversionError(format!("'{input}' is not a date")))
    }
}
