//! Setting values and their kinds.
//!
//! A setting's kind is fixed by its default. Values coming from disk or from
//! callers are conformed to that kind with a small set of aliases: integers
//! stand in for floats, and floats with no fractional part stand in for
//! integers. Anything else is a mismatch.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    List,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Text => "str",
            ValueKind::List => "list",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a JSON value's type, for log lines and errors.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot cast {found} value {value} to {expected}")]
pub struct CastError {
    pub found: &'static str,
    pub expected: ValueKind,
    pub value: String,
}

impl CastError {
    fn new(raw: &Value, expected: ValueKind) -> Self {
        Self {
            found: json_type_name(raw),
            expected,
            value: raw.to_string(),
        }
    }
}

impl SettingValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            SettingValue::Bool(_) => ValueKind::Bool,
            SettingValue::Int(_) => ValueKind::Int,
            SettingValue::Float(_) => ValueKind::Float,
            SettingValue::Text(_) => ValueKind::Text,
            SettingValue::List(_) => ValueKind::List,
        }
    }

    /// The natural reading of a JSON value, with no expected kind.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(SettingValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(SettingValue::Int(i)),
                None => n.as_f64().map(SettingValue::Float),
            },
            Value::String(s) => Some(SettingValue::Text(s.clone())),
            Value::Array(items) => string_list(items).map(SettingValue::List),
            Value::Null | Value::Object(_) => None,
        }
    }

    /// Read a JSON value as `kind`, applying only the numeric aliases.
    pub fn conform(value: &Value, kind: ValueKind) -> Option<Self> {
        SettingValue::from_json(value)?.conform_to(kind)
    }

    /// This value as `kind`, applying only the numeric aliases.
    pub fn conform_to(self, kind: ValueKind) -> Option<Self> {
        match (self, kind) {
            (v, k) if v.kind() == k => Some(v),
            (SettingValue::Int(i), ValueKind::Float) => Some(SettingValue::Float(i as f64)),
            (SettingValue::Float(f), ValueKind::Int) => integral(f).map(SettingValue::Int),
            _ => None,
        }
    }

    /// Coerce an arbitrary raw value to `kind`.
    ///
    /// The text `"False"` is `false` for boolean settings before anything else
    /// is tried; older settings files wrote booleans that way.
    pub fn cast(raw: &Value, kind: ValueKind) -> Result<Self, CastError> {
        if kind == ValueKind::Bool && raw.as_str() == Some("False") {
            return Ok(SettingValue::Bool(false));
        }
        if let Some(value) = SettingValue::conform(raw, kind) {
            return Ok(value);
        }

        let fail = || CastError::new(raw, kind);
        match (kind, raw) {
            (ValueKind::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(SettingValue::Bool(true)),
                "false" | "0" | "no" | "off" | "" => Ok(SettingValue::Bool(false)),
                _ => Err(fail()),
            },
            (ValueKind::Bool, Value::Number(n)) => n
                .as_f64()
                .map(|f| SettingValue::Bool(f != 0.0))
                .ok_or_else(fail),
            (ValueKind::Int, Value::String(s)) => {
                s.trim().parse::<i64>().map(SettingValue::Int).map_err(|_| fail())
            }
            (ValueKind::Int, Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| SettingValue::Int(f.trunc() as i64))
                .ok_or_else(fail),
            (ValueKind::Int, Value::Bool(b)) => Ok(SettingValue::Int(i64::from(*b))),
            (ValueKind::Float, Value::String(s)) => {
                s.trim().parse::<f64>().map(SettingValue::Float).map_err(|_| fail())
            }
            (ValueKind::Float, Value::Bool(b)) => Ok(SettingValue::Float(if *b { 1.0 } else { 0.0 })),
            (ValueKind::Text, Value::Number(n)) => Ok(SettingValue::Text(n.to_string())),
            (ValueKind::Text, Value::Bool(b)) => Ok(SettingValue::Text(b.to_string())),
            (ValueKind::List, Value::String(s)) => Ok(SettingValue::List(split_list(s))),
            (ValueKind::List, Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(SettingValue::List)
                .ok_or_else(fail),
            _ => Err(fail()),
        }
    }

    /// JSON form for persistence. Non-finite floats have no JSON number form
    /// and are written as text.
    pub fn to_json(&self) -> Value {
        match self {
            SettingValue::Bool(b) => Value::Bool(*b),
            SettingValue::Int(i) => Value::Number((*i).into()),
            SettingValue::Float(f) => match Number::from_f64(*f) {
                Some(n) => Value::Number(n),
                None => {
                    tracing::error!(value = %f, "Save: not a valid JSON number, writing as text");
                    Value::String(f.to_string())
                }
            },
            SettingValue::Text(s) => Value::String(s.clone()),
            SettingValue::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        }
    }

    /// Equality used when diffing against defaults: lists compare as sets.
    pub fn equivalent(&self, other: &SettingValue) -> bool {
        match (self, other) {
            (SettingValue::List(a), SettingValue::List(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
            }
            (a, b) => a == b,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            SettingValue::Float(f) => Some(*f),
            SettingValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            SettingValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Int(i) => write!(f, "{}", i),
            SettingValue::Float(x) => write!(f, "{}", x),
            SettingValue::Text(s) => write!(f, "{:?}", s),
            SettingValue::List(items) => write!(f, "{:?}", items),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<i32> for SettingValue {
    fn from(v: i32) -> Self {
        SettingValue::Int(v.into())
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Float(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Text(v)
    }
}

impl From<Vec<String>> for SettingValue {
    fn from(v: Vec<String>) -> Self {
        SettingValue::List(v)
    }
}

impl From<Vec<&str>> for SettingValue {
    fn from(v: Vec<&str>) -> Self {
        SettingValue::List(v.into_iter().map(str::to_string).collect())
    }
}

/// `"a, b,,c"` → `["a", "b", "c"]`
pub fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn string_list(items: &[Value]) -> Option<Vec<String>> {
    items.iter().map(|v| v.as_str().map(str::to_string)).collect()
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
