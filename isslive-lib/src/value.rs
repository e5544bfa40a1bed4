use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Semantic type a channel's raw text is coerced to when read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Float,
    Integer,
    Boolean,
    String,
    /// Integer code decoded through the channel's decode table.
    Status,
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Kind::Float => "float",
            Kind::Integer => "integer",
            Kind::Boolean => "boolean",
            Kind::String => "string",
            Kind::Status => "status",
        };
        f.write_str(s)
    }
}

/// A decoded channel value.
///
/// Reads never fail on malformed data. When the raw text cannot be coerced to the channel's
/// [Kind], or a status code has no entry in its decode table, the text is handed back
/// unchanged as [Value::Raw] so the caller can still see what upstream sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    /// Display string from a decode table.
    Status(String),
    /// Raw text exactly as received.
    Raw(String),
}

impl Value {
    /// Best-effort coercion of `raw` to `kind`.
    ///
    /// [Kind::Status] has no meaning without a decode table, so it passes through as
    /// [Value::Raw] here; see [crate::decode::DecodeTable::decode].
    #[must_use]
    pub fn coerce(kind: Kind, raw: &str) -> Value {
        let coerced = match kind {
            Kind::Float => parse_float(raw).map(Value::Float),
            Kind::Integer => parse_integer(raw).map(Value::Integer),
            Kind::Boolean => parse_bool(raw).map(Value::Boolean),
            Kind::String | Kind::Status => None,
        };
        coerced.unwrap_or_else(|| Value::Raw(raw.to_string()))
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Text of a [Value::Status] or [Value::Raw].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Status(s) | Value::Raw(s) => Some(s),
            _ => None,
        }
    }

    /// True if this value is upstream text that was not coerced or decoded.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, Value::Raw(_))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Status(s) | Value::Raw(s) => f.write_str(s),
        }
    }
}

/// Conversion out of a [Value] for typed reads.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Option<Self> {
        Some(match value {
            Value::Status(s) | Value::Raw(s) => s,
            other => other.to_string(),
        })
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

/// Parse integer text, also accepting integral float text such as `"3.0"`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn parse_integer(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    let v = raw.parse::<f64>().ok()?;
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("true") {
        return Some(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Some(false);
    }
    parse_integer(raw).map(|v| v != 0)
}
