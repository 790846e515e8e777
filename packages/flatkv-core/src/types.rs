use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Generic runtime value stored against a key.
///
/// Covers JSON-compatible types plus binary data. The store itself is
/// generic over its value type; `Value` is the concrete type used by the
/// command-line front end and the worker roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent / null marker.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// String-keyed map. `BTreeMap` keeps serialization order deterministic.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Parses a scalar literal as typed on a command line.
    ///
    /// `null`, `true` and `false` map to their variants, integers to
    /// [`Value::Int`], finite floats to [`Value::Float`]. Text wrapped in one
    /// pair of double quotes is taken verbatim as a string (so `"true"` is the
    /// string, not the flag). Everything else is a [`Value::String`].
    #[must_use]
    pub fn parse_literal(raw: &str) -> Self {
        match raw {
            "null" => return Self::Null,
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }

        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            return Self::String(raw[1..raw.len() - 1].to_string());
        }
        if let Ok(int) = raw.parse::<i64>() {
            return Self::Int(int);
        }
        if let Ok(float) = raw.parse::<f64>() {
            if float.is_finite() {
                return Self::Float(float);
            }
        }
        Self::String(raw.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Renders scalars in the form accepted by [`Value::parse_literal`].
///
/// Strings that would otherwise read back as another variant are quoted.
/// Arrays, maps and bytes render for humans only and do not parse back.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::String(s) => {
                if Self::parse_literal(s) == Self::String(s.clone()) {
                    f.write_str(s)
                } else {
                    write!(f, "\"{s}\"")
                }
            }
            Self::Bytes(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}
