//! Cache Key Module
//!
//! Defines the key type accepted by the cache and its normalization into a
//! canonical identifier.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, Result};

// == Cache Key ==
/// A caller-supplied cache key.
///
/// Literal keys are used verbatim as identifiers. Structured keys are
/// normalized to canonical JSON with object fields sorted, so two values with
/// the same fields in a different order address the same entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheKey {
    /// Plain string key
    Literal(String),
    /// Composite key
    Structured(Value),
}

impl CacheKey {
    /// Builds a structured key from any serializable value.
    ///
    /// Fails with `InvalidKey` if the value cannot be represented as JSON
    /// (for example a map with non-string keys).
    pub fn structured<T>(value: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_value(value)
            .map(CacheKey::Structured)
            .map_err(|e| CacheError::InvalidKey(e.to_string()))
    }

    /// Returns the structured form, or None for literal keys.
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            CacheKey::Literal(_) => None,
            CacheKey::Structured(value) => Some(value),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        CacheKey::Literal(key.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        CacheKey::Literal(key)
    }
}

impl From<&String> for CacheKey {
    fn from(key: &String) -> Self {
        CacheKey::Literal(key.clone())
    }
}

impl From<Value> for CacheKey {
    fn from(value: Value) -> Self {
        CacheKey::Structured(value)
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(key: &CacheKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Literal(key) => f.write_str(key),
            CacheKey::Structured(value) => write!(f, "{value}"),
        }
    }
}

// == Key Struct ==
/// Result of normalizing a key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyStruct {
    /// Canonical identifier used for lookup
    pub identifier: String,
    /// Structured form of the key, None for literal keys
    pub structured: Option<Value>,
}

// == Normalize ==
/// Converts a key into its canonical identifier.
///
/// Whole-valued floats are written as integers, so `1.0` and `1` normalize
/// to the same identifier.
///
/// Fails with `InvalidKey` for a null structured key.
pub fn normalize(key: &CacheKey) -> Result<KeyStruct> {
    match key {
        CacheKey::Literal(key) => Ok(KeyStruct {
            identifier: key.clone(),
            structured: None,
        }),
        CacheKey::Structured(Value::Null) => {
            Err(CacheError::InvalidKey("key cannot be null".to_string()))
        }
        CacheKey::Structured(value) => {
            let mut identifier = String::new();
            write_canonical(value, &mut identifier)?;
            Ok(KeyStruct {
                identifier,
                structured: Some(value.clone()),
            })
        }
    }
}

/// Largest magnitude below which every whole float is an exact integer
const MAX_EXACT_FLOAT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Writes `value` as compact JSON with object fields in sorted order.
fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (name, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&to_json(name)?);
                out.push(':');
                write_canonical(field, out)?;
            }
            out.push('}');
        }
        Value::Number(number) => match number.as_f64().filter(|_| number.is_f64()) {
            // 1.0 and 1 address the same entry
            Some(float) if float.fract() == 0.0 && float.abs() < MAX_EXACT_FLOAT_INTEGER => {
                out.push_str(&(float as i64).to_string())
            }
            _ => out.push_str(&number.to_string()),
        },
        scalar => out.push_str(&to_json(scalar)?),
    }
    Ok(())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CacheError::InvalidKey(e.to_string()))
}
