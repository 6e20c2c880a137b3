//! Read/write value filters applied between backend rows and instances.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// A reversible conversion attached to one property.
///
/// `read` runs when backend data is copied into an instance, `write`
/// when an instance is projected back into a row. NULL passes through
/// both directions untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueFilter {
    /// Text column holding a JSON document.
    Json,
    /// Integer column (0/1) exposed as a boolean.
    Bool,
    /// Comma-separated text exposed as an array of text values.
    Csv,
}

impl ValueFilter {
    /// Convert a backend value into its instance representation.
    pub fn read(self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }
        match self {
            ValueFilter::Json => match value {
                Value::Text(text) => Ok(Value::Json(serde_json::from_str(&text)?)),
                other => Ok(other),
            },
            ValueFilter::Bool => value.as_bool().map(Value::Bool).ok_or_else(|| {
                Error::Serialization(format!("cannot read {} as bool", value.type_name()))
            }),
            ValueFilter::Csv => match value {
                Value::Text(text) if text.is_empty() => Ok(Value::Array(Vec::new())),
                Value::Text(text) => Ok(Value::Array(
                    text.split(',').map(|part| Value::Text(part.to_string())).collect(),
                )),
                other => Ok(other),
            },
        }
    }

    /// Convert an instance value into its backend representation.
    pub fn write(self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }
        match self {
            ValueFilter::Json => match value {
                Value::Json(doc) => Ok(Value::Text(serde_json::to_string(&doc)?)),
                Value::Array(items) => Ok(Value::Text(serde_json::to_string(&items)?)),
                other => Ok(other),
            },
            ValueFilter::Bool => value
                .as_bool()
                .map(|b| Value::Int(i64::from(b)))
                .ok_or_else(|| {
                    Error::Serialization(format!("cannot write {} as bool", value.type_name()))
                }),
            ValueFilter::Csv => match value {
                Value::Array(items) => {
                    let parts: Vec<String> = items
                        .iter()
                        .map(|item| match item {
                            Value::Text(s) => s.clone(),
                            other => other.key_fragment().unwrap_or_default(),
                        })
                        .collect();
                    Ok(Value::Text(parts.join(",")))
                }
                other => Ok(other),
            },
        }
    }
}
