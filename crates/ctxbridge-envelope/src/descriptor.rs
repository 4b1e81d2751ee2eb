use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{EnvelopeError, Result};

/// Structural copy of a thrown error: `name`, `message`, `stack`, plus every
/// custom field the error carried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    #[serde(default, deserialize_with = "string_or_null")]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub message: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub stack: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn string_or_null<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

impl ErrorDescriptor {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Parse the second element of an `["error", ..]` pair.
    ///
    /// Accepts the descriptor as an object or as a JSON-encoded string.
    /// A string that is not JSON becomes the message of a plain `Error`.
    pub fn from_wire(value: Value) -> Result<Self> {
        match value {
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(parsed @ Value::Object(_)) => Ok(serde_json::from_value(parsed)?),
                _ => Ok(Self::new("Error", text)),
            },
            other => Err(EnvelopeError::Malformed(format!(
                "error descriptor must be an object or string, got {other}"
            ))),
        }
    }
}
