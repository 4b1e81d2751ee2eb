//! Error marshaling across the channel boundary.
//!
//! Handlers fail with a [`HandlerError`]; it is flattened into an
//! [`ErrorDescriptor`] for the wire and rebuilt on the caller side as a
//! [`RemoteError`] carrying the same name, message, stack and custom fields.

use std::any::Any;
use std::fmt;

use ctxbridge_envelope::ErrorDescriptor;
use serde_json::{Map, Value};

/// A failure raised by a local handler or handler-side transform hook.
///
/// Any `std::error::Error` converts into it, so handlers can use `?`.
#[derive(Clone, PartialEq)]
pub struct HandlerError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub fields: Map<String, Value>,
}

impl HandlerError {
    /// A plain `Error` with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            fields: Map::new(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attach a custom field that travels with the error.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Re-raise a remote failure locally, keeping every field.
    pub fn relay(remote: &RemoteError) -> Self {
        Self {
            name: remote.name.clone(),
            message: remote.message.clone(),
            stack: Some(remote.stack.clone()),
            fields: remote.fields.clone(),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::named("Panic", message)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("name", &self.name)
            .field("message", &self.message)
            .field("stack", &self.stack)
            .field("fields", &self.fields)
            .finish()
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let mut stack = format!("Error: {err}");
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push_str(&format!("\n    caused by: {cause}"));
            source = cause.source();
        }
        Self {
            name: "Error".to_string(),
            message: err.to_string(),
            stack: Some(stack),
            fields: Map::new(),
        }
    }
}

/// Flatten a handler failure for the wire.
///
/// A missing stack is synthesized from the name, message and the method
/// that failed, so the caller always receives one.
pub fn marshal(err: HandlerError, method: &str) -> ErrorDescriptor {
    let stack = err
        .stack
        .unwrap_or_else(|| format!("{}: {}\n    at {method}", err.name, err.message));
    ErrorDescriptor {
        name: err.name,
        message: err.message,
        stack,
        fields: err.fields,
    }
}

/// A failure reported by the remote handler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    pub stack: String,
    pub fields: Map<String, Value>,
}

impl RemoteError {
    /// A custom field copied from the original error.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Back to wire form.
    pub fn to_descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor {
            name: self.name.clone(),
            message: self.message.clone(),
            stack: self.stack.clone(),
            fields: self.fields.clone(),
        }
    }
}

/// Rebuild a caller-side error from a descriptor.
pub fn unmarshal(desc: ErrorDescriptor) -> RemoteError {
    let name = if desc.name.is_empty() {
        "Error".to_string()
    } else {
        desc.name
    };
    let stack = if desc.stack.is_empty() {
        format!("{name}: {}", desc.message)
    } else {
        desc.stack
    };
    RemoteError {
        name,
        message: desc.message,
        stack,
        fields: desc.fields,
    }
}
