use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::channel::Channel;
use crate::error::Result;

/// Calls into one remote namespace, e.g. `Math` for `Math.add`.
///
/// Holds a channel handle; no global state is involved.
#[derive(Debug, Clone)]
pub struct Client {
    channel: Channel,
    namespace: String,
}

impl Client {
    pub(crate) fn new(channel: Channel, namespace: impl Into<String>) -> Self {
        Self {
            channel,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    fn qualify(&self, method: &str) -> String {
        if self.namespace.is_empty() {
            method.to_string()
        } else {
            format!("{}.{method}", self.namespace)
        }
    }

    /// Call `<namespace>.<method>`.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.channel.call(&self.qualify(method), args).await
    }

    /// Call and deserialize the result.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T> {
        let value = self.call(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call with serializable arguments. A value serializing to an array
    /// (tuples, vectors) is spread into the argument list; anything else is
    /// passed as the single argument.
    pub async fn call_typed<A, T>(&self, method: &str, args: A) -> Result<T>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let args = match serde_json::to_value(args)? {
            Value::Array(items) => items,
            single => vec![single],
        };
        self.call_as(method, args).await
    }

    /// Fire-and-forget `<namespace>.<method>`.
    pub async fn notify(&self, method: &str, args: Vec<Value>) -> Result<()> {
        self.channel.notify(&self.qualify(method), args).await
    }
}
