use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;

/// A raw value handed to (or received from) a transport primitive.
///
/// Structured transports (`postMessage`, extension runtime messaging,
/// `MessagePort`) carry `Structured` values directly. Text-only transports
/// accept `Text` and nothing else.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Structured(Value),
    Text(String),
}

impl WireMessage {
    /// Serialized size in bytes, as measured against a transport ceiling.
    pub fn byte_len(&self) -> usize {
        match self {
            WireMessage::Structured(value) => serde_json::to_vec(value)
                .map(|bytes| bytes.len())
                .unwrap_or(usize::MAX),
            WireMessage::Text(text) => text.len(),
        }
    }

    /// Short kind label for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Structured(_) => "structured value",
            WireMessage::Text(_) => "text",
        }
    }
}

/// What a transport primitive is able to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Structured-clone style values.
    Structured,
    /// Strings only; envelopes must be JSON-encoded with a tag prefix.
    TextOnly,
}

/// Event delivered to a transport's single receive listener.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Inbound traffic that passed origin/source validation.
    Message(WireMessage),
    /// The remote end is gone. Delivered at most once.
    Closed,
}

/// Receive callback installed with [`Transport::on_receive`].
pub type Listener = Box<dyn Fn(TransportEvent) + Send + Sync>;

/// Uniform adapter over one channel's send/receive primitive pair.
pub trait Transport: Send + Sync {
    /// Transport name for diagnostics.
    fn name(&self) -> &'static str;

    /// What this transport can carry.
    fn encoding(&self) -> Encoding;

    /// Hard per-message ceiling in bytes, if the host imposes one.
    fn max_message_size(&self) -> Option<usize>;

    /// Hand a value to the other end. Never blocks.
    fn send(&self, message: WireMessage) -> Result<()>;

    /// Install the one dispatcher for inbound traffic.
    ///
    /// Returns [`TransportError::ListenerAlreadyRegistered`](crate::TransportError::ListenerAlreadyRegistered)
    /// if called twice. Implementations that pump messages on a task must be
    /// called from within a Tokio runtime.
    fn on_receive(&self, listener: Listener) -> Result<()>;

    /// Tear down the local end. Idempotent.
    fn close(&self);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn encoding(&self) -> Encoding {
        (**self).encoding()
    }

    fn max_message_size(&self) -> Option<usize> {
        (**self).max_message_size()
    }

    fn send(&self, message: WireMessage) -> Result<()> {
        (**self).send(message)
    }

    fn on_receive(&self, listener: Listener) -> Result<()> {
        (**self).on_receive(listener)
    }

    fn close(&self) {
        (**self).close()
    }
}
