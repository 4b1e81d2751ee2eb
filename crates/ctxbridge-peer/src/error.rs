use std::time::Duration;

use crate::marshal::RemoteError;

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ctxbridge_transport::TransportError),

    /// Envelope-level error.
    #[error("envelope error: {0}")]
    Envelope(#[from] ctxbridge_envelope::EnvelopeError),

    /// The remote endpoint answered the handshake with something unusable.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// No ready signal arrived within the handshake window.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// No response arrived within the call's timeout.
    #[error("call {name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    /// The channel was torn down, or the remote end is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// The remote endpoint restarted while the call was pending.
    #[error("remote endpoint restarted before {name} completed")]
    Reconnected { name: String },

    /// The remote handler failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A caller-side transform hook failed.
    #[error("transform for {name} failed: {message}")]
    Transform { name: String, message: String },

    /// The name is reserved for channel control messages.
    #[error("{0} is reserved for channel control messages")]
    ReservedName(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PeerError {
    /// The remote handler's error, if that is what this is.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            PeerError::Remote(remote) => Some(remote),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
