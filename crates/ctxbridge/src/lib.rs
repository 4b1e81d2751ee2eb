//! Request/response messaging between isolated execution contexts.
//!
//! ctxbridge turns a one-way, fire-and-forget message primitive (extension
//! runtime messaging, window posting, a native-bridge byte stream) into
//! correlated calls with timeouts, error marshaling and restart handling.
//!
//! # Crate Structure
//!
//! - [`transport`]: the transport abstraction, memory and Unix socket endpoints
//! - [`frame`]: length-prefixed framing for byte-stream transports
//! - [`envelope`]: envelope encoding, response tagging and chunking
//! - [`peer`]: channels, correlation, dispatch, hooks and liveness
//! - [`bridge`]: built-in handlers served by a native bridge host

pub mod bridge;

/// Re-export transport types.
pub mod transport {
    pub use ctxbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ctxbridge_frame::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use ctxbridge_envelope::*;
}

/// Re-export peer types.
pub mod peer {
    pub use ctxbridge_peer::*;
}

pub use ctxbridge_peer::{Channel, ChannelBuilder, Client, PeerError, Result};
