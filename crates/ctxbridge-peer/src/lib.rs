//! Request/response channels between isolated contexts.
//!
//! Builds call semantics on top of a [`ctxbridge_transport::Transport`]:
//! - [`correlation`]: pending calls keyed by correlation id, settled exactly once
//! - [`registry`]: dotted `Namespace.method` names mapped to local handlers
//! - [`transform`]: per-message hooks on both sides of a call
//! - [`marshal`]: handler failures flattened for the wire and rebuilt for the caller
//! - [`handshake`]: link state, the ready handshake and restart detection
//! - [`channel`]: the [`Channel`] tying it together, with the large-payload path
//! - [`client`]: namespace-scoped calls
//! - [`retry`]: backoff policy composed around calls
//!
//! # Example
//!
//! ```no_run
//! use ctxbridge_peer::{sync_handler, Channel};
//! use ctxbridge_transport::memory::pair;
//! use ctxbridge_transport::MemoryConfig;
//! use serde_json::json;
//!
//! # async fn example() -> ctxbridge_peer::Result<()> {
//! let (page, background) = pair(MemoryConfig::default(), MemoryConfig::default());
//!
//! let host = Channel::builder(background).handler(
//!     "Math.add",
//!     sync_handler(|args| Ok(json!(args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0)))),
//! );
//! let (host, page) = tokio::join!(host.connect(), Channel::builder(page).connect());
//! let (_host, page) = (host?, page?);
//!
//! assert_eq!(page.call("Math.add", vec![json!(2), json!(3)]).await?, json!(5));
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod control;
pub mod correlation;
pub mod error;
pub mod handshake;
mod large;
pub mod marshal;
pub mod registry;
pub mod retry;
pub mod transform;

pub use channel::{Channel, ChannelBuilder};
pub use client::Client;
pub use config::{CallOptions, CallTimeout, ChannelConfig, HandlerConfig};
pub use control::{ReadySignal, PROTOCOL_NAME};
pub use correlation::{CorrelationTable, ReplaySpec, ReplayableCall};
pub use error::{PeerError, Result};
pub use handshake::LinkState;
pub use marshal::{marshal, unmarshal, HandlerError, RemoteError};
pub use registry::{sync_handler, DispatchRegistry, Dispatched, Handler, Registration};
pub use retry::{is_transient, retry, RetryPolicy};
pub use transform::{args_hook, value_hook, ArgsHook, CallHooks, HandlerHooks, ValueHook};
