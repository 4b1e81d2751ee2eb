//! Uniform transport adapters for cross-context messaging.
//!
//! Every channel between two contexts rests on a one-way "send a value to the
//! other side" primitive. This crate wraps those primitives behind a single
//! [`Transport`] trait:
//! - [`memory`]: in-process endpoints (structured or text-only, optional size ceiling)
//! - [`uds`]: Unix domain socket listener/connector for native bridges (Unix only)
//!
//! This is the lowest layer of ctxbridge. Framing, envelopes and request/response
//! semantics all build on top of it.

pub mod error;
pub mod memory;
pub mod origin;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::{MemoryConfig, MemoryTransport};
pub use origin::{Inbound, OriginPolicy, SourceId};
pub use traits::{Encoding, Listener, Transport, TransportEvent, WireMessage};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
