//! Length-prefixed framing for byte-stream transports.
//!
//! Native bridges (a host process talking to the browser over a pipe or a
//! Unix socket) carry bytes, not values. Every message is framed with:
//! - A 2-byte magic number ("CX") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian lane ID for multiplexing
//!
//! [`FramedTransport`] turns such a stream into a [`ctxbridge_transport::Transport`].

pub mod codec;
pub mod error;
pub mod stream;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameCodec, DEFAULT_LANE, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use stream::{FramedTransport, StreamConfig};
