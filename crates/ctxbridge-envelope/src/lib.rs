//! Envelope codec for ctxbridge channels.
//!
//! An envelope is the routing wrapper around one call or one reply:
//! - request: `[id | null, name, payload[]]`
//! - response: `[id, tagged]`, where a failure is tagged `["error", descriptor]`
//!
//! [`EnvelopeCodec`] wraps envelopes under a protocol tag so that unrelated
//! traffic sharing a transport can be told apart and skipped. Oversized
//! envelopes are split into [`Chunk`]s and put back together by a
//! [`ChunkAssembler`].

pub mod chunk;
pub mod codec;
pub mod descriptor;
pub mod envelope;
pub mod error;

pub use chunk::{slice_len_for, split, Chunk, ChunkAssembler, DEFAULT_MAX_CHUNKS};
pub use codec::{Decoded, EnvelopeCodec, DEFAULT_TAG, MAX_TAG_LEN};
pub use descriptor::ErrorDescriptor;
pub use envelope::{
    is_reserved, CorrelationId, Envelope, Outcome, Request, Response, CHUNK_MESSAGE,
    READY_MESSAGE,
};
pub use error::{EnvelopeError, Result};
