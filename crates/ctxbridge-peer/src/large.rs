//! Large-payload path.
//!
//! Envelopes flagged as large that do not fit under the ceiling are either
//! split into `channel-chunk` control requests or, when the channel has one,
//! routed through an auxiliary channel (see `Channel::route_large_payloads_via`).

use ctxbridge_envelope::{
    slice_len_for, split, Chunk, ChunkAssembler, CorrelationId, Envelope, EnvelopeCodec, Request,
};
use ctxbridge_transport::{Encoding, WireMessage};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{PeerError, Result};

pub(crate) struct LargePayloadPath {
    assembler: Mutex<ChunkAssembler>,
    max_chunks: usize,
}

impl LargePayloadPath {
    pub(crate) fn new(max_chunks: usize) -> Self {
        Self {
            assembler: Mutex::new(ChunkAssembler::new(max_chunks)),
            max_chunks,
        }
    }

    /// Whether a request for `name` would exceed `ceiling` once encoded.
    ///
    /// Sized with the longest possible correlation id.
    pub(crate) fn request_exceeds(
        codec: &EnvelopeCodec,
        encoding: Encoding,
        ceiling: Option<usize>,
        name: &str,
        args: &[Value],
    ) -> Result<bool> {
        let Some(max) = ceiling else {
            return Ok(false);
        };
        let probe = Envelope::request(
            Some(CorrelationId::new(CorrelationId::MAX)?),
            name,
            args.to_vec(),
        );
        Ok(codec.encode(&probe, encoding)?.byte_len() > max)
    }

    /// Slice an encoded envelope into chunk messages that each fit under `max`.
    pub(crate) fn split(
        &self,
        codec: &EnvelopeCodec,
        encoding: Encoding,
        envelope: &Envelope,
        max: usize,
    ) -> Result<Vec<WireMessage>> {
        let bytes = codec.to_bytes(envelope)?;
        let slice_len = slice_len_for(max, codec.tag().len())?;
        // Must not repeat ids a previous incarnation of this endpoint used.
        let transfer_id = CorrelationId::random(&mut rand::thread_rng()).get();
        let chunks = split(transfer_id, &bytes, slice_len, self.max_chunks)?;
        debug!(
            transfer = transfer_id,
            bytes = bytes.len(),
            chunks = chunks.len(),
            "splitting oversized envelope"
        );
        chunks
            .into_iter()
            .map(|chunk| {
                codec
                    .encode(&chunk.into_envelope(), encoding)
                    .map_err(PeerError::from)
            })
            .collect()
    }

    /// Feed one `channel-chunk` request. Returns the reassembled envelope once
    /// its transfer is complete.
    ///
    /// A broken transfer is discarded and reported as an error.
    pub(crate) fn accept(&self, codec: &EnvelopeCodec, request: &Request) -> Result<Option<Envelope>> {
        let chunk = Chunk::from_request(request)?;
        let transfer_id = chunk.transfer_id;
        let mut assembler = self.assembler.lock();
        match assembler.accept(chunk) {
            Ok(None) => Ok(None),
            Ok(Some(bytes)) => {
                drop(assembler);
                trace!(transfer = transfer_id, bytes = bytes.len(), "transfer reassembled");
                Ok(Some(codec.from_bytes(&bytes)?))
            }
            Err(err) => {
                assembler.discard(transfer_id);
                Err(err.into())
            }
        }
    }

    /// Forget every partial transfer, e.g. when the sending endpoint is gone.
    pub(crate) fn reset(&self) -> usize {
        self.assembler.lock().clear()
    }

    pub(crate) fn pending_transfers(&self) -> usize {
        self.assembler.lock().pending_transfers()
    }
}
