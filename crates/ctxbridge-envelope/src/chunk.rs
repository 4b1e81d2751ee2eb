use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tracing::trace;

use crate::envelope::{Envelope, Request, CHUNK_MESSAGE};
use crate::error::{EnvelopeError, Result};

/// Default upper bound on the slices one transfer may use.
pub const DEFAULT_MAX_CHUNKS: usize = 64;

/// Bytes reserved in each chunk message for the tag, the envelope brackets
/// and the `[transferId, index, total]` header.
const CHUNK_OVERHEAD: usize = 128;

/// One slice of an oversized envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub transfer_id: u64,
    pub index: u32,
    pub total: u32,
    pub data: Vec<u8>,
}

impl Chunk {
    /// The `channel-chunk` control request carrying this slice.
    pub fn into_envelope(self) -> Envelope {
        Envelope::request(
            None,
            CHUNK_MESSAGE,
            vec![
                Value::from(self.transfer_id),
                Value::from(self.index),
                Value::from(self.total),
                Value::String(STANDARD.encode(&self.data)),
            ],
        )
    }

    /// Parse the payload of a `channel-chunk` request.
    pub fn from_request(request: &Request) -> Result<Self> {
        let malformed =
            || EnvelopeError::Malformed("chunk payload must be [id, index, total, data]".into());
        let [transfer_id, index, total, data] = request.payload.as_slice() else {
            return Err(malformed());
        };
        let as_u32 = |v: &Value| v.as_u64().and_then(|n| u32::try_from(n).ok());
        Ok(Self {
            transfer_id: transfer_id.as_u64().ok_or_else(malformed)?,
            index: as_u32(index).ok_or_else(malformed)?,
            total: as_u32(total).ok_or_else(malformed)?,
            data: STANDARD.decode(data.as_str().ok_or_else(malformed)?)?,
        })
    }
}

/// Raw bytes per slice that keep each chunk message under `max_message_size`
/// once base64-encoded and wrapped.
pub fn slice_len_for(max_message_size: usize, tag_len: usize) -> Result<usize> {
    let room = max_message_size
        .checked_sub(CHUNK_OVERHEAD + tag_len)
        .filter(|room| *room >= 4)
        .ok_or(EnvelopeError::CeilingTooSmall {
            max: max_message_size,
        })?;
    Ok(room / 4 * 3)
}

/// Split `bytes` into slices of at most `slice_len` bytes.
///
/// Empty input still produces one (empty) chunk.
pub fn split(
    transfer_id: u64,
    bytes: &[u8],
    slice_len: usize,
    max_chunks: usize,
) -> Result<Vec<Chunk>> {
    let slice_len = slice_len.max(1);
    let needed = bytes.len().div_ceil(slice_len).max(1);
    if needed > max_chunks {
        return Err(EnvelopeError::TooManyChunks {
            needed,
            max: max_chunks,
        });
    }
    let total = u32::try_from(needed).map_err(|_| EnvelopeError::TooManyChunks {
        needed,
        max: max_chunks,
    })?;

    if bytes.is_empty() {
        return Ok(vec![Chunk {
            transfer_id,
            index: 0,
            total,
            data: Vec::new(),
        }]);
    }

    Ok(bytes
        .chunks(slice_len)
        .zip(0u32..)
        .map(|(slice, index)| Chunk {
            transfer_id,
            index,
            total,
            data: slice.to_vec(),
        })
        .collect())
}

#[derive(Debug)]
struct ChunkSet {
    total: u32,
    received: Vec<Option<Vec<u8>>>,
    count: u32,
}

/// Reassembles chunk sets, one per transfer id.
#[derive(Debug)]
pub struct ChunkAssembler {
    sets: HashMap<u64, ChunkSet>,
    max_chunks: usize,
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNKS)
    }
}

impl ChunkAssembler {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            sets: HashMap::new(),
            max_chunks,
        }
    }

    /// Accept one slice. Returns the full byte string once every slice of
    /// the transfer has arrived, and forgets the transfer.
    ///
    /// Slices may arrive in any order; duplicates are ignored.
    pub fn accept(&mut self, chunk: Chunk) -> Result<Option<Vec<u8>>> {
        let Chunk {
            transfer_id,
            index,
            total,
            data,
        } = chunk;

        if total == 0 || total as usize > self.max_chunks {
            return Err(EnvelopeError::TooManyChunks {
                needed: total as usize,
                max: self.max_chunks,
            });
        }
        if index >= total {
            return Err(EnvelopeError::ChunkOutOfRange {
                transfer: transfer_id,
                index,
                total,
            });
        }

        let set = self.sets.entry(transfer_id).or_insert_with(|| ChunkSet {
            total,
            received: vec![None; total as usize],
            count: 0,
        });
        if set.total != total {
            return Err(EnvelopeError::ChunkMismatch {
                transfer: transfer_id,
                expected: set.total,
                got: total,
            });
        }

        let slot = &mut set.received[index as usize];
        if slot.is_some() {
            trace!(transfer = transfer_id, index, "ignoring duplicate chunk");
            return Ok(None);
        }
        *slot = Some(data);
        set.count += 1;
        if set.count < set.total {
            return Ok(None);
        }

        let Some(set) = self.sets.remove(&transfer_id) else {
            return Ok(None);
        };
        Ok(Some(set.received.into_iter().flatten().flatten().collect()))
    }

    /// Drop a partially received transfer.
    pub fn discard(&mut self, transfer_id: u64) -> bool {
        self.sets.remove(&transfer_id).is_some()
    }

    /// Drop every partially received transfer. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.sets.len();
        self.sets.clear();
        dropped
    }

    /// Transfers still waiting for slices.
    pub fn pending_transfers(&self) -> usize {
        self.sets.len()
    }
}
