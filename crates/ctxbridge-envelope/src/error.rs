/// Errors raised while encoding, decoding or reassembling envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The protocol tag is empty, too long or contains the `:` separator.
    #[error("invalid protocol tag {0:?}")]
    InvalidTag(String),

    /// A correlation id outside `1..=2^53-1`.
    #[error("correlation id {0} is out of range")]
    InvalidCorrelationId(u64),

    /// The value carries this protocol's tag but not a valid envelope shape.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// Splitting would need more slices than allowed.
    #[error("payload needs {needed} chunks, limit is {max}")]
    TooManyChunks { needed: usize, max: usize },

    /// The transport ceiling leaves no room for chunk data.
    #[error("message ceiling of {max} bytes is too small to carry chunks")]
    CeilingTooSmall { max: usize },

    /// A chunk index outside the announced total.
    #[error("chunk {index} of transfer {transfer} is out of range (total {total})")]
    ChunkOutOfRange { transfer: u64, index: u32, total: u32 },

    /// A chunk announces a different total than earlier chunks of the same transfer.
    #[error("chunk total for transfer {transfer} changed from {expected} to {got}")]
    ChunkMismatch { transfer: u64, expected: u32, got: u32 },

    /// Chunk data is not valid base64.
    #[error("chunk data is not valid base64: {0}")]
    ChunkEncoding(#[from] base64::DecodeError),

    /// JSON (de)serialization failed.
    #[error("envelope JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;
