use ctxbridge_transport::{Encoding, WireMessage};
use serde_json::{Map, Value};
use tracing::trace;

use crate::envelope::Envelope;
use crate::error::{EnvelopeError, Result};

/// Tag used when a channel does not pick its own.
pub const DEFAULT_TAG: &str = "ctxbridge";

/// Longest accepted protocol tag.
pub const MAX_TAG_LEN: usize = 64;

/// Result of looking at one inbound value.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Envelope(Envelope),
    /// Not ours: another protocol, another channel's tag, or a malformed value.
    Foreign,
}

/// Wraps envelopes under a protocol tag.
///
/// Structured transports carry `{"<tag>": envelope}`; text transports carry
/// `"<tag>:" + json(envelope)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeCodec {
    tag: String,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG.to_string(),
        }
    }
}

impl EnvelopeCodec {
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        if tag.is_empty() || tag.len() > MAX_TAG_LEN || tag.contains(':') {
            return Err(EnvelopeError::InvalidTag(tag));
        }
        Ok(Self { tag })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Encode for a transport with the given encoding.
    pub fn encode(&self, envelope: &Envelope, encoding: Encoding) -> Result<WireMessage> {
        let inner = envelope.to_value()?;
        Ok(match encoding {
            Encoding::Structured => {
                let mut map = Map::with_capacity(1);
                map.insert(self.tag.clone(), inner);
                WireMessage::Structured(Value::Object(map))
            }
            Encoding::TextOnly => WireMessage::Text(self.prefixed(&serde_json::to_string(&inner)?)),
        })
    }

    /// Untagged JSON bytes of an envelope, the unit that chunking splits.
    pub fn to_bytes(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&envelope.to_value()?)?)
    }

    /// Inverse of [`EnvelopeCodec::to_bytes`].
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Envelope> {
        Envelope::from_value(serde_json::from_slice(bytes)?)
    }

    /// Classify an inbound value. Never fails: anything that is not a valid
    /// envelope under this codec's tag is [`Decoded::Foreign`].
    pub fn decode(&self, message: &WireMessage) -> Decoded {
        let parsed = match message {
            WireMessage::Structured(Value::Object(map)) => match map.get(&self.tag) {
                Some(inner) if map.len() == 1 => Envelope::from_value(inner.clone()),
                _ => return Decoded::Foreign,
            },
            WireMessage::Structured(Value::String(text)) | WireMessage::Text(text) => {
                match self.strip(text) {
                    Some(json) => serde_json::from_str(json)
                        .map_err(EnvelopeError::from)
                        .and_then(Envelope::from_value),
                    None => return Decoded::Foreign,
                }
            }
            WireMessage::Structured(_) => return Decoded::Foreign,
        };

        match parsed {
            Ok(envelope) => Decoded::Envelope(envelope),
            Err(err) => {
                trace!(tag = %self.tag, error = %err, "dropping malformed tagged value");
                Decoded::Foreign
            }
        }
    }

    fn prefixed(&self, json: &str) -> String {
        let mut out = String::with_capacity(self.tag.len() + 1 + json.len());
        out.push_str(&self.tag);
        out.push(':');
        out.push_str(json);
        out
    }

    fn strip<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.strip_prefix(self.tag.as_str())?.strip_prefix(':')
    }
}
