use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::ErrorDescriptor;
use crate::error::{EnvelopeError, Result};

/// Handshake sentinel, sent once an endpoint's receive path is live.
pub const READY_MESSAGE: &str = "channel-ready";

/// Carrier for one slice of an oversized envelope.
pub const CHUNK_MESSAGE: &str = "channel-chunk";

const ERROR_MARKER: &str = "error";
const OK_MARKER: &str = "ok";

/// Whether `name` is reserved for channel control traffic.
pub fn is_reserved(name: &str) -> bool {
    name == READY_MESSAGE || name == CHUNK_MESSAGE
}

/// Token linking a request to its response.
///
/// Limited to `1..=2^53-1` so the value survives a round trip through a
/// JavaScript number on the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Largest integer a JavaScript number represents exactly.
    pub const MAX: u64 = (1 << 53) - 1;

    pub fn new(raw: u64) -> Result<Self> {
        if raw == 0 || raw > Self::MAX {
            return Err(EnvelopeError::InvalidCorrelationId(raw));
        }
        Ok(Self(raw))
    }

    /// Draw a uniformly random id.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(1..=Self::MAX))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for CorrelationId {
    type Error = EnvelopeError;

    fn try_from(raw: u64) -> Result<Self> {
        Self::new(raw)
    }
}

impl From<CorrelationId> for u64 {
    fn from(id: CorrelationId) -> u64 {
        id.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named call. `id` is `None` for fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Option<CorrelationId>,
    pub name: String,
    pub payload: Vec<Value>,
}

/// The reply to one correlated request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: CorrelationId,
    pub outcome: Outcome,
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(ErrorDescriptor),
}

impl Outcome {
    /// Tag the outcome for the wire.
    ///
    /// Failures become `["error", descriptor]`. Successes travel raw unless
    /// the value itself looks like a tagged pair, in which case it is sent as
    /// `["ok", value]`.
    ///
    /// Older peers never unwrap `["ok", value]`; a caller on such a peer
    /// receives a tagged-looking success still wrapped. Values shaped as
    /// plain results are unaffected.
    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            Outcome::Failure(desc) => {
                Value::Array(vec![ERROR_MARKER.into(), serde_json::to_value(desc)?])
            }
            Outcome::Success(value) if looks_tagged(value) => {
                Value::Array(vec![OK_MARKER.into(), value.clone()])
            }
            Outcome::Success(value) => value.clone(),
        })
    }

    /// Inverse of [`Outcome::to_value`].
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(mut pair) if is_tagged_pair(&pair) => {
                let inner = pair.pop().unwrap_or(Value::Null);
                if pair[0].as_str() == Some(ERROR_MARKER) {
                    Ok(Outcome::Failure(ErrorDescriptor::from_wire(inner)?))
                } else {
                    Ok(Outcome::Success(inner))
                }
            }
            other => Ok(Outcome::Success(other)),
        }
    }
}

fn looks_tagged(value: &Value) -> bool {
    matches!(value, Value::Array(items) if is_tagged_pair(items))
}

fn is_tagged_pair(items: &[Value]) -> bool {
    items.len() == 2 && matches!(items[0].as_str(), Some(ERROR_MARKER | OK_MARKER))
}

/// One message on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(Request),
    Response(Response),
}

impl Envelope {
    pub fn request(id: Option<CorrelationId>, name: impl Into<String>, payload: Vec<Value>) -> Self {
        Envelope::Request(Request {
            id,
            name: name.into(),
            payload,
        })
    }

    pub fn response(id: CorrelationId, outcome: Outcome) -> Self {
        Envelope::Response(Response { id, outcome })
    }

    /// Untagged wire array.
    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            Envelope::Request(req) => Value::Array(vec![
                req.id.map_or(Value::Null, |id| Value::from(id.get())),
                Value::String(req.name.clone()),
                Value::Array(req.payload.clone()),
            ]),
            Envelope::Response(resp) => {
                Value::Array(vec![Value::from(resp.id.get()), resp.outcome.to_value()?])
            }
        })
    }

    /// Parse an untagged wire array.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(EnvelopeError::Malformed("envelope is not an array".into()));
        };
        let mut items = items.into_iter();
        match (items.next(), items.next(), items.next(), items.next()) {
            (Some(id), Some(Value::String(name)), Some(payload), None) => {
                let id = match id {
                    Value::Null => None,
                    other => Some(parse_id(&other)?),
                };
                let payload = match payload {
                    Value::Array(args) => args,
                    single => vec![single],
                };
                Ok(Envelope::Request(Request { id, name, payload }))
            }
            (Some(id), Some(tagged), None, None) => Ok(Envelope::Response(Response {
                id: parse_id(&id)?,
                outcome: Outcome::from_value(tagged)?,
            })),
            _ => Err(EnvelopeError::Malformed(
                "expected [id, name, payload] or [id, response]".into(),
            )),
        }
    }

    /// Name of the call, for requests.
    pub fn name(&self) -> Option<&str> {
        match self {
            Envelope::Request(req) => Some(&req.name),
            Envelope::Response(_) => None,
        }
    }
}

fn parse_id(value: &Value) -> Result<CorrelationId> {
    value
        .as_u64()
        .ok_or_else(|| EnvelopeError::Malformed(format!("invalid correlation id {value}")))
        .and_then(CorrelationId::new)
}
