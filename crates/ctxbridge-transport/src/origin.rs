use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::traits::WireMessage;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a sending endpoint (the analogue of `event.source`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocate a process-unique source id.
    pub fn next() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// An inbound event before it is admitted to the listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Origin claimed by the sender (e.g. `chrome-extension://<id>`).
    pub origin: String,
    /// Sending endpoint, when the primitive exposes one.
    pub source: Option<SourceId>,
    pub message: WireMessage,
}

/// Validation applied to every inbound event before it is treated as a message.
///
/// Events that fail the check are dropped silently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginPolicy {
    origins: Vec<String>,
    source: Option<SourceId>,
}

impl OriginPolicy {
    /// Admit every inbound event.
    pub fn any() -> Self {
        Self::default()
    }

    /// Admit only events claiming `origin`. May be called repeatedly to allow several.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origins.push(origin.into());
        self
    }

    /// Admit only events sent by `source`.
    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    /// Whether `inbound` passes this policy.
    pub fn admits(&self, inbound: &Inbound) -> bool {
        if !self.origins.is_empty() && !self.origins.iter().any(|o| *o == inbound.origin) {
            return false;
        }
        match self.source {
            Some(expected) => inbound.source == Some(expected),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn inbound(origin: &str, source: Option<SourceId>) -> Inbound {
        Inbound {
            origin: origin.to_string(),
            source,
            message: WireMessage::Structured(json!(null)),
        }
    }

    #[test]
    fn any_admits_everything() {
        let policy = OriginPolicy::any();
        assert!(policy.admits(&inbound("https://evil.example", None)));
    }

    #[test]
    fn origin_must_match_one_of_expected() {
        let policy = OriginPolicy::any()
            .with_origin("chrome-extension://abc")
            .with_origin("moz-extension://def");
        assert!(policy.admits(&inbound("chrome-extension://abc", None)));
        assert!(policy.admits(&inbound("moz-extension://def", None)));
        assert!(!policy.admits(&inbound("https://page.example", None)));
    }

    #[test]
    fn source_must_match_when_pinned() {
        let expected = SourceId::next();
        let other = SourceId::next();
        let policy = OriginPolicy::any().with_source(expected);

        assert!(policy.admits(&inbound("x", Some(expected))));
        assert!(!policy.admits(&inbound("x", Some(other))));
        assert!(!policy.admits(&inbound("x", None)));
    }

    #[test]
    fn source_ids_are_unique() {
        assert_ne!(SourceId::next(), SourceId::next());
    }
}
