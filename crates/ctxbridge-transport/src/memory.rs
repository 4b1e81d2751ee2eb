//! In-process transport endpoints.
//!
//! A [`pair`] of [`MemoryTransport`]s behaves like two contexts joined by a
//! `postMessage`-style primitive: values are queued in order, each endpoint
//! has exactly one receive listener, and inbound traffic is filtered by the
//! receiving endpoint's [`OriginPolicy`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::origin::{Inbound, OriginPolicy, SourceId};
use crate::traits::{Encoding, Listener, Transport, TransportEvent, WireMessage};

/// Configuration for one memory endpoint.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Origin stamped on everything this endpoint sends.
    pub origin: String,
    /// Whether the primitive carries structured values or strings only.
    pub encoding: Encoding,
    /// Per-message ceiling in bytes.
    pub max_message_size: Option<usize>,
    /// Validation applied to inbound events.
    pub policy: OriginPolicy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            origin: "memory://local".to_string(),
            encoding: Encoding::Structured,
            max_message_size: None,
            policy: OriginPolicy::any(),
        }
    }
}

enum Delivery {
    Message(Inbound),
    PeerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    fn other(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Inbox senders for both ends; swapped when an endpoint is recycled.
struct Link {
    inboxes: [Mutex<Option<mpsc::UnboundedSender<Delivery>>>; 2],
}

impl Link {
    fn deliver(&self, side: Side, delivery: Delivery) -> bool {
        match self.inboxes[side.index()].lock().as_ref() {
            Some(tx) => tx.send(delivery).is_ok(),
            None => false,
        }
    }
}

/// Create two connected in-process endpoints.
pub fn pair(left: MemoryConfig, right: MemoryConfig) -> (MemoryTransport, MemoryTransport) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    let link = Arc::new(Link {
        inboxes: [Mutex::new(Some(left_tx)), Mutex::new(Some(right_tx))],
    });

    (
        MemoryTransport::attach(Side::Left, Arc::clone(&link), left, left_rx),
        MemoryTransport::attach(Side::Right, link, right, right_rx),
    )
}

/// One end of an in-process link.
pub struct MemoryTransport {
    side: Side,
    link: Arc<Link>,
    config: MemoryConfig,
    source: SourceId,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn attach(
        side: Side,
        link: Arc<Link>,
        config: MemoryConfig,
        inbox: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            side,
            link,
            config,
            source: SourceId::next(),
            inbox: Mutex::new(Some(inbox)),
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Identity stamped on everything this endpoint sends.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Replace this endpoint with a fresh one attached to the same peer.
    ///
    /// Models a host that kills and restarts one context while the other
    /// survives: the old endpoint stops receiving and can no longer send, the
    /// peer is *not* notified, and the returned endpoint (with a new source id)
    /// receives everything the peer sends from now on.
    pub fn recycle(&self) -> MemoryTransport {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.link.inboxes[self.side.index()].lock() = Some(tx);
        debug!(origin = %self.config.origin, "memory endpoint recycled");

        MemoryTransport::attach(self.side, Arc::clone(&self.link), self.config.clone(), rx)
    }

    /// Inject an inbound event as if some sender had posted it to this endpoint.
    ///
    /// The event still goes through this endpoint's origin policy. Used to
    /// model third-party traffic sharing the same primitive.
    pub fn deliver_raw(&self, inbound: Inbound) -> Result<()> {
        if self.link.deliver(self.side, Delivery::Message(inbound)) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn check_outbound(&self, message: &WireMessage) -> Result<()> {
        if self.config.encoding == Encoding::TextOnly {
            if let WireMessage::Structured(_) = message {
                return Err(TransportError::UnsupportedEncoding(message.kind()));
            }
        }
        if let Some(max) = self.config.max_message_size {
            let size = message.byte_len();
            if size > max {
                return Err(TransportError::MessageTooLarge { size, max });
            }
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn encoding(&self) -> Encoding {
        self.config.encoding
    }

    fn max_message_size(&self) -> Option<usize> {
        self.config.max_message_size
    }

    fn send(&self, message: WireMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.check_outbound(&message)?;

        let inbound = Inbound {
            origin: self.config.origin.clone(),
            source: Some(self.source),
            message,
        };
        if self.link.deliver(self.side.other(), Delivery::Message(inbound)) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn on_receive(&self, listener: Listener) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut rx = self
            .inbox
            .lock()
            .take()
            .ok_or(TransportError::ListenerAlreadyRegistered)?;

        let policy = self.config.policy.clone();
        let handle = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                match delivery {
                    Delivery::Message(inbound) => {
                        if !policy.admits(&inbound) {
                            trace!(origin = %inbound.origin, "dropping inbound event that failed origin check");
                            continue;
                        }
                        listener(TransportEvent::Message(inbound.message));
                    }
                    Delivery::PeerClosed => break,
                }
            }
            listener(TransportEvent::Closed);
        });
        *self.pump.lock() = Some(handle);
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.link.inboxes[self.side.index()].lock().take();
        self.link.deliver(self.side.other(), Delivery::PeerClosed);
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        debug!(origin = %self.config.origin, "memory endpoint closed");
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("side", &self.side)
            .field("origin", &self.config.origin)
            .field("source", &self.source)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn collect(transport: &MemoryTransport) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        transport
            .on_receive(Box::new(move |event| {
                let _ = tx.send(event);
            }))
            .unwrap();
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event should arrive")
            .expect("listener should be alive")
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (left, right) = pair(MemoryConfig::default(), MemoryConfig::default());
        let mut events = collect(&right);

        left.send(WireMessage::Structured(json!(1))).unwrap();
        left.send(WireMessage::Structured(json!(2))).unwrap();

        assert_eq!(
            next(&mut events).await,
            TransportEvent::Message(WireMessage::Structured(json!(1)))
        );
        assert_eq!(
            next(&mut events).await,
            TransportEvent::Message(WireMessage::Structured(json!(2)))
        );
    }

    #[tokio::test]
    async fn text_only_rejects_structured_values() {
        let config = MemoryConfig {
            encoding: Encoding::TextOnly,
            ..MemoryConfig::default()
        };
        let (left, _right) = pair(config.clone(), config);

        let err = left.send(WireMessage::Structured(json!({}))).unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedEncoding(_)));
        assert!(left.send(WireMessage::Text("ok".into())).is_ok());
    }

    #[tokio::test]
    async fn enforces_size_ceiling() {
        let config = MemoryConfig {
            max_message_size: Some(8),
            ..MemoryConfig::default()
        };
        let (left, _right) = pair(config, MemoryConfig::default());

        let err = left
            .send(WireMessage::Text("0123456789".into()))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::MessageTooLarge { size: 10, max: 8 }
        ));
    }

    #[tokio::test]
    async fn second_listener_is_rejected() {
        let (_left, right) = pair(MemoryConfig::default(), MemoryConfig::default());
        let _events = collect(&right);

        let err = right.on_receive(Box::new(|_| {})).unwrap_err();
        assert!(matches!(err, TransportError::ListenerAlreadyRegistered));
    }

    #[tokio::test]
    async fn close_notifies_peer_and_fails_sends() {
        let (left, right) = pair(MemoryConfig::default(), MemoryConfig::default());
        let mut events = collect(&right);

        left.close();

        assert_eq!(next(&mut events).await, TransportEvent::Closed);
        assert!(matches!(
            right.send(WireMessage::Text("late".into())),
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            left.send(WireMessage::Text("late".into())),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn spoofed_origin_is_dropped_silently() {
        let expected = MemoryConfig {
            origin: "chrome-extension://trusted".into(),
            ..MemoryConfig::default()
        };
        let guarded = MemoryConfig {
            policy: OriginPolicy::any().with_origin("chrome-extension://trusted"),
            ..MemoryConfig::default()
        };
        let (left, right) = pair(expected, guarded);
        let mut events = collect(&right);

        right
            .deliver_raw(Inbound {
                origin: "https://page.example".into(),
                source: None,
                message: WireMessage::Text("spoof".into()),
            })
            .unwrap();
        left.send(WireMessage::Text("real".into())).unwrap();

        assert_eq!(
            next(&mut events).await,
            TransportEvent::Message(WireMessage::Text("real".into()))
        );
    }

    #[tokio::test]
    async fn recycled_endpoint_takes_over_without_closing_peer() {
        let (left, right) = pair(MemoryConfig::default(), MemoryConfig::default());
        let mut left_events = collect(&left);
        let _old_events = collect(&right);

        let fresh = right.recycle();
        assert_ne!(fresh.source(), right.source());
        assert!(matches!(
            right.send(WireMessage::Text("stale".into())),
            Err(TransportError::Closed)
        ));

        let mut fresh_events = collect(&fresh);
        left.send(WireMessage::Text("to-new".into())).unwrap();
        fresh.send(WireMessage::Text("from-new".into())).unwrap();

        assert_eq!(
            next(&mut fresh_events).await,
            TransportEvent::Message(WireMessage::Text("to-new".into()))
        );
        assert_eq!(
            next(&mut left_events).await,
            TransportEvent::Message(WireMessage::Text("from-new".into()))
        );

        drop(right);
        left.send(WireMessage::Text("still-alive".into())).unwrap();
        assert_eq!(
            next(&mut fresh_events).await,
            TransportEvent::Message(WireMessage::Text("still-alive".into()))
        );
    }
}
