//! The request/response channel.
//!
//! A [`Channel`] owns one transport and ties the other components together:
//! outbound calls go through the caller-side hooks, the envelope codec and
//! (when flagged) the large-payload path; inbound traffic is decoded, filtered
//! and routed to the correlation table, the dispatch registry or the liveness
//! state machine.
//!
//! The channel lives as long as a handle to it exists; dropping the last
//! handle drops the transport.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use ctxbridge_envelope::{
    is_reserved, CorrelationId, Decoded, Envelope, EnvelopeCodec, Outcome, Request,
    CHUNK_MESSAGE, READY_MESSAGE,
};
use ctxbridge_transport::{Transport, TransportError, TransportEvent, WireMessage};
use futures_core::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::client::Client;
use crate::config::{CallOptions, ChannelConfig, HandlerConfig};
use crate::control::{new_instance_id, ReadySignal};
use crate::correlation::{CorrelationTable, ReplaySpec};
use crate::error::{PeerError, Result};
use crate::handshake::{LinkState, Liveness, Observation};
use crate::large::LargePayloadPath;
use crate::marshal::{marshal, HandlerError};
use crate::registry::{DispatchRegistry, Handler};

/// Collects handlers and call options, then connects.
///
/// Handlers registered here are in place before the receive path exists, so
/// no early request can miss them.
pub struct ChannelBuilder {
    transport: Box<dyn Transport>,
    config: ChannelConfig,
    registry: DispatchRegistry,
    call_options: HashMap<String, CallOptions>,
    deferred: Option<PeerError>,
}

impl ChannelBuilder {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            config: ChannelConfig::default(),
            registry: DispatchRegistry::new(),
            call_options: HashMap::new(),
            deferred: None,
        }
    }

    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = label.into();
        self
    }

    /// Register a handler with the default [`HandlerConfig`].
    pub fn handler(self, name: impl Into<String>, handler: impl Handler) -> Self {
        self.handler_with(name, handler, HandlerConfig::default())
    }

    /// Register a handler. A reserved name makes [`connect`](Self::connect) fail.
    pub fn handler_with(
        mut self,
        name: impl Into<String>,
        handler: impl Handler,
        config: HandlerConfig,
    ) -> Self {
        if let Err(err) = self.registry.register(name, handler, config) {
            self.deferred.get_or_insert(err);
        }
        self
    }

    /// Default options for calls to `name`.
    pub fn call_options(mut self, name: impl Into<String>, options: CallOptions) -> Self {
        self.call_options.insert(name.into(), options);
        self
    }

    /// Install the receive path, announce this endpoint and wait for the
    /// remote one.
    ///
    /// Fails with [`PeerError::HandshakeTimeout`] if no ready signal arrives
    /// within [`ChannelConfig::handshake_timeout`], and with
    /// [`PeerError::HandshakeFailed`] if the remote endpoint speaks an
    /// incompatible protocol.
    pub async fn connect(self) -> Result<Channel> {
        if let Some(err) = self.deferred {
            return Err(err);
        }
        let codec = EnvelopeCodec::new(self.config.tag.clone())?;
        let large = LargePayloadPath::new(self.config.max_chunks);
        let inner = Arc::new(ChannelInner {
            codec,
            transport: self.transport,
            table: CorrelationTable::new(),
            registry: self.registry,
            call_options: RwLock::new(self.call_options),
            liveness: Liveness::new(),
            large,
            aux: RwLock::new(None),
            instance: new_instance_id(),
            config: self.config,
        });

        inner.liveness.set(LinkState::Handshaking);
        let weak: Weak<ChannelInner> = Arc::downgrade(&inner);
        inner.transport.on_receive(Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_event(event);
            }
        }))?;

        debug!(
            channel = %inner.config.label,
            instance = %inner.instance,
            transport = inner.transport.name(),
            "announcing endpoint"
        );
        if let Err(err) = inner.announce(false) {
            inner.shutdown();
            return Err(err);
        }

        if let Err(err) = inner.liveness.wait_ready(inner.config.handshake_timeout).await {
            debug!(channel = %inner.config.label, error = %err, "handshake failed");
            inner.shutdown();
            return Err(err);
        }
        Ok(Channel { inner })
    }
}

impl std::fmt::Debug for ChannelBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("transport", &self.transport.name())
            .field("config", &self.config)
            .field("handlers", &self.registry.names())
            .finish_non_exhaustive()
    }
}

struct ChannelInner {
    config: ChannelConfig,
    codec: EnvelopeCodec,
    transport: Box<dyn Transport>,
    table: CorrelationTable,
    registry: DispatchRegistry,
    call_options: RwLock<HashMap<String, CallOptions>>,
    liveness: Liveness,
    large: LargePayloadPath,
    aux: RwLock<Option<Channel>>,
    instance: String,
}

impl ChannelInner {
    fn on_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Closed => {
                debug!(channel = %self.config.label, "transport closed by remote end");
                self.shutdown();
            }
            TransportEvent::Message(message) => match self.codec.decode(&message) {
                Decoded::Envelope(envelope) => self.handle_envelope(envelope),
                Decoded::Foreign => {
                    trace!(
                        channel = %self.config.label,
                        kind = message.kind(),
                        "ignoring foreign traffic"
                    );
                }
            },
        }
    }

    fn handle_envelope(self: &Arc<Self>, envelope: Envelope) {
        match envelope {
            Envelope::Response(response) => {
                if !self.table.settle(response.id, response.outcome) {
                    debug!(
                        channel = %self.config.label,
                        id = %response.id,
                        "dropping unmatched response"
                    );
                }
            }
            Envelope::Request(request) => match request.name.as_str() {
                READY_MESSAGE => self.on_ready(&request),
                CHUNK_MESSAGE => self.on_chunk(&request),
                _ => {
                    let inner = Arc::clone(self);
                    tokio::spawn(async move { inner.serve(request).await });
                }
            },
        }
    }

    fn on_ready(self: &Arc<Self>, request: &Request) {
        let signal = match ReadySignal::from_request(request) {
            Ok(signal) => signal,
            Err(err) => {
                debug!(
                    channel = %self.config.label,
                    error = %err,
                    "ignoring malformed ready signal"
                );
                return;
            }
        };
        if let Err(err) = signal.check_compatible(&self.config.protocol_version) {
            warn!(
                channel = %self.config.label,
                remote = %signal.instance,
                error = %err,
                "incompatible remote endpoint"
            );
            let reason = match err {
                PeerError::HandshakeFailed(reason) => reason,
                other => other.to_string(),
            };
            self.liveness.fail(reason);
            self.shutdown();
            return;
        }

        match self.liveness.observe(&signal) {
            Observation::FirstContact { reply } => {
                info!(channel = %self.config.label, remote = %signal.instance, "channel ready");
                if reply {
                    self.acknowledge();
                }
            }
            Observation::Duplicate { reply } => {
                if reply {
                    self.acknowledge();
                }
            }
            Observation::Restarted { reply } => self.on_restart(&signal.instance, reply),
            Observation::Ignored => {}
        }
    }

    /// The remote endpoint came back as a new instance: reject what it can no
    /// longer answer, re-run the handshake and re-send replayable calls under
    /// their original ids.
    fn on_restart(&self, instance: &str, reply: bool) {
        info!(channel = %self.config.label, remote = %instance, "remote endpoint restarted");
        let replay = self.table.prepare_restart();
        let dropped = self.large.reset();
        if dropped > 0 {
            debug!(
                channel = %self.config.label,
                dropped,
                "discarding partial transfers from previous endpoint"
            );
        }
        self.liveness.set(LinkState::Handshaking);
        if reply {
            self.acknowledge();
        }
        self.liveness.set(LinkState::Ready);

        for call in replay {
            debug!(
                channel = %self.config.label,
                name = %call.name,
                id = %call.id,
                "replaying call"
            );
            let envelope = Envelope::request(Some(call.id), call.name, call.spec.payload);
            if let Err(err) = self.transmit(&envelope, call.spec.large_payload) {
                self.table.reject(call.id, err);
            }
        }
    }

    fn on_chunk(self: &Arc<Self>, request: &Request) {
        match self.large.accept(&self.codec, request) {
            Ok(Some(envelope)) => self.handle_envelope(envelope),
            Ok(None) => {}
            Err(err) => {
                debug!(
                    channel = %self.config.label,
                    error = %err,
                    "dropping broken chunk transfer"
                );
            }
        }
    }

    async fn serve(self: Arc<Self>, request: Request) {
        let Request { id, name, payload } = request;
        let Some(dispatched) = self.registry.dispatch(&name, payload).await else {
            debug!(
                channel = %self.config.label,
                name = %name,
                "no handler registered; ignoring request"
            );
            return;
        };

        let Some(id) = id else {
            if let Outcome::Failure(desc) = &dispatched.outcome {
                warn!(
                    channel = %self.config.label,
                    name = %name,
                    error = %desc.message,
                    "fire-and-forget handler failed"
                );
            }
            return;
        };

        let outcome = if dispatched.expects_response {
            dispatched.outcome
        } else {
            Outcome::Success(Value::Null)
        };
        match self.transmit(&Envelope::response(id, outcome), dispatched.large_payload) {
            Ok(()) => {}
            Err(PeerError::ChannelClosed) => {
                debug!(
                    channel = %self.config.label,
                    name = %name,
                    "channel closed before response could be sent"
                );
            }
            Err(err) => {
                warn!(
                    channel = %self.config.label,
                    name = %name,
                    error = %err,
                    "failed to send response"
                );
                let fallback = marshal(HandlerError::new(err.to_string()), &name);
                if let Err(err) =
                    self.transmit(&Envelope::response(id, Outcome::Failure(fallback)), false)
                {
                    debug!(
                        channel = %self.config.label,
                        name = %name,
                        error = %err,
                        "failed to report send failure"
                    );
                }
            }
        }
    }

    fn ceiling(&self) -> Option<usize> {
        self.config
            .max_message_size
            .or_else(|| self.transport.max_message_size())
    }

    /// Encode and send, chunking when flagged as large and over the ceiling.
    fn transmit(&self, envelope: &Envelope, large: bool) -> Result<()> {
        let encoding = self.transport.encoding();
        let message = self.codec.encode(envelope, encoding)?;
        if large {
            if let Some(max) = self.ceiling() {
                if message.byte_len() > max {
                    for chunk in self.large.split(&self.codec, encoding, envelope, max)? {
                        self.send(chunk)?;
                    }
                    return Ok(());
                }
            }
        }
        self.send(message)
    }

    fn send(&self, message: WireMessage) -> Result<()> {
        match self.transport.send(message) {
            Ok(()) => Ok(()),
            Err(TransportError::Closed) => {
                self.shutdown();
                Err(PeerError::ChannelClosed)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn announce(&self, ack: bool) -> Result<()> {
        let version = &self.config.protocol_version;
        let signal = if ack {
            ReadySignal::ack(&self.instance, version)
        } else {
            ReadySignal::hello(&self.instance, version)
        };
        self.transmit(&signal.to_envelope()?, false)
    }

    fn acknowledge(&self) {
        if let Err(err) = self.announce(true) {
            debug!(
                channel = %self.config.label,
                error = %err,
                "failed to acknowledge ready signal"
            );
        }
    }

    fn options_for(&self, name: &str) -> CallOptions {
        self.call_options
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn aux_channel(&self) -> Option<Channel> {
        self.aux.read().clone()
    }

    /// Tear down: close the transport, reject every pending call and drop
    /// the handlers. Idempotent.
    fn shutdown(&self) {
        let changed = self.liveness.close();
        let rejected = self.table.reject_all(|| PeerError::ChannelClosed);
        self.transport.close();
        self.large.reset();
        if changed {
            self.registry.clear();
            self.aux.write().take();
            debug!(channel = %self.config.label, rejected, "channel closed");
        }
    }
}

/// Removes a pending entry if the call future is dropped before it settles.
struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

fn transform_failure(name: &str, err: HandlerError) -> PeerError {
    PeerError::Transform {
        name: name.to_string(),
        message: err.to_string(),
    }
}

/// A connected request/response channel. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub fn builder(transport: impl Transport + 'static) -> ChannelBuilder {
        ChannelBuilder::new(transport)
    }

    /// Call `name` with the options configured for it.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let options = self.inner.options_for(name);
        self.call_with(name, args, options).await
    }

    /// Call `name` with explicit options.
    ///
    /// Resolves with the handler's value after `post_receive`, or fails with
    /// the remote error, a timeout, or a channel-level error. Fire-and-forget
    /// calls resolve with `null` once sent.
    pub async fn call_with(
        &self,
        name: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        if is_reserved(name) {
            return Err(PeerError::ReservedName(name.to_string()));
        }
        let args = options
            .hooks
            .apply_pre_send(args)
            .await
            .map_err(|err| transform_failure(name, err))?;
        let value = self.call_prepared(name, args, &options).await?;
        options
            .hooks
            .apply_post_receive(value)
            .await
            .map_err(|err| transform_failure(name, err))
    }

    /// Send `name` without waiting for a result.
    pub async fn notify(&self, name: &str, args: Vec<Value>) -> Result<()> {
        let options = CallOptions {
            expects_response: false,
            ..self.inner.options_for(name)
        };
        self.call_with(name, args, options).await.map(|_| ())
    }

    /// Everything after caller-side `pre_send`: routing, correlation, timeout.
    fn call_prepared<'a>(
        &'a self,
        name: &'a str,
        args: Vec<Value>,
        options: &'a CallOptions,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let inner = &self.inner;
            if inner.liveness.state() == LinkState::Closed {
                return Err(PeerError::ChannelClosed);
            }

            if options.large_payload {
                if let Some(aux) = inner.aux_channel() {
                    let encoding = inner.transport.encoding();
                    let ceiling = inner.ceiling();
                    let exceeds = LargePayloadPath::request_exceeds(
                        &inner.codec,
                        encoding,
                        ceiling,
                        name,
                        &args,
                    )?;
                    if exceeds {
                        debug!(
                            channel = %inner.config.label,
                            name = %name,
                            via = %aux.label(),
                            "routing oversized call through auxiliary channel"
                        );
                        return aux.call_prepared(name, args, options).await;
                    }
                }
            }

            if !options.expects_response {
                inner.transmit(&Envelope::request(None, name, args), options.large_payload)?;
                return Ok(Value::Null);
            }

            let replay = options.replay_on_restart.then(|| ReplaySpec {
                payload: args.clone(),
                large_payload: options.large_payload,
            });
            let (id, mut rx) = inner.table.register(name, replay);
            let _guard = PendingGuard {
                table: &inner.table,
                id,
            };
            trace!(channel = %inner.config.label, name = %name, id = %id, "sending call");
            inner.transmit(&Envelope::request(Some(id), name, args), options.large_payload)?;

            let received = match options.timeout.resolve(inner.config.call_timeout) {
                Some(after) => match tokio::time::timeout(after, &mut rx).await {
                    Ok(received) => received,
                    Err(_) => {
                        if inner.table.expire(id, after) {
                            debug!(
                                channel = %inner.config.label,
                                name = %name,
                                id = %id,
                                ?after,
                                "call timed out"
                            );
                        }
                        rx.await
                    }
                },
                None => rx.await,
            };
            received.unwrap_or_else(|_| Err(PeerError::ChannelClosed))
        })
    }

    /// Register or replace a handler on the live channel.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Handler,
        config: HandlerConfig,
    ) -> Result<()> {
        self.inner.registry.register(name, handler, config)
    }

    /// Set the default options for calls to `name`.
    pub fn configure_call(&self, name: impl Into<String>, options: CallOptions) {
        self.inner.call_options.write().insert(name.into(), options);
    }

    /// A client scoped to `namespace`.
    pub fn client(&self, namespace: impl Into<String>) -> Client {
        Client::new(self.clone(), namespace)
    }

    /// Route oversized calls flagged as large through `aux` instead of
    /// chunking them. `aux` must not be this channel.
    pub fn route_large_payloads_via(&self, aux: Channel) {
        if Arc::ptr_eq(&self.inner, &aux.inner) {
            warn!(channel = %self.inner.config.label, "refusing to route a channel through itself");
            return;
        }
        debug!(
            channel = %self.inner.config.label,
            via = %aux.label(),
            "auxiliary channel attached"
        );
        *self.inner.aux.write() = Some(aux);
    }

    pub fn state(&self) -> LinkState {
        self.inner.liveness.state()
    }

    /// Watch link state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.inner.liveness.subscribe()
    }

    /// Wait until the channel is closed, locally or by the remote end.
    pub async fn closed(&self) {
        let mut rx = self.inner.liveness.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|state| *state == LinkState::Closed).await;
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.table.len()
    }

    /// Chunked transfers still waiting for slices.
    pub fn pending_transfers(&self) -> usize {
        self.inner.large.pending_transfers()
    }

    /// Instance id of the remote endpoint, once seen.
    pub fn remote_instance(&self) -> Option<String> {
        self.inner.liveness.remote_instance()
    }

    /// Instance id this endpoint announces.
    pub fn instance(&self) -> &str {
        &self.inner.instance
    }

    pub fn label(&self) -> &str {
        &self.inner.config.label
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Close the channel, rejecting every pending call with
    /// [`PeerError::ChannelClosed`].
    pub fn close(&self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("label", &self.inner.config.label)
            .field("state", &self.state())
            .field("instance", &self.inner.instance)
            .field("pending", &self.pending_calls())
            .field("transfers", &self.pending_transfers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ctxbridge_transport::memory::pair;
    use ctxbridge_transport::MemoryConfig;
    use serde_json::json;

    use super::*;
    use crate::registry::sync_handler;

    async fn connected(left: ChannelBuilder, right: ChannelBuilder) -> (Channel, Channel) {
        let (left, right) = tokio::join!(left.connect(), right.connect());
        (left.unwrap(), right.unwrap())
    }

    #[tokio::test]
    async fn handshake_reaches_ready_on_both_sides() {
        let (a, b) = pair(MemoryConfig::default(), MemoryConfig::default());
        let (a, b) = connected(Channel::builder(a), Channel::builder(b)).await;

        assert_eq!(a.state(), LinkState::Ready);
        assert_eq!(b.state(), LinkState::Ready);
        assert_eq!(a.remote_instance().as_deref(), Some(b.instance()));
        assert_eq!(b.remote_instance().as_deref(), Some(a.instance()));
    }

    #[tokio::test]
    async fn reserved_handler_name_fails_connect() {
        let (a, _b) = pair(MemoryConfig::default(), MemoryConfig::default());
        let err = Channel::builder(a)
            .handler("channel-chunk", sync_handler(|_| Ok(Value::Null)))
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::ReservedName(_)));
    }

    #[tokio::test]
    async fn reserved_call_name_is_rejected() {
        let (a, b) = pair(MemoryConfig::default(), MemoryConfig::default());
        let (a, _b) = connected(Channel::builder(a), Channel::builder(b)).await;
        let err = a.call("channel-ready", vec![]).await.unwrap_err();
        assert!(matches!(err, PeerError::ReservedName(_)));
    }

    #[tokio::test]
    async fn self_routing_is_refused() {
        let (a, b) = pair(MemoryConfig::default(), MemoryConfig::default());
        let (a, _b) = connected(Channel::builder(a), Channel::builder(b)).await;
        a.route_large_payloads_via(a.clone());
        assert!(a.inner.aux_channel().is_none());
    }

    #[tokio::test]
    async fn dropped_call_future_releases_its_entry() {
        let (a, b) = pair(MemoryConfig::default(), MemoryConfig::default());
        let (a, _b) = connected(Channel::builder(a), Channel::builder(b)).await;

        let call = a.call("Never.answers", vec![]);
        let _ = tokio::time::timeout(Duration::from_millis(20), call).await;
        assert_eq!(a.pending_calls(), 0);
    }

    #[tokio::test]
    async fn no_response_handler_still_settles_correlated_call() {
        let (a, b) = pair(MemoryConfig::default(), MemoryConfig::default());
        let (a, _b) = connected(
            Channel::builder(a),
            Channel::builder(b).handler_with(
                "Log.write",
                sync_handler(|_| Ok(json!("discarded"))),
                HandlerConfig::no_response(),
            ),
        )
        .await;

        assert_eq!(a.call("Log.write", vec![json!("x")]).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn oversized_unflagged_response_is_reported_as_error() {
        let config = MemoryConfig {
            max_message_size: Some(512),
            ..MemoryConfig::default()
        };
        let (a, b) = pair(config.clone(), config);
        let (a, _b) = connected(
            Channel::builder(a),
            Channel::builder(b).handler("Blob.get", sync_handler(|_| Ok(json!("q".repeat(2048))))),
        )
        .await;

        let err = a.call("Blob.get", vec![]).await.unwrap_err();
        let remote = err.as_remote().expect("remote error");
        assert!(remote.message.contains("too large"), "{}", remote.message);
    }
}
