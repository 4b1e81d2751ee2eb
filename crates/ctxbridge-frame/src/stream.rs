use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use ctxbridge_transport::{
    Encoding, Inbound, Listener, OriginPolicy, Transport, TransportError, TransportEvent,
    WireMessage,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use crate::codec::{Frame, FrameCodec, DEFAULT_LANE, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Configuration for a [`FramedTransport`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Lane this transport sends on and listens to. Frames on other lanes are dropped.
    pub lane: u16,
    /// Origin reported for everything read from the stream.
    pub peer_origin: String,
    /// Maximum payload size in bytes, enforced in both directions.
    pub max_payload_size: usize,
    /// Validation applied to inbound messages.
    pub policy: OriginPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            lane: DEFAULT_LANE,
            peer_origin: "native://bridge".to_string(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            policy: OriginPolicy::any(),
        }
    }
}

/// A [`Transport`] over a framed byte stream.
///
/// Each message is one frame whose payload is the JSON encoding of the value.
/// Text messages travel as JSON strings and are surfaced as
/// [`WireMessage::Text`] on the other side.
pub struct FramedTransport {
    config: StreamConfig,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    reader: Mutex<Option<FramedRead<BoxedReader, FrameCodec>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl FramedTransport {
    /// Wrap a reader/writer pair. Must be called from within a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, config: StreamConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let codec = FrameCodec::new(config.max_payload_size);
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

        let mut sink = FramedWrite::new(writer, codec);
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(err) = sink.send(frame).await {
                    warn!(error = %err, "framed write failed; dropping writer");
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let reader: BoxedReader = Box::new(reader);
        Self {
            config,
            outbound: Mutex::new(Some(tx)),
            reader: Mutex::new(Some(FramedRead::new(reader, codec))),
            pump: Mutex::new(None),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        }
    }

    /// Frame a connected Unix socket.
    #[cfg(unix)]
    pub fn from_unix(stream: tokio::net::UnixStream, config: StreamConfig) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::new(read_half, write_half, config)
    }

    /// Frame this process's stdin/stdout, as a native messaging host does.
    pub fn stdio(config: StreamConfig) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), config)
    }

    /// Transport configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Close, then wait until every frame queued so far is on the stream.
    pub async fn drain(&self) {
        self.close();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
    }

    fn encode(&self, message: WireMessage) -> Result<Bytes, FrameError> {
        let bytes = match message {
            WireMessage::Structured(value) => serde_json::to_vec(&value)?,
            WireMessage::Text(text) => serde_json::to_vec(&Value::String(text))?,
        };
        if bytes.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: bytes.len(),
                max: self.config.max_payload_size,
            });
        }
        Ok(Bytes::from(bytes))
    }
}

fn decode_payload(payload: &[u8]) -> Result<WireMessage, FrameError> {
    Ok(match serde_json::from_slice::<Value>(payload)? {
        Value::String(text) => WireMessage::Text(text),
        value => WireMessage::Structured(value),
    })
}

impl Transport for FramedTransport {
    fn name(&self) -> &'static str {
        "framed-stream"
    }

    fn encoding(&self) -> Encoding {
        Encoding::Structured
    }

    fn max_message_size(&self) -> Option<usize> {
        Some(self.config.max_payload_size)
    }

    fn send(&self, message: WireMessage) -> ctxbridge_transport::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let payload = self.encode(message)?;
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        tx.send(Frame::new(self.config.lane, payload))
            .map_err(|_| TransportError::Closed)
    }

    fn on_receive(&self, listener: Listener) -> ctxbridge_transport::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut frames = self
            .reader
            .lock()
            .take()
            .ok_or(TransportError::ListenerAlreadyRegistered)?;

        let lane = self.config.lane;
        let origin = self.config.peer_origin.clone();
        let policy = self.config.policy.clone();
        let handle = tokio::spawn(async move {
            while let Some(item) = frames.next().await {
                let frame = match item {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "framed read failed; closing stream");
                        break;
                    }
                };
                if frame.lane != lane {
                    trace!(lane = frame.lane, expected = lane, "dropping frame on foreign lane");
                    continue;
                }
                let message = match decode_payload(&frame.payload) {
                    Ok(message) => message,
                    Err(err) => {
                        debug!(error = %err, "dropping undecodable frame payload");
                        continue;
                    }
                };
                let inbound = Inbound {
                    origin: origin.clone(),
                    source: None,
                    message,
                };
                if !policy.admits(&inbound) {
                    trace!(origin = %inbound.origin, "dropping inbound frame that failed origin check");
                    continue;
                }
                listener(TransportEvent::Message(inbound.message));
            }
            debug!("framed stream reached end of input");
            listener(TransportEvent::Closed);
        });
        *self.pump.lock() = Some(handle);
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender lets the writer task flush and shut the stream down.
        self.outbound.lock().take();
        self.reader.lock().take();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        debug!(lane = self.config.lane, "framed transport closed");
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FramedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedTransport")
            .field("lane", &self.config.lane)
            .field("peer_origin", &self.config.peer_origin)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::codec::encode_frame;

    fn linked(left: StreamConfig, right: StreamConfig) -> (FramedTransport, FramedTransport) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (
            FramedTransport::new(ar, aw, left),
            FramedTransport::new(br, bw, right),
        )
    }

    fn collect(transport: &FramedTransport) -> mpsc::UnboundedReceiver<TransportEvent> {
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
    async fn structured_and_text_messages_cross_the_stream() {
        let (left, right) = linked(StreamConfig::default(), StreamConfig::default());
        let mut events = collect(&right);

        left.send(WireMessage::Structured(json!({"ctxbridge": [1, "Bridge.ping", []]})))
            .unwrap();
        left.send(WireMessage::Text("ctxbridge:[2,\"x\",[]]".into()))
            .unwrap();

        assert_eq!(
            next(&mut events).await,
            TransportEvent::Message(WireMessage::Structured(
                json!({"ctxbridge": [1, "Bridge.ping", []]})
            ))
        );
        assert_eq!(
            next(&mut events).await,
            TransportEvent::Message(WireMessage::Text("ctxbridge:[2,\"x\",[]]".into()))
        );
    }

    #[tokio::test]
    async fn frames_on_other_lanes_are_ignored() {
        let (a, b) = tokio::io::duplex(4096);
        let (_ar, mut aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let right = FramedTransport::new(br, bw, StreamConfig::default());
        let mut events = collect(&right);

        let mut wire = BytesMut::new();
        encode_frame(7, b"\"other\"", &mut wire).unwrap();
        encode_frame(DEFAULT_LANE, b"\"mine\"", &mut wire).unwrap();
        aw.write_all(&wire).await.unwrap();

        assert_eq!(
            next(&mut events).await,
            TransportEvent::Message(WireMessage::Text("mine".into()))
        );
    }

    #[tokio::test]
    async fn oversized_message_is_rejected_on_send() {
        let small = StreamConfig {
            max_payload_size: 16,
            ..StreamConfig::default()
        };
        let (left, _right) = linked(small, StreamConfig::default());

        let err = left
            .send(WireMessage::Text("x".repeat(64)))
            .unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { max: 16, .. }));
    }

    #[tokio::test]
    async fn end_of_stream_reports_closed() {
        let (left, right) = linked(StreamConfig::default(), StreamConfig::default());
        let mut events = collect(&right);

        left.close();
        assert_eq!(next(&mut events).await, TransportEvent::Closed);
        assert!(matches!(
            left.send(WireMessage::Text("late".into())),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn drain_flushes_queued_frames_before_closing() {
        let (left, right) = linked(StreamConfig::default(), StreamConfig::default());
        let mut events = collect(&right);

        for n in 0..32 {
            left.send(WireMessage::Structured(json!({ "n": n }))).unwrap();
        }
        left.drain().await;

        for n in 0..32 {
            assert_eq!(
                next(&mut events).await,
                TransportEvent::Message(WireMessage::Structured(json!({ "n": n })))
            );
        }
        assert_eq!(next(&mut events).await, TransportEvent::Closed);
    }

    #[tokio::test]
    async fn corrupt_stream_reports_closed() {
        let (a, b) = tokio::io::duplex(4096);
        let (_ar, mut aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let right = FramedTransport::new(br, bw, StreamConfig::default());
        let mut events = collect(&right);

        aw.write_all(b"garbage!").await.unwrap();
        assert_eq!(next(&mut events).await, TransportEvent::Closed);
    }

    #[tokio::test]
    async fn policy_filters_unexpected_origin() {
        let guarded = StreamConfig {
            peer_origin: "native://unknown".into(),
            policy: OriginPolicy::any().with_origin("native://trusted"),
            ..StreamConfig::default()
        };
        let (left, right) = linked(StreamConfig::default(), guarded);
        let mut events = collect(&right);

        left.send(WireMessage::Text("dropped".into())).unwrap();
        left.close();
        assert_eq!(next(&mut events).await, TransportEvent::Closed);
    }

    #[tokio::test]
    async fn second_listener_is_rejected() {
        let (_left, right) = linked(StreamConfig::default(), StreamConfig::default());
        let _events = collect(&right);
        assert!(matches!(
            right.on_receive(Box::new(|_| {})),
            Err(TransportError::ListenerAlreadyRegistered)
        ));
    }
}
