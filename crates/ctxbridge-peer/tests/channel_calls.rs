use std::sync::Arc;
use std::time::Duration;

use ctxbridge_frame::{FramedTransport, StreamConfig};
use ctxbridge_peer::{
    args_hook, sync_handler, value_hook, CallHooks, CallOptions, Channel, ChannelBuilder, Handler,
    HandlerConfig, HandlerError, HandlerHooks, PeerError,
};
use ctxbridge_transport::memory::pair;
use ctxbridge_transport::{
    Encoding, Inbound, MemoryConfig, MemoryTransport, OriginPolicy, TransportError, WireMessage,
};
use futures_util::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn memory() -> (MemoryTransport, MemoryTransport) {
    pair(MemoryConfig::default(), MemoryConfig::default())
}

async fn connect_pair(page: ChannelBuilder, worker: ChannelBuilder) -> (Channel, Channel) {
    let (page, worker) = tokio::join!(page.connect(), worker.connect());
    (
        page.expect("page should connect"),
        worker.expect("worker should connect"),
    )
}

fn add(args: Vec<Value>) -> Result<Value, HandlerError> {
    let a = args[0].as_i64().ok_or_else(|| HandlerError::named("TypeError", "a is not a number"))?;
    let b = args[1].as_i64().ok_or_else(|| HandlerError::named("TypeError", "b is not a number"))?;
    Ok(json!(a + b))
}

fn worker_with_math(transport: MemoryTransport) -> ChannelBuilder {
    Channel::builder(transport)
        .label("worker")
        .handler("Math.add", sync_handler(add))
}

fn blob_handler(route: &'static str) -> impl Handler {
    sync_handler(move |args| {
        let len = args[0].as_str().map_or(0, str::len);
        Ok(json!({ "route": route, "len": len }))
    })
}

fn pseudo_random_text(len: usize) -> String {
    (0..len)
        .map(|i| char::from(b'!' + ((i * 7919 + i / 13) % 90) as u8))
        .collect()
}

#[tokio::test]
async fn math_add_resolves_to_handler_value() {
    let (page, worker) = memory();
    let (page, _worker) = connect_pair(Channel::builder(page), worker_with_math(worker)).await;

    let sum = page.call("Math.add", vec![json!(2), json!(3)]).await.unwrap();
    assert_eq!(sum, json!(5));
    assert_eq!(page.pending_calls(), 0);
}

#[tokio::test]
async fn handler_error_keeps_message_stack_and_fields() {
    let (page, worker) = memory();
    let (page, _worker) = connect_pair(
        Channel::builder(page),
        Channel::builder(worker).handler(
            "Files.read",
            sync_handler(|_| {
                Err(HandlerError::new("not found")
                    .with_stack("Error: not found\n    at read (files.rs:10)")
                    .with_field("path", "/tmp/missing")
                    .with_field("code", 404))
            }),
        ),
    )
    .await;

    let err = page.call("Files.read", vec![json!("/tmp/missing")]).await.unwrap_err();
    assert_eq!(err.to_string(), "not found");
    let remote = err.as_remote().expect("remote handler error");
    assert_eq!(remote.name, "Error");
    assert_eq!(remote.message, "not found");
    assert_eq!(remote.stack, "Error: not found\n    at read (files.rs:10)");
    assert_eq!(remote.field("path"), Some(&json!("/tmp/missing")));
    assert_eq!(remote.field("code"), Some(&json!(404)));
}

#[tokio::test]
async fn typed_handler_errors_and_panics_reach_the_caller() {
    let (page, worker) = memory();
    let (page, _worker) = connect_pair(
        Channel::builder(page),
        worker_with_math(worker).handler("Bad.panic", sync_handler(|_| panic!("handler exploded"))),
    )
    .await;

    let err = page.call("Math.add", vec![json!("two"), json!(3)]).await.unwrap_err();
    let remote = err.as_remote().unwrap();
    assert_eq!(remote.name, "TypeError");
    assert!(remote.stack.contains("Math.add"), "{}", remote.stack);

    let err = page.call("Bad.panic", vec![]).await.unwrap_err();
    assert_eq!(err.as_remote().unwrap().name, "Panic");

    // The handler side survives both.
    assert_eq!(page.call("Math.add", vec![json!(1), json!(1)]).await.unwrap(), json!(2));
}

#[tokio::test]
async fn success_values_shaped_like_failures_stay_successes() {
    let (page, worker) = memory();
    let (page, _worker) = connect_pair(
        Channel::builder(page),
        Channel::builder(worker)
            .handler("Odd.value", sync_handler(|_| Ok(json!(["error", {"message": "not really"}])))),
    )
    .await;

    let value = page.call("Odd.value", vec![]).await.unwrap();
    assert_eq!(value, json!(["error", {"message": "not really"}]));
}

#[tokio::test]
async fn concurrent_calls_resolve_with_their_own_results() {
    let (page, worker) = memory();
    let (page, _worker) = connect_pair(
        Channel::builder(page),
        Channel::builder(worker).handler("Echo.delayed", |args: Vec<Value>| async move {
            let delay = args[0].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, HandlerError>(args[1].clone())
        }),
    )
    .await;

    // The first call answers last.
    let (slow, fast) = tokio::join!(
        page.call("Echo.delayed", vec![json!(80), json!("first")]),
        page.call("Echo.delayed", vec![json!(5), json!("second")]),
    );
    assert_eq!(slow.unwrap(), json!("first"));
    assert_eq!(fast.unwrap(), json!("second"));

    let calls = (0..50u64).map(|i| {
        let page = page.clone();
        async move {
            let delay = (50 - i) % 7;
            page.call("Echo.delayed", vec![json!(delay), json!(i)]).await
        }
    });
    let results = join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), json!(i));
    }
    assert_eq!(page.pending_calls(), 0);
}

#[tokio::test]
async fn empty_and_deep_names_dispatch() {
    let (page, worker) = memory();
    let (page, _worker) = connect_pair(
        Channel::builder(page),
        Channel::builder(worker)
            .handler("", sync_handler(|_| Ok(json!("root"))))
            .handler("Translate.Web.detect.run", sync_handler(|_| Ok(json!("deep")))),
    )
    .await;

    assert_eq!(page.call("", vec![]).await.unwrap(), json!("root"));
    assert_eq!(page.call("Translate.Web.detect.run", vec![]).await.unwrap(), json!("deep"));
}

#[tokio::test]
async fn arguments_are_padded_to_min_args() {
    let (page, worker) = memory();
    let (page, _worker) = connect_pair(
        Channel::builder(page),
        Channel::builder(worker).handler_with(
            "Connector.save",
            sync_handler(|args| Ok(json!(args))),
            HandlerConfig::default().min_args(3),
        ),
    )
    .await;

    let args = page.call("Connector.save", vec![json!({"title": "x"})]).await.unwrap();
    assert_eq!(args, json!([{"title": "x"}, null, null]));
}

#[tokio::test]
async fn hooks_run_on_both_sides() {
    let (page, worker) = memory();
    let handler_hooks = HandlerHooks::default()
        .with_pre_receive(args_hook(|args: Vec<Value>| async move {
            // Rebuild the live object from its wire shape.
            Ok(vec![json!({ "url": args[0]["href"] })])
        }))
        .with_pre_send(value_hook(|value| async move {
            Ok(json!({ "status": 200, "body": value }))
        }));
    let call_hooks = CallHooks::default()
        .with_pre_send(args_hook(|args: Vec<Value>| async move {
            Ok(vec![json!({ "href": args[0] })])
        }))
        .with_post_receive(value_hook(|value| async move {
            let ok = value["status"] == 200;
            Ok(json!({ "response": value, "ok": ok }))
        }));

    let (page, _worker) = connect_pair(
        Channel::builder(page).call_options(
            "HTTP.request",
            CallOptions::default().with_hooks(call_hooks),
        ),
        Channel::builder(worker).handler_with(
            "HTTP.request",
            sync_handler(|args| Ok(json!(format!("fetched {}", args[0]["url"].as_str().unwrap_or("?"))))),
            HandlerConfig::default().with_hooks(handler_hooks),
        ),
    )
    .await;

    let value = page.call("HTTP.request", vec![json!("https://example.org")]).await.unwrap();
    assert_eq!(
        value,
        json!({
            "response": { "status": 200, "body": "fetched https://example.org" },
            "ok": true,
        })
    );
}

#[tokio::test]
async fn caller_hook_failure_is_a_transform_error() {
    let (page, worker) = memory();
    let (page, worker) = connect_pair(Channel::builder(page), worker_with_math(worker)).await;

    let hooks = CallHooks::default().with_pre_send(args_hook(|_| async {
        Err::<Vec<Value>, _>(HandlerError::new("cannot serialize live object"))
    }));
    let err = page
        .call_with("Math.add", vec![json!(1), json!(2)], CallOptions::default().with_hooks(hooks))
        .await
        .unwrap_err();
    assert!(
        matches!(err, PeerError::Transform { ref name, ref message } if name == "Math.add" && message.contains("live object"))
    );
    assert_eq!(worker.pending_calls(), 0);
}

#[tokio::test]
async fn notify_runs_handler_without_waiting() {
    let (page, worker) = memory();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (page, _worker) = connect_pair(
        Channel::builder(page),
        Channel::builder(worker).handler_with(
            "Log.write",
            move |args: Vec<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(args);
                    Ok::<_, HandlerError>(Value::Null)
                }
            },
            HandlerConfig::no_response(),
        ),
    )
    .await;

    page.notify("Log.write", vec![json!("hello")]).await.unwrap();
    assert_eq!(page.pending_calls(), 0);
    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, vec![json!("hello")]);
}

#[tokio::test]
async fn client_scopes_calls_to_a_namespace() {
    let (page, worker) = memory();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (page, _worker) = connect_pair(
        Channel::builder(page),
        worker_with_math(worker)
            .handler(
                "Math.describe",
                sync_handler(|args| Ok(json!({ "input": args[0], "even": args[0].as_i64().unwrap_or(1) % 2 == 0 }))),
            )
            .handler("Math.log", move |args: Vec<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(args);
                    Ok::<_, HandlerError>(Value::Null)
                }
            }),
    )
    .await;

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Description {
        input: i64,
        even: bool,
    }

    let math = page.client("Math");
    assert_eq!(math.namespace(), "Math");
    assert_eq!(math.call("add", vec![json!(20), json!(22)]).await.unwrap(), json!(42));
    assert_eq!(math.call_as::<i64>("add", vec![json!(2), json!(3)]).await.unwrap(), 5);
    assert_eq!(math.call_typed::<_, i64>("add", (7, 8)).await.unwrap(), 15);
    assert_eq!(
        math.call_typed::<_, Description>("describe", 4).await.unwrap(),
        Description { input: 4, even: true }
    );

    math.notify("log", vec![json!("saved")]).await.unwrap();
    let logged = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(logged, vec![json!("saved")]);
}

#[tokio::test]
async fn text_only_transport_carries_calls_and_errors() {
    let text = MemoryConfig {
        encoding: Encoding::TextOnly,
        ..MemoryConfig::default()
    };
    let (page, worker) = pair(text.clone(), text);
    let (page, _worker) = connect_pair(
        Channel::builder(page),
        worker_with_math(worker)
            .handler("Files.read", sync_handler(|_| Err(HandlerError::new("not found")))),
    )
    .await;

    assert_eq!(page.call("Math.add", vec![json!(2), json!(3)]).await.unwrap(), json!(5));
    let err = page.call("Files.read", vec![]).await.unwrap_err();
    assert_eq!(err.as_remote().unwrap().message, "not found");
}

#[tokio::test]
async fn spoofed_and_foreign_traffic_is_ignored() {
    let page_config = MemoryConfig {
        origin: "https://page.example".into(),
        policy: OriginPolicy::any().with_origin("chrome-extension://abc"),
        ..MemoryConfig::default()
    };
    let worker_config = MemoryConfig {
        origin: "chrome-extension://abc".into(),
        ..MemoryConfig::default()
    };
    let (page_transport, worker_transport) = pair(page_config, worker_config);
    let page_transport = Arc::new(page_transport);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (_page, _worker) = connect_pair(
        Channel::builder(Arc::clone(&page_transport)).handler("Page.alert", move |args: Vec<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(args[0].clone());
                Ok::<_, HandlerError>(Value::Null)
            }
        }),
        Channel::builder(worker_transport),
    )
    .await;

    let alert = |text: &str| WireMessage::Structured(json!({ "ctxbridge": [null, "Page.alert", [text]] }));
    let inject = |origin: &str, message: WireMessage| {
        page_transport
            .deliver_raw(Inbound {
                origin: origin.to_string(),
                source: None,
                message,
            })
            .unwrap();
    };

    inject("https://evil.example", alert("spoofed"));
    inject(
        "chrome-extension://abc",
        WireMessage::Structured(json!({ "other-protocol": [null, "Page.alert", ["foreign"]] })),
    );
    inject("chrome-extension://abc", WireMessage::Text("hello from a chat widget".into()));
    inject("chrome-extension://abc", WireMessage::Structured(json!({ "ctxbridge": "not an envelope" })));
    inject("chrome-extension://abc", alert("genuine"));

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, json!("genuine"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn chunked_payloads_arrive_byte_identical() {
    let limited = MemoryConfig {
        max_message_size: Some(1024),
        ..MemoryConfig::default()
    };
    let (page, worker) = pair(limited.clone(), limited);
    let (page, _worker) = connect_pair(
        Channel::builder(page).call_options("Blob.echo", CallOptions::default().large_payload()),
        Channel::builder(worker).handler_with(
            "Blob.echo",
            sync_handler(|args| Ok(args[0].clone())),
            HandlerConfig::default().large_payload(),
        ),
    )
    .await;

    for len in [0, 10, 600, 20_000] {
        let text = pseudo_random_text(len);
        let echoed = page.call("Blob.echo", vec![json!(text)]).await.unwrap();
        assert_eq!(echoed.as_str().map(str::as_bytes), Some(text.as_bytes()), "len {len}");
    }
}

#[tokio::test]
async fn oversized_unflagged_call_fails_with_transport_error() {
    let limited = MemoryConfig {
        max_message_size: Some(1024),
        ..MemoryConfig::default()
    };
    let (page, worker) = pair(limited.clone(), limited);
    let (page, _worker) = connect_pair(
        Channel::builder(page),
        Channel::builder(worker).handler("Blob.echo", sync_handler(|args| Ok(args[0].clone()))),
    )
    .await;

    let err = page
        .call("Blob.echo", vec![json!(pseudo_random_text(4096))])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PeerError::Transport(TransportError::MessageTooLarge { max: 1024, .. })
    ));
    assert_eq!(page.pending_calls(), 0);
}

#[tokio::test]
async fn auxiliary_channel_takes_oversized_calls() {
    let limited = MemoryConfig {
        max_message_size: Some(512),
        ..MemoryConfig::default()
    };
    let (page_primary, worker_primary) = pair(limited.clone(), limited);
    let (page_side, worker_side) = memory();

    let (page, _worker) = connect_pair(
        Channel::builder(page_primary).label("primary"),
        Channel::builder(worker_primary).handler_with(
            "Blob.put",
            blob_handler("primary"),
            HandlerConfig::default().large_payload(),
        ),
    )
    .await;
    let (side, _worker_side) = connect_pair(
        Channel::builder(page_side).label("side"),
        Channel::builder(worker_side).handler("Blob.put", blob_handler("side")),
    )
    .await;
    page.route_large_payloads_via(side);

    let large = CallOptions::default().large_payload();
    let big = page
        .call_with("Blob.put", vec![json!("b".repeat(4096))], large.clone())
        .await
        .unwrap();
    assert_eq!(big, json!({ "route": "side", "len": 4096 }));

    let small = page.call_with("Blob.put", vec![json!("small")], large).await.unwrap();
    assert_eq!(small, json!({ "route": "primary", "len": 5 }));
}

#[tokio::test]
async fn framed_stream_carries_calls_and_chunks() {
    let config = StreamConfig {
        max_payload_size: 2048,
        ..StreamConfig::default()
    };
    let (a, b) = tokio::io::duplex(256 * 1024);
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    let page = FramedTransport::new(a_read, a_write, config.clone());
    let worker = FramedTransport::new(b_read, b_write, config);

    let (page, _worker) = connect_pair(
        Channel::builder(page),
        Channel::builder(worker)
            .handler("Math.add", sync_handler(add))
            .handler_with(
                "Blob.echo",
                sync_handler(|args| Ok(args[0].clone())),
                HandlerConfig::default().large_payload(),
            ),
    )
    .await;

    assert_eq!(page.call("Math.add", vec![json!(40), json!(2)]).await.unwrap(), json!(42));

    let text = pseudo_random_text(30_000);
    let echoed = page
        .call_with("Blob.echo", vec![json!(text)], CallOptions::default().large_payload())
        .await
        .unwrap();
    assert_eq!(echoed, json!(text));
}
