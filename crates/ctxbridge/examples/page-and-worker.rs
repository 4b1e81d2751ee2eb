//! Two contexts in one process: a page calling into a background worker.
//!
//! Run with:
//!   cargo run --example page-and-worker

use std::time::Duration;

use ctxbridge::peer::{sync_handler, CallOptions, HandlerError};
use ctxbridge::transport::memory::pair;
use ctxbridge::transport::MemoryConfig;
use ctxbridge::Channel;
use serde_json::{json, Value};

fn detect(args: Vec<Value>) -> Result<Value, HandlerError> {
    let text = args[0].as_str().unwrap_or_default();
    if text.is_empty() {
        return Err(HandlerError::named("RangeError", "nothing to detect").with_field("code", 4));
    }
    let lang = if text.chars().any(|c| matches!(c, 'ä' | 'ö' | 'ü' | 'ß')) {
        "de"
    } else {
        "en"
    };
    Ok(json!({ "lang": lang, "chars": text.chars().count() }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (page, worker) = pair(MemoryConfig::default(), MemoryConfig::default());

    let worker = Channel::builder(worker).label("worker").handler_with(
        "Lang.detect",
        sync_handler(detect),
        ctxbridge::peer::HandlerConfig::default().min_args(1),
    );
    let page = Channel::builder(page)
        .label("page")
        .call_options("Lang.detect", CallOptions::default().with_timeout(Duration::from_secs(2)));
    let (worker, page) = tokio::join!(worker.connect(), page.connect());
    let (_worker, page) = (worker?, page?);

    let lang = page.client("Lang");
    println!("{}", lang.call("detect", vec![json!("Grüße aus Köln")]).await?);

    match lang.call("detect", vec![json!("")]).await {
        Ok(value) => println!("unexpected success: {value}"),
        Err(err) => {
            let remote = err.as_remote().ok_or("expected a remote error")?;
            println!("{}: {} (code {:?})", remote.name, remote.message, remote.field("code"));
        }
    }
    Ok(())
}
