//! Handlers every native bridge host answers.

use ctxbridge_peer::{sync_handler, ChannelBuilder, HandlerConfig, HandlerError};
use serde_json::{json, Value};

/// Liveness probe; answers `"pong"`.
pub const PING: &str = "Bridge.ping";
/// Returns its first argument unchanged. Accepts large payloads.
pub const ECHO: &str = "Bridge.echo";
/// Sums its numeric arguments.
pub const ADD: &str = "Math.add";

/// Register the built-in handlers on `builder`.
pub fn install(builder: ChannelBuilder) -> ChannelBuilder {
    builder
        .handler(PING, sync_handler(|_| Ok(json!("pong"))))
        .handler_with(
            ECHO,
            sync_handler(echo),
            HandlerConfig::default().min_args(1).large_payload(),
        )
        .handler_with(ADD, sync_handler(add), HandlerConfig::default().min_args(2))
}

fn echo(args: Vec<Value>) -> Result<Value, HandlerError> {
    Ok(args.into_iter().next().unwrap_or(Value::Null))
}

fn add(args: Vec<Value>) -> Result<Value, HandlerError> {
    let mut exact = Some(0i64);
    let mut total = 0f64;
    for (index, arg) in args.iter().enumerate() {
        let Some(n) = arg.as_f64() else {
            return Err(HandlerError::named(
                "TypeError",
                format!("argument {index} is not a number: {arg}"),
            ));
        };
        total += n;
        exact = exact
            .zip(arg.as_i64())
            .and_then(|(sum, n)| sum.checked_add(n));
    }
    Ok(match exact {
        Some(sum) => json!(sum),
        None => json!(total),
    })
}
