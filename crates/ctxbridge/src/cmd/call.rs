use std::sync::Arc;
use std::time::Instant;

use ctxbridge_frame::FramedTransport;
use ctxbridge_peer::{CallOptions, Channel, ChannelConfig};
use ctxbridge_transport::UnixDomainSocket;
use serde_json::Value;
use tracing::debug;

use crate::cmd::{parse_duration, stream_config, CallArgs};
use crate::exit::{peer_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_result, OutputFormat};

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let call_args = parse_args(args.args.as_deref())?;

    let stream = tokio::time::timeout(timeout, UnixDomainSocket::connect(&args.path))
        .await
        .map_err(|_| CliError::new(TIMEOUT, format!("connect timed out after {timeout:?}")))?
        .map_err(|err| transport_error("connect failed", err))?;
    let transport = Arc::new(FramedTransport::from_unix(
        stream,
        stream_config(args.max_payload),
    ));

    let config = ChannelConfig {
        label: "cli".to_string(),
        handshake_timeout: timeout,
        call_timeout: timeout,
        ..ChannelConfig::default()
    };
    let channel = Channel::builder(Arc::clone(&transport))
        .config(config)
        .connect()
        .await
        .map_err(|err| peer_error("handshake failed", err))?;
    debug!(remote = ?channel.remote_instance(), name = %args.name, "calling");

    let mut options = if args.notify {
        CallOptions::fire_and_forget()
    } else {
        CallOptions::default()
    };
    if args.large {
        options = options.large_payload();
    }

    let started = Instant::now();
    let result = channel.call_with(&args.name, call_args, options).await;
    let elapsed = started.elapsed();

    channel.close();
    transport.drain().await;

    let value = result.map_err(|err| peer_error("call failed", err))?;
    if !args.notify {
        print_result(&args.name, &value, elapsed, format);
    }
    Ok(SUCCESS)
}

fn parse_args(raw: Option<&str>) -> CliResult<Vec<Value>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(single) => Ok(vec![single]),
        Err(err) => Err(CliError::new(USAGE, format!("--args is not valid JSON: {err}"))),
    }
}
