use ctxbridge::bridge;
use ctxbridge_frame::FramedTransport;
use ctxbridge_peer::{Channel, ChannelConfig};
use ctxbridge_transport::UnixDomainSocket;
use tracing::{info, warn};

use crate::cmd::{parse_duration, stream_config, ServeArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_connection, OutputFormat};

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let handshake_timeout = parse_duration(&args.handshake_timeout)?;
    let socket =
        UnixDomainSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = ?socket.path(), "serving native bridge");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut accepted = 0u64;
    loop {
        let stream = tokio::select! {
            _ = &mut shutdown => break,
            result = socket.accept() => result.map_err(|err| transport_error("accept failed", err))?,
        };
        accepted += 1;

        let transport = FramedTransport::from_unix(stream, stream_config(args.max_payload));
        let config = ChannelConfig {
            label: format!("conn-{accepted}"),
            handshake_timeout,
            ..ChannelConfig::default()
        };
        tokio::spawn(serve_connection(transport, config, format));
    }

    info!(connections = accepted, "shutting down");
    Ok(SUCCESS)
}

async fn serve_connection(transport: FramedTransport, config: ChannelConfig, format: OutputFormat) {
    let label = config.label.clone();
    let channel = match bridge::install(Channel::builder(transport).config(config))
        .connect()
        .await
    {
        Ok(channel) => channel,
        Err(err) => {
            warn!(connection = %label, error = %err, "connection failed handshake");
            return;
        }
    };

    let remote = channel.remote_instance();
    print_connection(&label, "ready", remote.as_deref(), format);
    channel.closed().await;
    print_connection(&label, "closed", remote.as_deref(), format);
}
