//! Native messaging host: serves the built-in bridge handlers over stdin/stdout.
//!
//! Run with:
//!   cargo run --example stdio-host
//!
//! The browser side (or any framed peer) must speak the same frame format and
//! send a ready signal; logs go to stderr so stdout stays a clean frame stream.

use ctxbridge::bridge;
use ctxbridge::frame::{FramedTransport, StreamConfig};
use ctxbridge::peer::ChannelConfig;
use ctxbridge::Channel;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = FramedTransport::stdio(StreamConfig::default());
    let config = ChannelConfig {
        label: "stdio-host".to_string(),
        ..ChannelConfig::default()
    };

    let channel = bridge::install(Channel::builder(transport).config(config))
        .connect()
        .await?;
    eprintln!(
        "Ready; remote instance {}",
        channel.remote_instance().unwrap_or_default()
    );

    channel.closed().await;
    eprintln!("Remote end closed the stream");
    Ok(())
}
