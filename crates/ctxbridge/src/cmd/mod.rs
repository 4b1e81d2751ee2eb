use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use ctxbridge_frame::{StreamConfig, DEFAULT_MAX_PAYLOAD};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host the built-in bridge handlers on a Unix socket.
    Serve(ServeArgs),
    /// Call a method on a bridge host and print the result.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Call(args) => call::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// How long each connection may take to complete the handshake (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
    /// Largest frame payload in bytes; bigger large-payload messages are chunked.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Dotted method name, e.g. Math.add.
    pub name: String,
    /// Arguments as JSON. An array is spread; any other value is one argument.
    #[arg(long, value_name = "JSON")]
    pub args: Option<String>,
    /// Time allowed for connect, handshake and the call each (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Send without waiting for a response.
    #[arg(long)]
    pub notify: bool,
    /// Allow the request to be chunked when it exceeds the frame limit.
    #[arg(long)]
    pub large: bool,
    /// Largest frame payload in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show build and protocol details.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn stream_config(max_payload: usize) -> StreamConfig {
    StreamConfig {
        max_payload_size: max_payload,
        ..StreamConfig::default()
    }
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
