use ctxbridge_frame::DEFAULT_MAX_PAYLOAD;
use ctxbridge_peer::{ChannelConfig, PROTOCOL_NAME};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("ctxbridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let defaults = ChannelConfig::default();
    println!("name: ctxbridge");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("protocol: {PROTOCOL_NAME}/{}", defaults.protocol_version);
    println!("envelope_tag: {}", defaults.tag);
    println!("max_payload: {DEFAULT_MAX_PAYLOAD}");
    println!(
        "target: {}",
        option_env!("CTXBRIDGE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);

    Ok(SUCCESS)
}
