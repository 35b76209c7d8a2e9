use tagwire_frame::{DEFAULT_FIELD_WIDTH, DEFAULT_PACKET_SIZE};
use tagwire_peer::DEFAULT_PORT;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("tagwire {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("default_port: {DEFAULT_PORT}");
    println!("default_packet_size: {DEFAULT_PACKET_SIZE}");
    println!("default_field_width: {DEFAULT_FIELD_WIDTH}");
    println!("byte_order: little-endian");

    Ok(SUCCESS)
}
