use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use tagwire_frame::{FrameConfig, DEFAULT_FIELD_WIDTH, DEFAULT_PACKET_SIZE};
use tagwire_peer::{PeerConfig, DEFAULT_PORT};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a server that echoes frames back on the listed tags.
    Echo(EchoArgs),
    /// Connect and send a single frame.
    Send(SendArgs),
    /// Start a server and print received frames.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Address and frame layout, shared by every networked subcommand.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Address to bind (servers) or connect to (send).
    #[arg(long, env = "TAGWIRE_ADDRESS", default_value = "127.0.0.1")]
    pub address: IpAddr,
    /// TCP port.
    #[arg(long, short = 'p', env = "TAGWIRE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Largest frame, tag and length fields included.
    #[arg(long, env = "TAGWIRE_PACKET_SIZE", default_value_t = DEFAULT_PACKET_SIZE)]
    pub packet_size: usize,
    /// Bytes reserved for the tag field.
    #[arg(long, env = "TAGWIRE_HEADER_WIDTH", default_value_t = DEFAULT_FIELD_WIDTH)]
    pub header_width: usize,
    /// Bytes reserved for the length field.
    #[arg(long, env = "TAGWIRE_LENGTH_WIDTH", default_value_t = DEFAULT_FIELD_WIDTH)]
    pub length_width: usize,
}

impl ConnectionArgs {
    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            address: self.address,
            port: self.port,
            frame: FrameConfig {
                packet_size: self.packet_size,
                header_field_width: self.header_width,
                length_field_width: self.length_width,
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Tags to echo (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub tags: Vec<u32>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Tag to send under.
    #[arg(long, short = 't')]
    pub tag: u32,
    /// Raw body bytes, taken from the UTF-8 text as given.
    #[arg(long, conflicts_with_all = ["string", "file"])]
    pub data: Option<String>,
    /// Body holding one length-prefixed string.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub string: Option<String>,
    /// Read raw body bytes from a file.
    #[arg(long, conflicts_with_all = ["data", "string"])]
    pub file: Option<PathBuf>,
    /// Wait for one reply frame and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Only print frames with these tags (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub tags: Option<Vec<u32>>,
    /// Greet each client with a frame on this tag carrying the connection count (u64).
    #[arg(long)]
    pub greeting_tag: Option<u32>,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
