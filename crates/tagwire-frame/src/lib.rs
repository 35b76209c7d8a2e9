//! Packet buffers and tag/length framing for tagwire.
//!
//! Every message on the wire is framed as:
//! - A tag field (default 10 bytes, first 4 carry a little-endian `u32`)
//! - A length field (default 10 bytes, first 4 carry a little-endian `i32`)
//! - The body, `length` bytes long
//!
//! Bodies are built and parsed with [`PacketBuffer`]: sequential typed writes
//! on one side, the same sequence of typed reads on the other.

pub mod codec;
pub mod error;
#[cfg(feature = "async")]
pub mod framed;
pub mod packet;

pub use codec::{
    Frame, FrameCodec, FrameConfig, DEFAULT_FIELD_WIDTH, DEFAULT_PACKET_SIZE, FIELD_VALUE_SIZE,
};
pub use error::{BufferError, BufferResult, FrameError, Result};
pub use packet::PacketBuffer;
