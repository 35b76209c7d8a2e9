//! Tagged, length-prefixed binary messaging over TCP.
//!
//! tagwire frames each message as a fixed-width tag field, a fixed-width
//! length field and a body, and dispatches incoming frames to one handler
//! per tag.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP bind, accept and connect
//! - [`frame`]: `PacketBuffer` typed encoding and the frame codec
//! - [`peer`]: Listener, client, handler registry and events (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use tagwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tagwire_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use tagwire_peer::*;
}
