//! TCP transport for tagwire.
//!
//! This is the lowest layer of tagwire. It binds listeners, accepts
//! connections and dials peers over tokio TCP sockets. Framing and dispatch
//! build on top of the streams handed out here.

pub mod error;
pub mod tcp;

pub use error::{Result, TransportError};
pub use tcp::TcpTransport;
