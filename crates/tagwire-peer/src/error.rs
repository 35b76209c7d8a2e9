use std::fmt;

use crate::handler::HandlerError;

/// Which registration slot a duplicate registration collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A per-tag message handler.
    Tag(u32),
    /// The single connection-established handler.
    OnConnected,
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => write!(f, "tag {tag}"),
            Self::OnConnected => f.write_str("on-connected handler"),
        }
    }
}

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] tagwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] tagwire_frame::FrameError),

    /// Packet buffer error.
    #[error("buffer error: {0}")]
    Buffer(#[from] tagwire_frame::BufferError),

    /// Socket read or write failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A handler is already registered for this slot.
    #[error("duplicate registration for {0}")]
    DuplicateRegistration(Registration),

    /// Registration was attempted after `start()`.
    #[error("handlers cannot be registered after start")]
    AlreadyStarted,

    /// The client has not been started yet.
    #[error("peer is not started")]
    NotStarted,

    /// The peer was stopped and cannot be restarted.
    #[error("peer is stopped")]
    Stopped,

    /// No live connection has this id.
    #[error("no live connection with id {0}")]
    UnknownConnection(u64),

    /// A handler returned an error.
    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),
}

pub type Result<T> = std::result::Result<T, PeerError>;
