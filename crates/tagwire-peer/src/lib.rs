//! Listener, client and per-tag dispatch over tagwire frames.
//!
//! A [`Listener`] accepts many connections and a [`Client`] dials one. Both
//! run one read loop per connection that reassembles frames, hands each one
//! to the [`MessageHandler`] registered for its tag, and reports everything
//! else through [`PeerEvent`] subscribers.

pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod events;
pub mod handler;
pub mod listener;
pub mod registry;

pub use config::{PeerConfig, DEFAULT_PORT};
pub use connection::ConnectionHandle;
pub use connector::{Client, CLIENT_CONNECTION_ID};
pub use error::{PeerError, Registration, Result};
pub use events::{PeerEvent, Subscriber};
pub use handler::{
    BoxFuture, ClientConnected, ClientConnectedHandler, HandlerError, HandlerResult,
    MessageContext, MessageHandler, ServerConnected, ServerConnectedHandler,
};
pub use listener::Listener;
pub use registry::{ClientRegistry, HandlerRegistry, ServerRegistry};
