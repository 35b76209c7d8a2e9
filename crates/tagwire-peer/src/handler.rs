//! Handler contracts invoked by the connection loop.
//!
//! Handlers are plain trait objects registered per tag. Each call receives a
//! context borrowing the connection and the received bytes for the duration
//! of the call only; a handler that needs the bytes afterwards must copy them.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use tagwire_frame::PacketBuffer;

use crate::connection::ConnectionHandle;

/// Boxed future returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type handlers may fail with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for handler calls.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// One decoded frame handed to a [`MessageHandler`].
pub struct MessageContext<'a> {
    /// Connection the frame arrived on.
    pub connection: &'a ConnectionHandle,
    /// Tag the frame was dispatched on.
    pub tag: u32,
    /// Read-only view over the frame body.
    pub body: PacketBuffer<'a>,
    /// Empty buffer sized to the connection's maximum body, for a reply.
    pub response: &'a mut PacketBuffer<'static>,
}

/// Handles every frame carrying the tag it is registered for.
///
/// Frames on one connection are dispatched one at a time: the next read is
/// armed only after the returned future completes.
///
/// ```
/// use tagwire_peer::{BoxFuture, HandlerResult, MessageContext, MessageHandler};
///
/// struct Doubler;
///
/// impl MessageHandler for Doubler {
///     fn on_message<'a>(&'a self, mut ctx: MessageContext<'a>) -> BoxFuture<'a, HandlerResult> {
///         Box::pin(async move {
///             let value = ctx.body.read_i32()?;
///             ctx.response.write_i32(value * 2)?;
///             ctx.connection.send_frame(ctx.tag, ctx.response).await?;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message<'a>(&'a self, ctx: MessageContext<'a>) -> BoxFuture<'a, HandlerResult>;
}

/// A client was accepted by a listener.
pub struct ClientConnected<'a> {
    pub connection: &'a ConnectionHandle,
    /// Empty buffer for an immediate greeting.
    pub greeting: &'a mut PacketBuffer<'static>,
    /// Connections accepted so far, this one included.
    pub total_connections: u64,
    pub peer_addr: SocketAddr,
}

/// Server-side connection-established handler.
pub trait ClientConnectedHandler: Send + Sync + 'static {
    fn on_client_connected<'a>(
        &'a self,
        ctx: ClientConnected<'a>,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// A client finished connecting to a server.
///
/// Nothing has been read yet when this fires, so the fields describe an
/// all-zero receive buffer: `tag` and `body_length` are `0` and `initial`
/// is empty.
pub struct ServerConnected<'a> {
    pub connection: &'a ConnectionHandle,
    pub initial: PacketBuffer<'a>,
    pub tag: u32,
    pub body_length: i32,
    /// The receive buffer snapshot, `packet_size` bytes.
    pub raw: &'a [u8],
}

/// Client-side connection-established handler.
pub trait ServerConnectedHandler: Send + Sync + 'static {
    fn on_server_connected<'a>(
        &'a self,
        ctx: ServerConnected<'a>,
    ) -> BoxFuture<'a, HandlerResult>;
}
