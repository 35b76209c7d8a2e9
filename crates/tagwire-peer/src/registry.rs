use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::{PeerError, Registration, Result};
use crate::handler::{
    ClientConnected, ClientConnectedHandler, HandlerResult, MessageContext, MessageHandler,
    ServerConnected, ServerConnectedHandler,
};

/// Maps tags to exactly one handler each, plus one connection-established slot.
///
/// `C` is the connection-established handler trait: the listener side uses
/// [`ServerRegistry`], the client side [`ClientRegistry`].
pub struct HandlerRegistry<C: ?Sized> {
    handlers: HashMap<u32, Arc<dyn MessageHandler>>,
    on_connected: Option<Arc<C>>,
}

/// Registry used by a listener.
pub type ServerRegistry = HandlerRegistry<dyn ClientConnectedHandler>;

/// Registry used by a client.
pub type ClientRegistry = HandlerRegistry<dyn ServerConnectedHandler>;

impl<C: ?Sized> Default for HandlerRegistry<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            on_connected: None,
        }
    }
}

impl<C: ?Sized> HandlerRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `tag`.
    ///
    /// Fails with [`PeerError::DuplicateRegistration`] if `tag` already has
    /// a handler; the existing one stays in place.
    pub fn register<H: MessageHandler>(&mut self, tag: u32, handler: H) -> Result<()> {
        match self.handlers.entry(tag) {
            Entry::Occupied(_) => Err(PeerError::DuplicateRegistration(Registration::Tag(tag))),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(handler));
                Ok(())
            }
        }
    }

    /// Set the connection-established handler. It can be set once.
    pub fn register_on_connected(&mut self, handler: Arc<C>) -> Result<()> {
        if self.on_connected.is_some() {
            return Err(PeerError::DuplicateRegistration(Registration::OnConnected));
        }
        self.on_connected = Some(handler);
        Ok(())
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.handlers.contains_key(&tag)
    }

    /// Registered tags, in no particular order.
    pub fn tags(&self) -> impl Iterator<Item = u32> + '_ {
        self.handlers.keys().copied()
    }

    pub fn has_on_connected(&self) -> bool {
        self.on_connected.is_some()
    }

    /// Invoke the handler for `ctx.tag`.
    ///
    /// Frames with an unregistered tag are dropped without error.
    pub async fn dispatch(&self, ctx: MessageContext<'_>) -> HandlerResult {
        let Some(handler) = self.handlers.get(&ctx.tag) else {
            trace!(tag = ctx.tag, id = ctx.connection.id(), "no handler for tag, frame dropped");
            return Ok(());
        };
        trace!(tag = ctx.tag, id = ctx.connection.id(), "dispatching frame");
        handler.on_message(ctx).await
    }
}

impl HandlerRegistry<dyn ClientConnectedHandler> {
    /// Invoke the connection-established handler, if set.
    pub async fn dispatch_connected(&self, ctx: ClientConnected<'_>) -> HandlerResult {
        match &self.on_connected {
            Some(handler) => handler.on_client_connected(ctx).await,
            None => Ok(()),
        }
    }
}

impl HandlerRegistry<dyn ServerConnectedHandler> {
    /// Invoke the connection-established handler, if set.
    pub async fn dispatch_connected(&self, ctx: ServerConnected<'_>) -> HandlerResult {
        match &self.on_connected {
            Some(handler) => handler.on_server_connected(ctx).await,
            None => Ok(()),
        }
    }
}

impl<C: ?Sized> std::fmt::Debug for HandlerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<u32> = self.tags().collect();
        tags.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("tags", &tags)
            .field("on_connected", &self.has_on_connected())
            .finish()
    }
}
