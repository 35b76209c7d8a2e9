use std::sync::Arc;

use tagwire_frame::{FrameCodec, PacketBuffer};
use tagwire_transport::TcpTransport;
use tokio::task::JoinHandle;

use crate::config::PeerConfig;
use crate::connection::{ConnectionHandle, Shared};
use crate::error::{PeerError, Result};
use crate::events::{PeerEvent, Subscriber};
use crate::handler::{MessageHandler, ServerConnected, ServerConnectedHandler};

type ClientShared = Shared<dyn ServerConnectedHandler>;

/// Id reported for a client's single connection.
pub const CLIENT_CONNECTION_ID: u64 = 0;

/// Dials one server and runs the read loop for that connection.
///
/// Lifecycle is `Created -> Started -> Stopped`; `Stopped` is terminal.
pub struct Client {
    config: PeerConfig,
    codec: FrameCodec,
    shared: Arc<ClientShared>,
    state: State,
}

enum State {
    Created,
    Started {
        conn: ConnectionHandle,
        read_task: JoinHandle<()>,
    },
    Stopped,
}

impl Client {
    pub fn new(config: PeerConfig) -> Result<Self> {
        let codec = FrameCodec::new(config.frame)?;
        Ok(Self {
            config,
            codec,
            shared: Arc::new(ClientShared::default()),
            state: State::Created,
        })
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Register `handler` for frames tagged `tag`.
    pub fn register<H: MessageHandler>(&mut self, tag: u32, handler: H) -> Result<()> {
        self.shared_mut()?.registry.register(tag, handler)
    }

    /// Set the handler fired once the connection is established.
    pub fn register_on_server_connected<H: ServerConnectedHandler>(
        &mut self,
        handler: H,
    ) -> Result<()> {
        let handler: Arc<dyn ServerConnectedHandler> = Arc::new(handler);
        self.shared_mut()?.registry.register_on_connected(handler)
    }

    /// Add an event subscriber.
    pub fn subscribe<F>(&mut self, subscriber: F) -> Result<()>
    where
        F: Fn(&PeerEvent<'_>) + Send + Sync + 'static,
    {
        let subscriber: Subscriber = Arc::new(subscriber);
        self.shared_mut()?.subscribers.push(subscriber);
        Ok(())
    }

    fn shared_mut(&mut self) -> Result<&mut ClientShared> {
        if !matches!(self.state, State::Created) {
            return Err(PeerError::AlreadyStarted);
        }
        Arc::get_mut(&mut self.shared).ok_or(PeerError::AlreadyStarted)
    }

    /// Connect, start reading, then fire the connected handler.
    ///
    /// A second call while started is a no-op. Fails with
    /// [`PeerError::Stopped`] after [`Client::stop`].
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            State::Started { .. } => return Ok(()),
            State::Stopped => return Err(PeerError::Stopped),
            State::Created => {}
        }

        let addr = self.config.socket_addr();
        let stream = TcpTransport::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        let conn = ConnectionHandle::new(CLIENT_CONNECTION_ID, addr, self.codec, writer);

        self.shared.subscribers.emit(&PeerEvent::Connected {
            id: CLIENT_CONNECTION_ID,
            peer: addr,
        });

        let shared = Arc::clone(&self.shared);
        let read_task = {
            let conn = conn.clone();
            tokio::spawn(async move { shared.read_loop(&conn, reader).await })
        };
        self.state = State::Started {
            conn: conn.clone(),
            read_task,
        };

        self.dispatch_connected(&conn).await;
        Ok(())
    }

    /// The read loop is already armed, so the handler may wait for replies.
    /// It still sees an all-zero receive snapshot: the snapshot is taken
    /// before anything is handed to it.
    async fn dispatch_connected(&self, conn: &ConnectionHandle) {
        let snapshot = vec![0u8; self.codec.config().packet_size];
        let decoded = self.codec.decode_header(&snapshot).and_then(|tag| {
            let body_length = self.codec.decode_length(&snapshot)?;
            let body = self.codec.decode_body(&snapshot, body_length)?;
            Ok((tag, body_length, body))
        });

        let result = match decoded {
            Ok((tag, body_length, body)) => {
                let ctx = ServerConnected {
                    connection: conn,
                    initial: PacketBuffer::view(body),
                    tag,
                    body_length,
                    raw: &snapshot,
                };
                self.shared
                    .registry
                    .dispatch_connected(ctx)
                    .await
                    .map_err(PeerError::Handler)
            }
            Err(err) => Err(err.into()),
        };

        if let Err(err) = result {
            self.shared
                .subscribers
                .exception(Some(CLIENT_CONNECTION_ID), &err);
        }
    }

    /// Close the connection and wait for the read loop to finish. Idempotent.
    pub async fn stop(&mut self) {
        if let State::Started { conn, read_task } =
            std::mem::replace(&mut self.state, State::Stopped)
        {
            conn.stop();
            // The read loop never panics; a join error here means it was aborted.
            let _ = read_task.await;
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self.state, State::Started { .. })
    }

    /// The live connection, once started.
    pub fn connection(&self) -> Option<&ConnectionHandle> {
        match &self.state {
            State::Started { conn, .. } => Some(conn),
            _ => None,
        }
    }

    fn started(&self) -> Result<&ConnectionHandle> {
        match &self.state {
            State::Started { conn, .. } => Ok(conn),
            State::Created => Err(PeerError::NotStarted),
            State::Stopped => Err(PeerError::Stopped),
        }
    }

    /// Fresh writable buffer sized to the maximum body.
    pub fn new_packet(&self) -> PacketBuffer<'static> {
        PacketBuffer::new(self.codec.config().max_body_size())
    }

    /// See [`ConnectionHandle::send_frame`].
    pub async fn send_frame(&self, tag: u32, packet: &mut PacketBuffer<'_>) -> Result<()> {
        self.started()?.send_frame(tag, packet).await
    }

    pub async fn send_bytes(&self, tag: u32, payload: &[u8]) -> Result<()> {
        self.started()?.send_bytes(tag, payload).await
    }

    pub async fn send_bytes_with_len(&self, tag: u32, payload: &[u8], len: usize) -> Result<()> {
        self.started()?
            .send_bytes_with_len(tag, payload, len)
            .await
    }

    /// Wait until the server closes the connection or the client is stopped.
    pub async fn closed(&self) {
        if let State::Started { conn, .. } = &self.state {
            conn.closed().await;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let State::Started { conn, .. } = &self.state {
            conn.stop();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("started", &self.is_started())
            .field("registry", &self.shared.registry)
            .finish()
    }
}
