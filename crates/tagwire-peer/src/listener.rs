use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tagwire_frame::FrameCodec;
use tagwire_transport::TcpTransport;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PeerConfig;
use crate::connection::{ConnectionHandle, Shared};
use crate::error::{PeerError, Result};
use crate::events::{PeerEvent, Subscriber};
use crate::handler::{ClientConnected, ClientConnectedHandler, MessageHandler};

type ServerShared = Shared<dyn ClientConnectedHandler>;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepts connections and runs one read loop per connection.
///
/// Handlers and subscribers are registered before [`Listener::start`];
/// afterwards the listener only accepts, tracks and sends.
///
/// ```no_run
/// # async fn run() -> tagwire_peer::Result<()> {
/// use tagwire_peer::{Listener, PeerConfig};
///
/// let mut listener = Listener::new(PeerConfig::default())?;
/// listener.subscribe(|event| println!("{event:?}"))?;
/// let addr = listener.start().await?;
/// println!("listening on {addr}");
/// # Ok(())
/// # }
/// ```
pub struct Listener {
    config: PeerConfig,
    codec: FrameCodec,
    shared: Arc<ServerShared>,
    table: Arc<ConnectionTable>,
    state: State,
}

enum State {
    Idle,
    Running {
        local_addr: SocketAddr,
        accept_stop: CancellationToken,
        accept_task: JoinHandle<()>,
    },
    Stopped,
}

/// Accept counter and live connections.
///
/// Only the accept loop inserts; each connection task removes itself when
/// its read loop ends.
#[derive(Default)]
struct ConnectionTable {
    total: AtomicU64,
    live: Mutex<BTreeMap<u64, ConnectionHandle>>,
}

impl ConnectionTable {
    fn next_id(&self) -> u64 {
        self.total.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn insert(&self, conn: ConnectionHandle) {
        self.lock().insert(conn.id(), conn);
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn get(&self, id: u64) -> Option<ConnectionHandle> {
        self.lock().get(&id).cloned()
    }

    fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, ConnectionHandle>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Listener {
    /// Create a listener for `config`. Nothing is bound until [`Listener::start`].
    pub fn new(config: PeerConfig) -> Result<Self> {
        let codec = FrameCodec::new(config.frame)?;
        Ok(Self {
            config,
            codec,
            shared: Arc::new(ServerShared::default()),
            table: Arc::new(ConnectionTable::default()),
            state: State::Idle,
        })
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Register `handler` for frames tagged `tag`.
    pub fn register<H: MessageHandler>(&mut self, tag: u32, handler: H) -> Result<()> {
        self.shared_mut()?.registry.register(tag, handler)
    }

    /// Set the handler fired once per accepted connection, before its first read.
    pub fn register_on_client_connected<H: ClientConnectedHandler>(
        &mut self,
        handler: H,
    ) -> Result<()> {
        let handler: Arc<dyn ClientConnectedHandler> = Arc::new(handler);
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

    fn shared_mut(&mut self) -> Result<&mut ServerShared> {
        if !matches!(self.state, State::Idle) {
            return Err(PeerError::AlreadyStarted);
        }
        Arc::get_mut(&mut self.shared).ok_or(PeerError::AlreadyStarted)
    }

    /// Bind and start accepting. Returns the bound address.
    ///
    /// Calling `start` on a running listener returns the same address without
    /// binding again. A stopped listener cannot be restarted.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        match &self.state {
            State::Running { local_addr, .. } => return Ok(*local_addr),
            State::Stopped => return Err(PeerError::Stopped),
            State::Idle => {}
        }

        let transport = TcpTransport::bind(self.config.socket_addr()).await?;
        let local_addr = transport.local_addr();
        let accept_stop = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            transport,
            self.codec,
            Arc::clone(&self.shared),
            Arc::clone(&self.table),
            accept_stop.clone(),
        ));

        self.state = State::Running {
            local_addr,
            accept_stop,
            accept_task,
        };
        Ok(local_addr)
    }

    /// Stop accepting new connections. Live connections keep running.
    ///
    /// Idempotent. Use [`Listener::shutdown`] to close live connections too.
    pub async fn stop(&mut self) {
        if let State::Running {
            accept_stop,
            accept_task,
            ..
        } = std::mem::replace(&mut self.state, State::Stopped)
        {
            accept_stop.cancel();
            // The accept loop never panics; a join error here means it was aborted.
            let _ = accept_task.await;
            info!("listener stopped accepting");
        }
        self.state = State::Stopped;
    }

    /// Stop accepting and stop every live connection.
    pub async fn shutdown(&mut self) {
        self.stop().await;
        for conn in self.table.snapshot() {
            conn.stop();
        }
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.state {
            State::Running { local_addr, .. } => Some(local_addr),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// Connections accepted so far, including ones that have since closed.
    pub fn total_connections(&self) -> u64 {
        self.table.total.load(Ordering::Relaxed)
    }

    /// Snapshot of live connections, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.table.snapshot()
    }

    pub fn connection(&self, id: u64) -> Option<ConnectionHandle> {
        self.table.get(id)
    }

    /// Send `payload` on `conn`, truncated to `len` bytes when given.
    pub async fn send_to(
        &self,
        conn: &ConnectionHandle,
        tag: u32,
        payload: &[u8],
        len: Option<usize>,
    ) -> Result<()> {
        match len {
            Some(len) => conn.send_bytes_with_len(tag, payload, len).await,
            None => conn.send_bytes(tag, payload).await,
        }
    }

    /// [`Listener::send_to`] by connection id.
    pub async fn send_to_id(
        &self,
        id: u64,
        tag: u32,
        payload: &[u8],
        len: Option<usize>,
    ) -> Result<()> {
        let conn = self
            .table
            .get(id)
            .ok_or(PeerError::UnknownConnection(id))?;
        self.send_to(&conn, tag, payload, len).await
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let State::Running { accept_stop, .. } = &self.state {
            accept_stop.cancel();
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .field("registry", &self.shared.registry)
            .field("total_connections", &self.total_connections())
            .finish()
    }
}

async fn accept_loop(
    transport: TcpTransport,
    codec: FrameCodec,
    shared: Arc<ServerShared>,
    table: Arc<ConnectionTable>,
    stop: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            accepted = transport.accept() => accepted,
        };

        let (stream, peer_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                shared.subscribers.exception(None, &err.into());
                if !accept_backoff(&stop).await {
                    break;
                }
                continue;
            }
        };

        let total_connections = table.next_id();
        let (reader, writer) = stream.into_split();
        let conn = ConnectionHandle::new(total_connections, peer_addr, codec, writer);
        table.insert(conn.clone());
        debug!(id = total_connections, %peer_addr, "connection registered");

        let shared = Arc::clone(&shared);
        let table = Arc::clone(&table);
        tokio::spawn(async move {
            shared.subscribers.emit(&PeerEvent::Connected {
                id: conn.id(),
                peer: peer_addr,
            });

            let mut greeting = conn.new_packet();
            let ctx = ClientConnected {
                connection: &conn,
                greeting: &mut greeting,
                total_connections,
                peer_addr,
            };
            if let Err(err) = shared.registry.dispatch_connected(ctx).await {
                shared
                    .subscribers
                    .exception(Some(conn.id()), &PeerError::Handler(err));
            }

            shared.read_loop(&conn, reader).await;
            table.remove(conn.id());
        });
    }
    debug!("accept loop ended");
}

/// Pause after a failed accept so persistent failures (fd exhaustion) do not
/// spin. Returns `false` if the listener was stopped meanwhile.
async fn accept_backoff(stop: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    use tagwire_frame::{Frame, PacketBuffer};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_util::codec::Decoder;

    use super::*;
    use crate::error::Registration;
    use crate::handler::{BoxFuture, HandlerResult, MessageContext};

    struct CountGreeting;

    impl ClientConnectedHandler for CountGreeting {
        fn on_client_connected<'a>(
            &'a self,
            ctx: ClientConnected<'a>,
        ) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move {
                ctx.greeting.write_u64(ctx.total_connections)?;
                ctx.connection.send_frame(1, ctx.greeting).await?;
                Ok(())
            })
        }
    }

    struct Noop;

    impl MessageHandler for Noop {
        fn on_message<'a>(&'a self, _ctx: MessageContext<'a>) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async { Ok(()) })
        }
    }

    /// Writes back on the frame's tag until the write fails.
    struct Flood;

    impl MessageHandler for Flood {
        fn on_message<'a>(&'a self, ctx: MessageContext<'a>) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move {
                while ctx.connection.send_bytes(ctx.tag, &[0xAB; 1000]).await.is_ok() {}
                Ok(())
            })
        }
    }

    fn ephemeral() -> PeerConfig {
        PeerConfig {
            port: 0,
            ..PeerConfig::default()
        }
    }

    async fn read_frame(stream: &mut TcpStream) -> Frame {
        let mut codec = FrameCodec::default();
        let mut buf = bytes::BytesMut::new();
        loop {
            if let Some(frame) = codec.decode(&mut buf).expect("frame should decode") {
                return frame;
            }
            let n = stream.read_buf(&mut buf).await.expect("read should succeed");
            assert!(n > 0, "listener closed the connection");
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn accept_backoff_waits_unless_stopped() {
        let stop = CancellationToken::new();
        let started = Instant::now();
        assert!(accept_backoff(&stop).await);
        assert!(started.elapsed() >= ACCEPT_RETRY_DELAY);

        stop.cancel();
        let started = Instant::now();
        assert!(!accept_backoff(&stop).await);
        assert!(started.elapsed() < ACCEPT_RETRY_DELAY);
    }

    #[tokio::test]
    async fn greets_each_client_with_running_count() {
        let mut listener = Listener::new(ephemeral()).expect("listener should build");
        listener
            .register_on_client_connected(CountGreeting)
            .expect("registration should succeed");
        let addr = listener.start().await.expect("listener should start");

        for expected in 1..=2u64 {
            let mut client = TcpStream::connect(addr).await.expect("client should connect");
            let frame = read_frame(&mut client).await;
            assert_eq!(frame.tag, 1);
            let mut view = PacketBuffer::view(&frame.payload);
            assert_eq!(view.read_u64().expect("count should decode"), expected);
        }

        assert_eq!(listener.total_connections(), 2);
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_is_terminal() {
        let mut listener = Listener::new(ephemeral()).expect("listener should build");
        let first = listener.start().await.expect("first start should succeed");
        let second = listener.start().await.expect("second start should be a no-op");
        assert_eq!(first, second);
        assert!(listener.is_running());

        listener.stop().await;
        listener.stop().await;
        assert!(!listener.is_running());
        assert!(matches!(listener.start().await, Err(PeerError::Stopped)));
        assert!(TcpStream::connect(first).await.is_err());
    }

    #[tokio::test]
    async fn registration_closes_at_start() {
        let mut listener = Listener::new(ephemeral()).expect("listener should build");
        listener.register(2, Noop).expect("registration should succeed");
        assert!(matches!(
            listener.register(2, Noop),
            Err(PeerError::DuplicateRegistration(Registration::Tag(2)))
        ));

        listener.start().await.expect("listener should start");
        assert!(matches!(
            listener.register(3, Noop),
            Err(PeerError::AlreadyStarted)
        ));
        assert!(matches!(
            listener.subscribe(|_| {}),
            Err(PeerError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn tracks_live_connections_and_sends_by_id() {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut listener = Listener::new(ephemeral()).expect("listener should build");
        listener
            .subscribe(move |event| {
                if let PeerEvent::Connected { id, .. } | PeerEvent::Disconnected { id } = event {
                    sink.lock().expect("lock should not be poisoned").push(*id);
                }
            })
            .expect("subscribe should succeed");
        let addr = listener.start().await.expect("listener should start");

        let mut client = TcpStream::connect(addr).await.expect("client should connect");
        wait_until(|| listener.connections().len() == 1).await;
        let conn = listener.connection(1).expect("connection 1 should be live");
        assert_eq!(conn.id(), 1);

        listener
            .send_to_id(1, 6, b"hello world", Some(5))
            .await
            .expect("send should succeed");
        let frame = read_frame(&mut client).await;
        assert_eq!(frame, Frame::new(6, &b"hello"[..]));

        assert!(matches!(
            listener.send_to_id(9, 6, b"x", None).await,
            Err(PeerError::UnknownConnection(9))
        ));

        client.shutdown().await.expect("client should shut down");
        drop(client);
        wait_until(|| listener.connections().is_empty()).await;
        assert_eq!(listener.total_connections(), 1);
        assert_eq!(*events.lock().unwrap(), vec![1, 1]);

        listener.stop().await;
    }

    #[tokio::test]
    async fn stop_keeps_live_connections_and_shutdown_closes_them() {
        let mut listener = Listener::new(ephemeral()).expect("listener should build");
        let addr = listener.start().await.expect("listener should start");

        let mut client = TcpStream::connect(addr).await.expect("client should connect");
        wait_until(|| listener.connections().len() == 1).await;

        listener.stop().await;
        listener
            .send_to_id(1, 3, b"still here", None)
            .await
            .expect("live connection should survive stop");
        assert_eq!(read_frame(&mut client).await.tag, 3);

        listener.shutdown().await;
        let mut rest = Vec::new();
        let n = client
            .read_to_end(&mut rest)
            .await
            .expect("read should see the close");
        assert_eq!(n, 0);
        wait_until(|| listener.connections().is_empty()).await;
    }

    #[tokio::test]
    async fn shutdown_closes_a_connection_blocked_on_write() {
        let mut listener = Listener::new(ephemeral()).expect("listener should build");
        listener.register(8, Flood).expect("registration should succeed");
        let addr = listener.start().await.expect("listener should start");

        // send one frame, then never read the flood
        let mut client = TcpStream::connect(addr).await.expect("client should connect");
        let trigger = FrameCodec::default()
            .encode_to_bytes(8, b"go")
            .expect("frame should encode");
        client.write_all(&trigger).await.expect("trigger should send");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(listener.connections().len(), 1);

        listener.shutdown().await;
        wait_until(|| listener.connections().is_empty()).await;
        drop(client);
    }
}
