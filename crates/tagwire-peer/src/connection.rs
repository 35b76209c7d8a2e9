use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tagwire_frame::{BufferError, Frame, FrameCodec, FrameError, PacketBuffer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{PeerError, Result};
use crate::events::{PeerEvent, Subscribers};
use crate::handler::MessageContext;
use crate::registry::HandlerRegistry;

/// Handle to one live connection.
///
/// Cheap to clone; every clone refers to the same socket. Writes from
/// different clones are serialized so frames never interleave.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    peer_addr: SocketAddr,
    codec: FrameCodec,
    writer: Mutex<Option<OwnedWriteHalf>>,
    stop: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: u64,
        peer_addr: SocketAddr,
        codec: FrameCodec,
        writer: OwnedWriteHalf,
    ) -> Self {
        Self::with_writer(id, peer_addr, codec, Some(writer))
    }

    /// A handle with no socket behind it. Sends fail with [`PeerError::Stopped`].
    #[cfg(test)]
    pub(crate) fn detached(id: u64, codec: FrameCodec) -> Self {
        Self::with_writer(id, SocketAddr::from(([127, 0, 0, 1], 0)), codec, None)
    }

    fn with_writer(
        id: u64,
        peer_addr: SocketAddr,
        codec: FrameCodec,
        writer: Option<OwnedWriteHalf>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                peer_addr,
                codec,
                writer: Mutex::new(writer),
                stop: CancellationToken::new(),
            }),
        }
    }

    /// Ordinal id: `1..` on a listener, `0` for a client's connection.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.inner.codec
    }

    /// Largest body a frame on this connection may carry.
    pub fn max_body_size(&self) -> usize {
        self.inner.codec.config().max_body_size()
    }

    /// Fresh writable buffer sized to [`Self::max_body_size`].
    pub fn new_packet(&self) -> PacketBuffer<'static> {
        PacketBuffer::new(self.max_body_size())
    }

    /// Send the bytes written to `packet` as one frame, then reset `packet`
    /// for the next message.
    ///
    /// Only the written bytes are sent, not the whole capacity.
    pub async fn send_frame(&self, tag: u32, packet: &mut PacketBuffer<'_>) -> Result<()> {
        if !packet.is_writable() {
            return Err(BufferError::ReadOnlyViolation.into());
        }
        self.send_bytes(tag, packet.written()).await?;
        packet.reset();
        Ok(())
    }

    /// Send `payload` as one frame.
    ///
    /// A write still pending when the connection is stopped is abandoned and
    /// fails with [`PeerError::Stopped`].
    pub async fn send_bytes(&self, tag: u32, payload: &[u8]) -> Result<()> {
        let wire = self.inner.codec.encode_to_bytes(tag, payload)?;

        tokio::select! {
            biased;
            _ = self.inner.stop.cancelled() => return Err(PeerError::Stopped),
            written = self.write_wire(&wire) => written?,
        }

        trace!(id = self.id(), tag, len = payload.len(), "frame sent");
        Ok(())
    }

    async fn write_wire(&self, wire: &[u8]) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        let stream = writer.as_mut().ok_or(PeerError::Stopped)?;
        stream.write_all(wire).await?;
        Ok(())
    }

    /// Send the first `len` bytes of `payload` as one frame.
    ///
    /// Fails with [`FrameError::InvalidLength`] if `len` exceeds the payload.
    pub async fn send_bytes_with_len(&self, tag: u32, payload: &[u8], len: usize) -> Result<()> {
        let body = payload
            .get(..len)
            .ok_or_else(|| FrameError::InvalidLength(i64::try_from(len).unwrap_or(i64::MAX)))?;
        self.send_bytes(tag, body).await
    }

    /// Ask the read loop to end and close the socket. Idempotent.
    pub fn stop(&self) {
        if !self.inner.stop.is_cancelled() {
            debug!(id = self.id(), "stopping connection");
            self.inner.stop.cancel();
        }
    }

    /// Whether the connection was stopped or its read loop ended.
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    /// Wait until the connection is stopped or the peer goes away.
    pub async fn closed(&self) {
        self.inner.stop.cancelled().await;
    }

    async fn close(&self) {
        self.inner.stop.cancel();
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            // The peer may already be gone; there is nobody left to report to.
            let _ = writer.shutdown().await;
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Handlers and subscribers shared by every connection of one listener or client.
pub(crate) struct Shared<C: ?Sized> {
    pub(crate) registry: HandlerRegistry<C>,
    pub(crate) subscribers: Subscribers,
}

impl<C: ?Sized> Default for Shared<C> {
    fn default() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            subscribers: Subscribers::default(),
        }
    }
}

impl<C: ?Sized> Shared<C> {
    /// Drive `conn` until the peer closes, a read fails or the connection is stopped.
    ///
    /// Bytes accumulate across reads; every complete frame in the buffer is
    /// dispatched before the next read is armed. Stopping the connection
    /// abandons a dispatch still in progress.
    ///
    /// A malformed frame (negative or oversized length) discards what is
    /// buffered, raises one exception and the loop keeps reading. There is no
    /// resynchronisation: body bytes of an oversized frame that arrive in
    /// later reads are parsed as fresh tag and length fields, so the peer is
    /// expected to stay within the configured packet size.
    pub(crate) async fn read_loop(&self, conn: &ConnectionHandle, mut reader: OwnedReadHalf) {
        let id = conn.id();
        let mut codec = *conn.codec();
        let mut buf = BytesMut::with_capacity(codec.config().packet_size);

        'read: loop {
            let read = tokio::select! {
                biased;
                _ = conn.inner.stop.cancelled() => break,
                read = reader.read_buf(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    if let Err(err) = codec.decode_eof(&mut buf) {
                        self.subscribers.exception(Some(id), &err.into());
                    }
                    break;
                }
                Ok(n) => trace!(id, n, buffered = buf.len(), "read"),
                Err(err) => {
                    if !conn.is_stopped() {
                        self.subscribers.exception(Some(id), &err.into());
                    }
                    break;
                }
            }

            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(frame)) => tokio::select! {
                        biased;
                        _ = conn.inner.stop.cancelled() => break 'read,
                        _ = self.deliver(conn, frame) => {}
                    },
                    Ok(None) => break,
                    Err(err) => {
                        buf.clear();
                        self.subscribers.exception(Some(id), &err.into());
                        break;
                    }
                }
            }
        }

        conn.close().await;
        debug!(id, "connection closed");
        self.subscribers.emit(&PeerEvent::Disconnected { id });
    }

    async fn deliver(&self, conn: &ConnectionHandle, frame: Frame) {
        let id = conn.id();
        self.subscribers.emit(&PeerEvent::Message {
            id,
            tag: frame.tag,
            payload: &frame.payload,
        });

        let mut response = conn.new_packet();
        let ctx = MessageContext {
            connection: conn,
            tag: frame.tag,
            body: PacketBuffer::view(&frame.payload),
            response: &mut response,
        };
        if let Err(err) = self.registry.dispatch(ctx).await {
            self.subscribers.exception(Some(id), &PeerError::Handler(err));
        }
    }
}
