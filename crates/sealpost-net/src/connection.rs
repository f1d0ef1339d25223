//! One TCP connection carrying framed JSON objects.
//!
//! Each connection runs two tokio tasks. The reader feeds socket bytes
//! through a [`JsonFrameDecoder`] and pushes every parsed object onto the
//! inbound channel returned by [`spawn`]. The writer drains an outbound queue
//! in order. The owner talks to the connection only through a cloneable
//! [`ConnectionHandle`] and learns about disconnects when the inbound channel
//! ends, which happens exactly once whatever caused the disconnect (peer EOF,
//! read or write error, [`ConnectionHandle::close`], or every handle being
//! dropped).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use sealpost_shared::constants::{CLOSE_FLUSH_TIMEOUT_MS, READ_BUFFER_SIZE};

use crate::error::NetError;
use crate::framing::JsonFrameDecoder;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable handle under which an owner indexes its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Parsed objects received from the peer, in arrival order.
/// `recv()` returning `None` means the connection is gone.
pub type Inbound = mpsc::UnboundedReceiver<Value>;

#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Shared>,
}

struct Shared {
    id: ConnectionId,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    closed: Arc<watch::Sender<bool>>,
    /// Peer identity, empty until authenticated.
    username: Mutex<Option<String>>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Dial `addr` and start the connection tasks.
///
/// The tasks live on the current tokio runtime; a caller that drives the
/// runtime with `block_on` needs the multi-threaded flavour so the tasks keep
/// running between calls.
pub async fn connect(addr: &str) -> Result<(ConnectionHandle, Inbound), NetError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| NetError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    spawn(stream)
}

/// Take ownership of an accepted or dialed stream and start its tasks.
pub fn spawn(stream: TcpStream) -> Result<(ConnectionHandle, Inbound), NetError> {
    let peer_addr = stream.peer_addr()?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer_addr, error = %e, "Could not set TCP_NODELAY");
    }

    let id = ConnectionId::next();
    let (reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (closed, _) = watch::channel(false);
    let closed = Arc::new(closed);

    tokio::spawn(read_loop(id, reader, inbound_tx, closed.clone()));
    tokio::spawn(write_loop(id, writer, outbound_rx, closed.clone()));

    info!(conn = %id, peer = %peer_addr, "Started connection");

    let handle = ConnectionHandle {
        inner: Arc::new(Shared {
            id,
            peer_addr,
            outbound: outbound_tx,
            closed,
            username: Mutex::new(None),
        }),
    };

    Ok((handle, inbound_rx))
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Serialize `message` as JSON and queue it. Writes are ordered and
    /// best-effort; a failed write tears the connection down.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), NetError> {
        let bytes = serde_json::to_vec(message)?;
        self.send_bytes(bytes)
    }

    pub fn send_bytes(&self, bytes: Vec<u8>) -> Result<(), NetError> {
        if bytes.is_empty() {
            warn!(conn = %self.inner.id, "Refusing to send an empty message");
            return Err(NetError::EmptyMessage);
        }
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        self.inner
            .outbound
            .send(bytes)
            .map_err(|_| NetError::Closed)
    }

    /// Close both directions. Messages already queued are still written, for
    /// a bounded time. Closing an already-closed connection is a no-op.
    pub fn close(&self) {
        if mark_closed(&self.inner.closed) {
            debug!(conn = %self.inner.id, "Close requested");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    pub fn username(&self) -> Option<String> {
        self.inner
            .username
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn set_username(&self, username: Option<String>) {
        match self.inner.username.lock() {
            Ok(mut guard) => *guard = username,
            Err(poisoned) => *poisoned.into_inner() = username,
        }
    }
}

// Returns true only for the call that actually flipped the flag.
fn mark_closed(closed: &watch::Sender<bool>) -> bool {
    closed.send_if_modified(|value| {
        if *value {
            false
        } else {
            *value = true;
            true
        }
    })
}

// Resolves once the close flag is set. The watch guard is dropped here, so
// the calling future stays `Send`.
async fn wait_closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn flush_queued(
    id: ConnectionId,
    writer: &mut OwnedWriteHalf,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let drain = async {
        let mut flushed = 0usize;
        while let Ok(bytes) = outbound.try_recv() {
            writer.write_all(&bytes).await?;
            flushed += 1;
        }
        Ok::<_, std::io::Error>(flushed)
    };

    match tokio::time::timeout(Duration::from_millis(CLOSE_FLUSH_TIMEOUT_MS), drain).await {
        Ok(Ok(0)) => {}
        Ok(Ok(flushed)) => debug!(conn = %id, flushed, "Flushed queued messages before close"),
        Ok(Err(e)) => debug!(conn = %id, error = %e, "Write failed while flushing"),
        Err(_) => warn!(conn = %id, "Timed out flushing queued messages"),
    }
}

async fn read_loop(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    frames: mpsc::UnboundedSender<Value>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut shutdown = closed.subscribe();
    let mut decoder = JsonFrameDecoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = wait_closed(&mut shutdown) => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!(conn = %id, "Peer closed the connection");
                    break;
                }
                Ok(n) => {
                    for frame in decoder.feed(&buf[..n]) {
                        match frame {
                            Ok(value) => {
                                if frames.send(value).is_err() {
                                    debug!(conn = %id, "Inbound receiver dropped");
                                }
                            }
                            Err(e) => {
                                warn!(conn = %id, error = %e, "Discarding malformed frame");
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!(conn = %id, error = %e, "Read failed");
                    break;
                }
            }
        }
    }

    mark_closed(&closed);
    info!(conn = %id, "Disconnected");
    // Dropping `frames` here ends the owner's inbound stream.
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut shutdown = closed.subscribe();

    loop {
        tokio::select! {
            _ = wait_closed(&mut shutdown) => {
                flush_queued(id, &mut writer, &mut outbound).await;
                break;
            }
            next = outbound.recv() => match next {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        warn!(conn = %id, error = %e, "Write failed");
                        break;
                    }
                    trace!(conn = %id, len = bytes.len(), "Outgoing message delivered to socket");
                }
                None => {
                    debug!(conn = %id, "All connection handles dropped");
                    break;
                }
            }
        }
    }

    let _ = writer.shutdown().await;
    mark_closed(&closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn pair() -> ((ConnectionHandle, Inbound), (ConnectionHandle, Inbound)) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            spawn(stream).unwrap()
        });
        let client = connect(&addr).await.unwrap();
        let server = accept.await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways_in_order() {
        let ((server, mut server_rx), (client, mut client_rx)) = pair().await;

        client.send(&json!({"action": "login", "n": 1})).unwrap();
        client.send(&json!({"action": "login", "n": 2})).unwrap();
        assert_eq!(
            timeout(WAIT, server_rx.recv()).await.unwrap(),
            Some(json!({"action": "login", "n": 1}))
        );
        assert_eq!(
            timeout(WAIT, server_rx.recv()).await.unwrap(),
            Some(json!({"action": "login", "n": 2}))
        );

        server.send(&json!({"status": "success"})).unwrap();
        assert_eq!(
            timeout(WAIT, client_rx.recv()).await.unwrap(),
            Some(json!({"status": "success"}))
        );
        assert_ne!(server.id(), client.id());
    }

    #[tokio::test]
    async fn test_fragmented_writes_reassembled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (_server, mut inbound) = spawn(stream).unwrap();

        raw.write_all(br#"{"action":"send_mes"#).await.unwrap();
        raw.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        raw.write_all(br#"sage","message":"a } b"}garbage{"#).await.unwrap();
        raw.write_all(br#""action":"get_conversations"}"#).await.unwrap();

        assert_eq!(
            timeout(WAIT, inbound.recv()).await.unwrap(),
            Some(json!({"action": "send_message", "message": "a } b"}))
        );
        assert_eq!(
            timeout(WAIT, inbound.recv()).await.unwrap(),
            Some(json!({"action": "get_conversations"}))
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_close_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (server, mut inbound) = spawn(stream).unwrap();

        raw.write_all(br#"{"action":}{"action":"login"}"#).await.unwrap();
        assert_eq!(
            timeout(WAIT, inbound.recv()).await.unwrap(),
            Some(json!({"action": "login"}))
        );
        assert!(!server.is_closed());
    }

    #[tokio::test]
    async fn test_peer_eof_ends_inbound() {
        let ((server, mut server_rx), (client, client_rx)) = pair().await;

        drop(client_rx);
        client.close();

        assert_eq!(timeout(WAIT, server_rx.recv()).await.unwrap(), None);
        assert!(server.is_closed());
        assert!(matches!(server.send(&json!({"status": "error"})), Err(NetError::Closed)));
    }

    #[tokio::test]
    async fn test_close_flushes_queued_messages() {
        let ((server, _server_rx), (_client, mut client_rx)) = pair().await;

        for n in 0..3 {
            server.send(&json!({"status": "success", "n": n})).unwrap();
        }
        server.close();

        for n in 0..3 {
            assert_eq!(
                timeout(WAIT, client_rx.recv()).await.unwrap(),
                Some(json!({"status": "success", "n": n}))
            );
        }
        assert_eq!(timeout(WAIT, client_rx.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let ((server, mut server_rx), _client) = pair().await;

        server.close();
        server.close();
        assert!(server.is_closed());
        assert_eq!(timeout(WAIT, server_rx.recv()).await.unwrap(), None);
        server.close();
    }

    #[tokio::test]
    async fn test_dropping_every_handle_disconnects() {
        let ((server, _server_rx), (_client, mut client_rx)) = pair().await;

        drop(server);
        assert_eq!(timeout(WAIT, client_rx.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let ((server, _rx), _client) = pair().await;
        assert!(matches!(server.send_bytes(Vec::new()), Err(NetError::EmptyMessage)));
    }

    #[tokio::test]
    async fn test_username_slot() {
        let ((server, _rx), _client) = pair().await;
        assert_eq!(server.username(), None);

        let alias = server.clone();
        alias.set_username(Some("alice".into()));
        assert_eq!(server.username().as_deref(), Some("alice"));
    }
}
