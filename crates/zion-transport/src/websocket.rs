//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! Peer ids are resolved to `host:port` through a static address book.
//! The dialer opens with a `HELLO <peer id>` text frame so the acceptor
//! learns who is on the other end; after that every frame is one
//! encoded envelope.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, PeerId, Signaling, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// How long an accepted socket has to identify itself.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

const HELLO_PREFIX: &str = "HELLO ";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Signaling over plain WebSockets with a static address book.
#[derive(Clone, Default)]
pub struct WebSocketSignaling {
    book: Arc<RwLock<HashMap<PeerId, String>>>,
}

impl WebSocketSignaling {
    /// Creates signaling from `(peer id, "host:port")` pairs.
    pub fn new(book: impl IntoIterator<Item = (PeerId, String)>) -> Self {
        Self {
            book: Arc::new(RwLock::new(book.into_iter().collect())),
        }
    }

    /// Adds or replaces the address of `peer`.
    pub fn insert(&self, peer: PeerId, addr: impl Into<String>) {
        self.book
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, addr.into());
    }

    fn lookup(&self, peer: &PeerId) -> Option<String> {
        self.book
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
    }
}

impl Signaling for WebSocketSignaling {
    type Connection = WebSocketConnection;
    type Transport = WebSocketTransport;

    async fn bind(&self, id: &PeerId) -> Result<WebSocketTransport, TransportError> {
        let addr = self.lookup(id).ok_or_else(|| {
            TransportError::Unavailable(format!("no address for {id}"))
        })?;
        let listener = TcpListener::bind(addr.as_str()).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TransportError::IdTaken(id.clone())
            } else {
                TransportError::AcceptFailed(e)
            }
        })?;
        tracing::info!(peer = %id, %addr, "WebSocket transport listening");
        Ok(WebSocketTransport {
            id: id.clone(),
            listener,
        })
    }

    async fn dial(
        &self,
        from: &PeerId,
        to: &PeerId,
    ) -> Result<WebSocketConnection, TransportError> {
        let addr = self
            .lookup(to)
            .ok_or_else(|| TransportError::PeerUnreachable(to.clone()))?;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .map_err(|e| {
                tracing::debug!(peer = %to, %addr, error = %e, "dial failed");
                TransportError::PeerUnreachable(to.clone())
            })?;

        ws.send(Message::Text(format!("{HELLO_PREFIX}{from}").into()))
            .await
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })?;

        Ok(WebSocketConnection::new(to.clone(), ws))
    }
}

/// A WebSocket listener for one bound identity.
#[derive(Debug)]
pub struct WebSocketTransport {
    id: PeerId,
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Returns the socket address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Upgrades an accepted socket and reads the dialer's HELLO frame.
    async fn upgrade(stream: TcpStream) -> Option<(PeerId, WsStream)> {
        let mut ws = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
            .await
            .map_err(|e| tracing::debug!(error = %e, "WebSocket upgrade failed"))
            .ok()?;

        let hello = tokio::time::timeout(HELLO_TIMEOUT, ws.next()).await.ok()??;
        match hello {
            Ok(Message::Text(text)) => {
                let remote = text.as_str().strip_prefix(HELLO_PREFIX)?.trim();
                if remote.is_empty() {
                    return None;
                }
                Some((PeerId::new(remote), ws))
            }
            _ => None,
        }
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn accept(&mut self) -> Result<WebSocketConnection, TransportError> {
        loop {
            let (stream, addr) = self
                .listener
                .accept()
                .await
                .map_err(TransportError::AcceptFailed)?;

            match Self::upgrade(stream).await {
                Some((remote, ws)) => {
                    let conn = WebSocketConnection::new(remote, ws);
                    tracing::debug!(
                        id = %conn.id,
                        remote = %conn.remote,
                        %addr,
                        "accepted WebSocket link"
                    );
                    return Ok(conn);
                }
                None => {
                    tracing::debug!(%addr, "dropping socket without HELLO");
                }
            }
        }
    }

    fn local_id(&self) -> &PeerId {
        &self.id
    }
}

/// A single WebSocket link to one peer.
///
/// The stream is split so a pending `recv` never blocks `send`.
#[derive(Debug)]
pub struct WebSocketConnection {
    id: ConnectionId,
    remote: PeerId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    fn new(remote: PeerId, ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            remote,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote(&self) -> &PeerId {
        &self.remote
    }
}
