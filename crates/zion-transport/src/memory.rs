//! In-process signaling hub.
//!
//! Every [`MemorySignaling`] clone shares one registry of bound identities.
//! Links are a pair of unbounded channels, so per-link ordering holds and
//! nothing touches the network. The hub also exposes fault injection
//! (severing a node's signaling link, taking the substrate offline) for
//! exercising reconnection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::{Connection, ConnectionId, PeerId, Signaling, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

enum ListenerEvent {
    Incoming(MemoryConnection),
    Severed,
}

#[derive(Default)]
struct Hub {
    listeners: HashMap<PeerId, mpsc::UnboundedSender<ListenerEvent>>,
    offline: bool,
    unavailable: bool,
    bind_attempts: HashMap<PeerId, usize>,
}

/// A shared in-memory signaling substrate.
///
/// Cloning is cheap and every clone sees the same identities.
#[derive(Clone, Default)]
pub struct MemorySignaling {
    hub: Arc<Mutex<Hub>>,
}

impl MemorySignaling {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops the signaling link of `id`: its transport's `accept` fails with
    /// a network error and the identity becomes free again.
    ///
    /// Links that are already open are left alone. Returns `false` if `id`
    /// was not bound.
    pub fn sever(&self, id: &PeerId) -> bool {
        let Some(listener) = self.hub().listeners.remove(id) else {
            return false;
        };
        let _ = listener.send(ListenerEvent::Severed);
        tracing::debug!(peer = %id, "memory signaling link severed");
        true
    }

    /// While offline, every bind and dial fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.hub().offline = offline;
    }

    /// While unavailable, every bind and dial fails with
    /// [`TransportError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.hub().unavailable = unavailable;
    }

    /// How many times `bind` was called for `id`, successful or not.
    pub fn bind_attempts(&self, id: &PeerId) -> usize {
        self.hub().bind_attempts.get(id).copied().unwrap_or(0)
    }

    /// Whether a live transport currently holds `id`.
    pub fn is_bound(&self, id: &PeerId) -> bool {
        self.hub()
            .listeners
            .get(id)
            .is_some_and(|tx| !tx.is_closed())
    }

    fn check_reachable(hub: &Hub) -> Result<(), TransportError> {
        if hub.unavailable {
            return Err(TransportError::Unavailable(
                "memory signaling disabled".into(),
            ));
        }
        if hub.offline {
            return Err(TransportError::Network("signaling offline".into()));
        }
        Ok(())
    }
}

impl Signaling for MemorySignaling {
    type Connection = MemoryConnection;
    type Transport = MemoryTransport;

    async fn bind(&self, id: &PeerId) -> Result<MemoryTransport, TransportError> {
        let events = {
            let mut hub = self.hub();
            *hub.bind_attempts.entry(id.clone()).or_default() += 1;
            Self::check_reachable(&hub)?;
            if hub.listeners.get(id).is_some_and(|tx| !tx.is_closed()) {
                return Err(TransportError::IdTaken(id.clone()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            hub.listeners.insert(id.clone(), tx);
            rx
        };
        tracing::debug!(peer = %id, "memory transport bound");
        Ok(MemoryTransport {
            id: id.clone(),
            events,
        })
    }

    async fn dial(
        &self,
        from: &PeerId,
        to: &PeerId,
    ) -> Result<MemoryConnection, TransportError> {
        let listener = {
            let hub = self.hub();
            Self::check_reachable(&hub)?;
            hub.listeners
                .get(to)
                .filter(|tx| !tx.is_closed())
                .cloned()
                .ok_or_else(|| TransportError::PeerUnreachable(to.clone()))?
        };

        let (local, remote) = MemoryConnection::pair(from, to);
        listener
            .send(ListenerEvent::Incoming(remote))
            .map_err(|_| TransportError::PeerUnreachable(to.clone()))?;
        Ok(local)
    }
}

/// The listening side of a bound identity.
#[derive(Debug)]
pub struct MemoryTransport {
    id: PeerId,
    events: mpsc::UnboundedReceiver<ListenerEvent>,
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn accept(&mut self) -> Result<MemoryConnection, TransportError> {
        match self.events.recv().await {
            Some(ListenerEvent::Incoming(conn)) => Ok(conn),
            Some(ListenerEvent::Severed) | None => Err(TransportError::Network(
                format!("signaling link for {} severed", self.id),
            )),
        }
    }

    fn local_id(&self) -> &PeerId {
        &self.id
    }
}

/// One end of an in-memory link.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    remote: PeerId,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryConnection {
    /// Builds both ends of a link between `a` (dialer) and `b` (acceptor).
    /// The first element is `a`'s end.
    fn pair(a: &PeerId, b: &PeerId) -> (Self, Self) {
        let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
        let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();
        (
            Self::new(b.clone(), a_to_b_tx, b_to_a_rx),
            Self::new(a.clone(), b_to_a_tx, a_to_b_rx),
        )
    }

    fn new(
        remote: PeerId,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            remote,
            tx: Mutex::new(Some(tx)),
            rx: AsyncMutex::new(rx),
        }
    }

    fn tx(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Vec<u8>>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let tx = self.tx();
        let tx = tx
            .as_ref()
            .ok_or_else(|| TransportError::ConnectionClosed("closed locally".into()))?;
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::ConnectionClosed(format!("{} hung up", self.remote))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        // The remote sees end-of-stream once our sender is gone.
        self.tx().take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote(&self) -> &PeerId {
        &self.remote
    }
}
