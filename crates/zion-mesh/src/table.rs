//! Connection table: one open link per neighbour.
//!
//! Owned by the mesh actor. Each [`Link`] is the actor's side of a link
//! task pair: sending queues bytes for the writer task, and dropping the
//! link aborts the reader and lets the writer close the connection.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use zion_transport::{ConnectionId, PeerId};

/// Who opened a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// We dialed the remote.
    Dialed,
    /// The remote dialed us.
    Accepted,
}

/// The actor-side handle of one open link.
#[derive(Debug)]
pub(crate) struct Link {
    pub conn_id: ConnectionId,
    pub direction: Direction,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: AbortHandle,
}

impl Link {
    pub fn new(
        conn_id: ConnectionId,
        direction: Direction,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        reader: AbortHandle,
    ) -> Self {
        Self {
            conn_id,
            direction,
            outbound,
            reader,
        }
    }

    /// Queues `bytes` for the writer task. `false` if the writer is gone.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        self.outbound.send(bytes).is_ok()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Which of two links to the same peer survives.
///
/// Both ends must pick the same physical link, so the choice depends only
/// on who dialed: the link opened by the smaller of the two ids wins. If
/// both links were opened by the same side, the newer one wins (the older
/// one is most likely a leftover from before the remote restarted).
pub(crate) fn keep_new_link(
    self_id: &PeerId,
    peer: &PeerId,
    existing: Direction,
    new: Direction,
) -> bool {
    if existing == new {
        return true;
    }
    let preferred = if self_id < peer {
        Direction::Dialed
    } else {
        Direction::Accepted
    };
    new == preferred
}

/// Open links keyed by neighbour, plus dials in flight.
#[derive(Debug, Default)]
pub(crate) struct ConnectionTable {
    links: BTreeMap<PeerId, Link>,
    dialing: HashSet<PeerId>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a link, returning the one it replaced.
    pub fn insert(&mut self, peer: PeerId, link: Link) -> Option<Link> {
        self.dialing.remove(&peer);
        self.links.insert(peer, link)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Link> {
        self.links.get(peer)
    }

    /// Removes `peer`'s link only if it is still connection `conn_id`.
    /// Closes reported by links that were already replaced are ignored.
    pub fn remove(&mut self, peer: &PeerId, conn_id: ConnectionId) -> Option<Link> {
        if self.links.get(peer)?.conn_id != conn_id {
            return None;
        }
        self.links.remove(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.links.contains_key(peer)
    }

    /// Marks a dial as in flight. `false` if one already is.
    pub fn start_dial(&mut self, peer: &PeerId) -> bool {
        self.dialing.insert(peer.clone())
    }

    pub fn finish_dial(&mut self, peer: &PeerId) {
        self.dialing.remove(peer);
    }

    pub fn is_dialing(&self, peer: &PeerId) -> bool {
        self.dialing.contains(peer)
    }

    /// Connected or being dialed.
    pub fn is_known(&self, peer: &PeerId) -> bool {
        self.contains(peer) || self.is_dialing(peer)
    }

    /// Open links plus dials in flight.
    pub fn occupied(&self) -> usize {
        self.links.len() + self.dialing.len()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Connected peers in id order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.links.keys().cloned().collect()
    }

    pub fn send_to(&self, peer: &PeerId, bytes: Vec<u8>) -> bool {
        self.links.get(peer).is_some_and(|link| link.send(bytes))
    }

    /// Sends `bytes` to every link except `except`. Returns how many
    /// links the bytes were queued on.
    pub fn fan_out(&self, bytes: &[u8], except: Option<&PeerId>) -> usize {
        self.links
            .iter()
            .filter(|(peer, _)| Some(*peer) != except)
            .filter(|(_, link)| link.send(bytes.to_vec()))
            .count()
    }

    /// Drops every link and forgets pending dials.
    pub fn clear(&mut self) {
        self.links.clear();
        self.dialing.clear();
    }
}
