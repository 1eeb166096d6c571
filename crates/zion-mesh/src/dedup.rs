//! Bounded FIFO set of message fingerprints.

use std::collections::{HashSet, VecDeque};

use zion_protocol::Fingerprint;

/// Remembers the last `capacity` fingerprints.
///
/// Insertion order is eviction order: once full, inserting a new
/// fingerprint forgets the oldest one, regardless of how recently it was
/// looked up.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    order: VecDeque<Fingerprint>,
    members: HashSet<Fingerprint>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Records `fingerprint`. Returns `false` if it was already present,
    /// in which case nothing changes.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        if !self.members.insert(fingerprint) {
            return false;
        }
        self.order.push_back(fingerprint);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.members.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}
