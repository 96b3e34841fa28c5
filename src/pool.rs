//! Waiting pool
//!
//! FIFO queue of connections looking for a partner. Entries for vanished
//! connections are skipped lazily on dequeue.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::registry::ConnectionRegistry;
use crate::types::ConnectionId;

#[derive(Debug, Default)]
pub struct WaitingPool {
    queue: VecDeque<ConnectionId>,
    members: HashSet<ConnectionId>,
}

impl WaitingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. No-op if already queued.
    pub fn enqueue(&mut self, id: ConnectionId) {
        if self.members.insert(id) {
            self.queue.push_back(id);
        }
    }

    /// Pop the oldest waiter still present in the registry
    ///
    /// Stale heads are discarded along the way.
    pub fn dequeue_next_live(&mut self, registry: &ConnectionRegistry) -> Option<ConnectionId> {
        while let Some(id) = self.queue.pop_front() {
            self.members.remove(&id);
            if registry.contains(id) {
                return Some(id);
            }
            debug!("Skipping stale waiter {}", id);
        }
        None
    }

    /// Remove a specific id. Returns whether it was queued.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        if !self.members.remove(&id) {
            return false;
        }
        self.queue.retain(|queued| *queued != id);
        true
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains(&id)
    }

    /// Number of queued ids, stale ones included
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued ids that are still registered
    pub fn live_count(&self, registry: &ConnectionRegistry) -> usize {
        self.queue.iter().filter(|id| registry.contains(**id)).count()
    }
}
