//! Session registry and broadcast fan-out.
//!
//! One registry instance lives in [`ServerState`](crate::server::ServerState)
//! and is shared by every connection task. Identifiers come from a
//! process-wide monotonic counter, so an id observed once is never seen on
//! a different session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use burrow_common::types::ClientId;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics::counters;
use crate::session::{SessionHandle, SessionState};

/// Concurrent map of live sessions, keyed by client id.
#[derive(Debug)]
pub struct Registry {
    sessions: DashMap<ClientId, Arc<SessionHandle>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Creates an empty registry. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates the next client id and inserts a fresh session handle.
    pub fn register(&self, addr: SocketAddr, tx: mpsc::Sender<Vec<u8>>) -> Arc<SessionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(SessionHandle::new(id, addr, tx));
        self.sessions.insert(id, Arc::clone(&handle));
        handle
    }

    /// Removes a session and marks it closed.
    ///
    /// Returns `false` when the id was already gone, so calling this twice
    /// for the same session is harmless.
    pub fn deregister(&self, id: ClientId) -> bool {
        match self.sessions.remove(&id) {
            Some((_, handle)) => {
                handle.advance(SessionState::Closed);
                true
            }
            None => false,
        }
    }

    /// Looks up a live session by id.
    #[must_use]
    pub fn lookup(&self, id: ClientId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Point-in-time copy of every live session handle.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queues a pre-serialized frame to every live session except `from`.
    ///
    /// Delivery is fire-and-forget: a recipient whose queue is full or
    /// whose task already went away just misses this frame, and the
    /// broadcast carries on. Returns how many queues accepted the frame.
    pub fn broadcast(&self, from: ClientId, line: &[u8]) -> usize {
        let mut delivered = 0;
        for handle in self.snapshot() {
            if handle.id == from {
                continue;
            }
            match handle.tx.try_send(line.to_vec()) {
                Ok(()) => {
                    delivered += 1;
                    counters::frames_relayed_total();
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = handle.id, "session queue full, dropping relay frame");
                    counters::frames_dropped_total("backpressure");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(client = handle.id, "session queue closed, skipping");
                    counters::frames_dropped_total("closed");
                }
            }
        }
        delivered
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
