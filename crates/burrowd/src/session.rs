//! Per-session lifecycle state and the handle other tasks use to reach a
//! session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use burrow_common::types::ClientId;
use tokio::sync::mpsc;

/// Lifecycle of one client session.
///
/// Transitions only move forward: a session is `Connected` when the socket
/// is accepted, `Welcomed` once the welcome frame is on the wire,
/// `TunnelEstablished` after the client's tunnel request is acknowledged,
/// and `Closed` when it deregisters. The tunnel step is optional; data
/// frames are relayed in any live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Socket accepted, welcome not yet sent.
    Connected = 0,
    /// Welcome frame delivered.
    Welcomed = 1,
    /// Tunnel request acknowledged.
    TunnelEstablished = 2,
    /// Session deregistered. Terminal.
    Closed = 3,
}

impl SessionState {
    const fn as_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connected,
            1 => Self::Welcomed,
            2 => Self::TunnelEstablished,
            _ => Self::Closed,
        }
    }
}

/// Shared handle to one live session.
///
/// The session's own task reads the socket; everyone else reaches it
/// through `tx`, which feeds pre-serialized frames to the session's write
/// half. Byte counters are updated by the owning task and read by the
/// stats aggregator.
#[derive(Debug)]
pub struct SessionHandle {
    /// Process-unique identifier assigned at registration.
    pub id: ClientId,
    /// Peer socket address.
    pub addr: SocketAddr,
    /// Outbound frame queue, drained by the session task.
    pub tx: mpsc::Sender<Vec<u8>>,
    /// When the session registered.
    pub connected_at: Instant,
    state: AtomicU8,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl SessionHandle {
    /// Creates a handle in the `Connected` state.
    #[must_use]
    pub fn new(id: ClientId, addr: SocketAddr, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            id,
            addr,
            tx,
            connected_at: Instant::now(),
            state: AtomicU8::new(SessionState::Connected.as_u8()),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Moves the lifecycle forward. Attempts to move backwards, or to leave
    /// `Closed`, are ignored.
    pub fn advance(&self, next: SessionState) {
        self.state.fetch_max(next.as_u8(), Ordering::Relaxed);
    }

    /// Adds to the raw bytes read from this session's socket.
    pub fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    /// Adds to the raw bytes written to this session's socket.
    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    /// Raw bytes read from this session's socket so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Raw bytes written to this session's socket so far.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}
