//! On-demand aggregate statistics.
//!
//! A snapshot folds the per-session byte counters over the live registry.
//! Sessions that already deregistered no longer contribute, so totals
//! describe the clients connected right now rather than process history.

use std::fmt;

use serde::Serialize;

use crate::server::ServerState;

/// Point-in-time aggregate over all live sessions.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Sessions currently registered.
    pub connected_clients: usize,
    /// Sum of raw bytes read from live sessions' sockets.
    pub total_bytes_received: u64,
    /// Sum of raw bytes written to live sessions' sockets.
    pub total_bytes_sent: u64,
    /// Seconds since the server state was created.
    pub uptime_secs: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "clients={} rx_bytes={} tx_bytes={} uptime={}s",
            self.connected_clients,
            self.total_bytes_received,
            self.total_bytes_sent,
            self.uptime_secs
        )
    }
}

/// Walks the registry and sums every live session's counters.
#[must_use]
pub fn snapshot(state: &ServerState) -> StatsSnapshot {
    let sessions = state.registry.snapshot();
    let mut total_bytes_received = 0;
    let mut total_bytes_sent = 0;
    for session in &sessions {
        total_bytes_received += session.bytes_received();
        total_bytes_sent += session.bytes_sent();
    }
    StatsSnapshot {
        connected_clients: sessions.len(),
        total_bytes_received,
        total_bytes_sent,
        uptime_secs: state.started_at.elapsed().as_secs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use burrow_common::crypto::{CryptoEngine, KeyContext};
    use burrow_common::types::ALGORITHM;
    use tokio::sync::mpsc;

    fn test_state() -> ServerState {
        let config = ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            max_conns: 16,
            max_frame: 64 * 1024,
            queue_depth: 8,
            stats_interval: 0,
            shutdown_grace: 1,
            algorithm: ALGORITHM.to_string(),
            console: false,
        };
        ServerState::new(config, CryptoEngine::new(KeyContext::generate()))
    }

    #[test]
    fn empty_registry_snapshots_to_zeroes() {
        let state = test_state();
        let snap = snapshot(&state);
        assert_eq!(snap.connected_clients, 0);
        assert_eq!(snap.total_bytes_received, 0);
        assert_eq!(snap.total_bytes_sent, 0);
    }

    #[test]
    fn snapshot_sums_live_session_counters() {
        let state = test_state();
        let addr = "127.0.0.1:9000".parse().unwrap();

        let (tx_a, _rx_a) = mpsc::channel(1);
        let a = state.registry.register(addr, tx_a);
        a.add_bytes_received(100);
        a.add_bytes_sent(40);

        let (tx_b, _rx_b) = mpsc::channel(1);
        let b = state.registry.register(addr, tx_b);
        b.add_bytes_received(11);
        b.add_bytes_sent(2);

        let snap = snapshot(&state);
        assert_eq!(snap.connected_clients, 2);
        assert_eq!(snap.total_bytes_received, 111);
        assert_eq!(snap.total_bytes_sent, 42);
    }

    #[test]
    fn deregistered_sessions_leave_the_totals() {
        let state = test_state();
        let addr = "127.0.0.1:9000".parse().unwrap();

        let (tx_a, _rx_a) = mpsc::channel(1);
        let a = state.registry.register(addr, tx_a);
        a.add_bytes_received(100);

        let (tx_b, _rx_b) = mpsc::channel(1);
        let b = state.registry.register(addr, tx_b);
        b.add_bytes_received(11);

        state.registry.deregister(a.id);
        let snap = snapshot(&state);
        assert_eq!(snap.connected_clients, 1);
        assert_eq!(snap.total_bytes_received, 11);
    }

    #[test]
    fn display_is_a_single_line() {
        let snap = StatsSnapshot {
            connected_clients: 3,
            total_bytes_received: 10,
            total_bytes_sent: 20,
            uptime_secs: 5,
        };
        assert_eq!(snap.to_string(), "clients=3 rx_bytes=10 tx_bytes=20 uptime=5s");
    }
}
