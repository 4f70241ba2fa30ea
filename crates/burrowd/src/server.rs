//! Accept loop, shared server state and the relay lifecycle handle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use burrow_common::crypto::CryptoEngine;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::RelayError;
use crate::registry::Registry;
use crate::stats::{self, StatsSnapshot};

/// State shared by the accept loop and every session task.
#[derive(Debug)]
pub struct ServerState {
    /// Live session registry.
    pub registry: Registry,
    /// Process-wide crypto engine handed to every session.
    pub crypto: CryptoEngine,
    /// Validated configuration.
    pub config: ServerConfig,
    /// When this state was created, for uptime reporting.
    pub started_at: Instant,
}

impl ServerState {
    /// Builds fresh state around validated configuration and key material.
    #[must_use]
    pub fn new(config: ServerConfig, crypto: CryptoEngine) -> Self {
        Self {
            registry: Registry::new(),
            crypto,
            config,
            started_at: Instant::now(),
        }
    }
}

/// Runs the relay on an already-bound listener until the process exits.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RelayError> {
    let (shutdown_tx, _) = watch::channel(());
    run_with_shutdown(listener, state, shutdown_tx).await
}

/// Runs the relay until `shutdown_tx` fires, then drains open sessions.
///
/// Every session task holds a subscription to the shutdown channel, so a
/// signal both stops the accept loop and asks live sessions to close. The
/// drain waits up to `shutdown_grace` seconds, then force-deregisters
/// whatever is still in the registry.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: watch::Sender<()>,
) -> Result<(), RelayError> {
    let local_addr = listener.local_addr()?;
    info!("relay listening on {}", local_addr);

    let mut shutdown_rx = shutdown_tx.subscribe();
    // Completion tracking: every session task owns a clone of `done_tx` and
    // never sends on it, so `recv()` yields `None` exactly when the accept
    // loop's copy is dropped and the last task has exited.
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if state.registry.len() >= state.config.max_conns {
                            warn!("max connections reached, rejecting {}", addr);
                            drop(stream);
                            continue;
                        }
                        // Register here, not in the task: ids must follow
                        // acceptance order.
                        let (deliver_tx, deliver_rx) =
                            mpsc::channel::<Vec<u8>>(state.config.queue_depth);
                        let session = state.registry.register(addr, deliver_tx);
                        let state = Arc::clone(&state);
                        let conn_shutdown = shutdown_tx.subscribe();
                        let done = done_tx.clone();
                        tokio::spawn(async move {
                            let _done = done;
                            if let Err(e) =
                                handle_connection(stream, session, deliver_rx, state, conn_shutdown)
                                    .await
                            {
                                tracing::debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("failed to accept connection: {}", e),
                }
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, draining {} sessions", state.registry.len());
                break;
            }
        }
    }

    drop(done_tx);
    let deadline =
        tokio::time::Instant::now() + Duration::from_secs(state.config.shutdown_grace);
    if tokio::time::timeout_at(deadline, done_rx.recv()).await.is_err() {
        warn!(
            "drain timeout reached with {} sessions still active",
            state.registry.len()
        );
    }
    // Sweep whatever the session tasks did not deregister themselves.
    for session in state.registry.snapshot() {
        state.registry.deregister(session.id);
    }

    info!("relay shut down gracefully");
    Ok(())
}

/// Binds the configured listener and runs the relay on a background task.
///
/// # Errors
///
/// Returns [`RelayError::Bind`] when the listen address is unavailable.
pub async fn start(config: ServerConfig, crypto: CryptoEngine) -> Result<RelayHandle, RelayError> {
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|source| RelayError::Bind {
            addr: config.listen,
            source,
        })?;
    let local_addr = listener.local_addr()?;
    let state = Arc::new(ServerState::new(config, crypto));
    let (shutdown_tx, _) = watch::channel(());
    let task = tokio::spawn(run_with_shutdown(
        listener,
        Arc::clone(&state),
        shutdown_tx.clone(),
    ));
    Ok(RelayHandle {
        local_addr,
        shutdown_tx,
        state,
        task,
    })
}

/// Owner handle for a running relay started with [`start`].
#[derive(Debug)]
pub struct RelayHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<()>,
    state: Arc<ServerState>,
    task: JoinHandle<Result<(), RelayError>>,
}

impl RelayHandle {
    /// Address the relay actually bound, useful with port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared server state, for stats tasks and the admin console.
    #[must_use]
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Point-in-time aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        stats::snapshot(&self.state)
    }

    /// Completes if the relay task exits on its own.
    ///
    /// # Errors
    ///
    /// Returns the relay task's error, or [`RelayError::Join`] if the task
    /// panicked.
    pub async fn finished(&mut self) -> Result<(), RelayError> {
        (&mut self.task).await?
    }

    /// Signals shutdown, waits for open sessions to drain and returns the
    /// relay task's result.
    ///
    /// # Errors
    ///
    /// Returns the relay task's error, or [`RelayError::Join`] if the task
    /// panicked.
    pub async fn stop(self) -> Result<(), RelayError> {
        let _ = self.shutdown_tx.send(());
        self.task.await?
    }
}
