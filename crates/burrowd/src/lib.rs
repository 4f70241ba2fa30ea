//! burrowd is an encrypted tunnel relay over plain TCP: every client gets
//! the same AES-256-CBC key in its welcome frame, and every decrypted data
//! frame is fanned out to every other client.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Interactive admin console.
pub mod console;
/// Error types for relay operations.
pub mod error;
/// Prometheus metrics and the operational HTTP endpoint.
pub mod metrics;
/// Session registry and broadcast fan-out.
pub mod registry;
/// Accept loop, shared state and the relay lifecycle handle.
pub mod server;
/// Per-session lifecycle state and handles.
pub mod session;
/// On-demand aggregate statistics.
pub mod stats;

pub use error::RelayError;
pub use server::{run, run_with_shutdown, start, RelayHandle, ServerState};
