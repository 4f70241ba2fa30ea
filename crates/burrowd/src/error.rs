//! Error types for relay operations.

use std::net::SocketAddr;

use burrow_common::codec::CodecError;
use burrow_common::message::ParseError;
use thiserror::Error;

/// Top-level error type for the relay server.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The listen socket could not be bound. Fatal at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: SocketAddr,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Socket I/O failed on an individual session.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A session buffered more bytes than the frame cap allows.
    #[error("frame codec error: {0}")]
    Codec(#[from] CodecError),

    /// An outbound frame could not be serialized.
    #[error("frame encode error: {0}")]
    Encode(#[from] ParseError),

    /// The server task panicked or was cancelled.
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
