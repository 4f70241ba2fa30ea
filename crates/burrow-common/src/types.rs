//! Core type definitions and protocol constants shared between the relay
//! server and its clients.

/// Identifier assigned to a client connection.
///
/// Identifiers are allocated from a process-wide monotonic counter starting
/// at 1 and are never reused for the lifetime of the relay process.
pub type ClientId = u64;

/// The symmetric cipher every relay session uses.
pub const ALGORITHM: &str = "aes-256-cbc";

/// Greeting text carried in the welcome frame.
pub const WELCOME_TEXT: &str = "welcome to the burrow relay";

/// The only tunnel request verb the relay acts on.
pub const TUNNEL_REQUEST_ESTABLISH: &str = "establish";

/// Status reported back once a tunnel request has been acknowledged.
pub const TUNNEL_STATUS_READY: &str = "ready";
