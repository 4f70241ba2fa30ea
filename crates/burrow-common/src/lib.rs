//! Shared building blocks for the burrow relay:
//!
//! - Wire [`Message`] frames and their JSON encoding
//! - The newline-delimited [`FrameCodec`]
//! - The process-wide AES-256-CBC [`CryptoEngine`]
//! - Protocol constants and the [`ClientId`] type

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod crypto;
pub mod message;
pub mod types;

pub use codec::{CodecError, FrameCodec, DEFAULT_MAX_FRAME};
pub use crypto::{CryptoEngine, DecryptError, KeyContext, KeyError};
pub use message::{Message, ParseError};
pub use types::ClientId;
