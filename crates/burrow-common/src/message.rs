//! Wire messages exchanged between the relay and its clients.
//!
//! Every frame is a single JSON object terminated by a `\n` byte. The
//! `type` field selects the variant; field names inside each variant follow
//! the wire protocol's mixed snake_case / camelCase conventions, so the
//! serde renames here are load-bearing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ClientId, TUNNEL_REQUEST_ESTABLISH, TUNNEL_STATUS_READY};

/// Error returned when a wire line cannot be encoded or decoded.
#[derive(Debug, Error)]
#[error("malformed frame: {0}")]
pub struct ParseError(#[from] serde_json::Error);

/// A single protocol frame.
///
/// Frames the relay sends are `Welcome`, `Pong`, `TunnelEstablished` and
/// `Relay`. Frames clients send are `Ping`, `Tunnel` and `Data`. A frame
/// whose `type` tag is not recognized parses as [`Message::Unknown`] so the
/// receiver can skip it without dropping the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// First frame on every connection: the assigned id plus the shared
    /// key material, hex encoded.
    #[serde(rename_all = "camelCase")]
    Welcome {
        /// Identifier the relay assigned to this connection.
        client_id: ClientId,
        /// Human readable greeting.
        message: String,
        /// Hex encoding of the 32 byte AES key.
        encryption_key: String,
        /// Hex encoding of the 16 byte IV.
        #[serde(rename = "encryptionIV")]
        encryption_iv: String,
    },
    /// Client liveness check. The timestamp is opaque to the relay.
    Ping {
        /// Caller supplied timestamp, echoed back verbatim.
        timestamp: i64,
    },
    /// Answer to a ping, carrying the original timestamp.
    Pong {
        /// Timestamp copied from the ping being answered.
        timestamp: i64,
    },
    /// Client request to set up the encrypted tunnel.
    Tunnel {
        /// Request verb. Only `"establish"` is acted on.
        request: String,
    },
    /// Acknowledgement that the tunnel request was seen.
    TunnelEstablished {
        /// Always `"ready"`.
        status: String,
    },
    /// Encrypted payload from a client, ciphertext hex encoded.
    Data {
        /// Whether the payload is encrypted. The relay drops plaintext.
        encrypted: bool,
        /// Hex encoding of the AES-256-CBC ciphertext.
        payload: String,
    },
    /// Decrypted payload fanned out to every other client.
    #[serde(rename_all = "camelCase")]
    Relay {
        /// Identifier of the client the payload originated from.
        from_client: ClientId,
        /// Hex encoding of the decrypted payload bytes.
        data: String,
    },
    /// Any frame with an unrecognized `type` tag.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Builds the welcome frame sent once per connection.
    #[must_use]
    pub fn welcome(client_id: ClientId, text: &str, key_hex: String, iv_hex: String) -> Self {
        Self::Welcome {
            client_id,
            message: text.to_string(),
            encryption_key: key_hex,
            encryption_iv: iv_hex,
        }
    }

    /// Builds a ping frame carrying `timestamp`.
    #[must_use]
    pub const fn ping(timestamp: i64) -> Self {
        Self::Ping { timestamp }
    }

    /// Builds the pong answer to a ping.
    #[must_use]
    pub const fn pong(timestamp: i64) -> Self {
        Self::Pong { timestamp }
    }

    /// Builds the tunnel establishment request.
    #[must_use]
    pub fn tunnel_establish() -> Self {
        Self::Tunnel {
            request: TUNNEL_REQUEST_ESTABLISH.to_string(),
        }
    }

    /// Builds the tunnel acknowledgement.
    #[must_use]
    pub fn tunnel_established() -> Self {
        Self::TunnelEstablished {
            status: TUNNEL_STATUS_READY.to_string(),
        }
    }

    /// Builds a data frame from raw ciphertext bytes.
    #[must_use]
    pub fn data(ciphertext: &[u8]) -> Self {
        Self::Data {
            encrypted: true,
            payload: hex::encode(ciphertext),
        }
    }

    /// Builds a relay frame from decrypted payload bytes.
    #[must_use]
    pub fn relay(from_client: ClientId, plaintext: &[u8]) -> Self {
        Self::Relay {
            from_client,
            data: hex::encode(plaintext),
        }
    }

    /// Serializes the frame as one newline-terminated JSON line.
    ///
    /// # Examples
    ///
    /// ```
    /// use burrow_common::message::Message;
    ///
    /// let line = Message::ping(1_700_000_000_000).to_line().unwrap();
    /// assert!(line.ends_with(b"\n"));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if JSON serialization fails.
    pub fn to_line(&self) -> Result<Vec<u8>, ParseError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Parses one wire line (without or with surrounding whitespace) into a
    /// frame.
    ///
    /// # Examples
    ///
    /// ```
    /// use burrow_common::message::Message;
    ///
    /// let msg = Message::from_line(br#"{"type":"ping","timestamp":42}"#).unwrap();
    /// assert_eq!(msg, Message::ping(42));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the bytes are not a JSON object carrying a
    /// known shape, including a missing field for the tagged variant.
    pub fn from_line(line: &[u8]) -> Result<Self, ParseError> {
        Ok(serde_json::from_slice(line)?)
    }

    /// Returns the frame's `type` tag as a static string.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Tunnel { .. } => "tunnel",
            Self::TunnelEstablished { .. } => "tunnel_established",
            Self::Data { .. } => "data",
            Self::Relay { .. } => "relay",
            Self::Unknown => "unknown",
        }
    }
}
