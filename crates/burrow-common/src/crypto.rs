//! AES-256-CBC engine shared by the relay and its clients.
//!
//! One [`KeyContext`] is generated per server process and handed to every
//! client in the welcome frame, hex encoded. All sessions encrypt and
//! decrypt against the same key and the same static IV, so identical
//! plaintexts produce identical ciphertexts across the whole process. That
//! is a real cryptographic weakness; the protocol accepts it so that a
//! single welcome frame is enough to join the relay.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// CBC initialization vector length in bytes.
pub const IV_LEN: usize = 16;

/// AES block size in bytes.
const BLOCK_LEN: usize = 16;

// ── Key material ─────────────────────────────────────────────────────────

/// Errors raised while reconstructing key material from its hex form.
// No Eq: hex::FromHexError only implements PartialEq.
#[derive(Debug, Error, PartialEq)]
pub enum KeyError {
    /// The string was not valid hex.
    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),
    /// The decoded bytes had the wrong length.
    #[error("wrong key material length: expected {expected} bytes, got {got}")]
    Length {
        /// Required byte length.
        expected: usize,
        /// Length actually decoded.
        got: usize,
    },
}

/// Process-wide AES-256-CBC key material.
///
/// Created once at server start and never rotated. Clients rebuild it from
/// the hex fields of the welcome frame via [`KeyContext::from_hex`].
#[derive(Clone)]
pub struct KeyContext {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl KeyContext {
    /// Generates fresh random key material from the OS entropy source.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Rebuilds key material from the hex strings carried in a welcome
    /// frame.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if either string is not hex or decodes to the
    /// wrong number of bytes.
    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self, KeyError> {
        let key = hex::decode(key_hex)?;
        let key: [u8; KEY_LEN] = key.try_into().map_err(|v: Vec<u8>| KeyError::Length {
            expected: KEY_LEN,
            got: v.len(),
        })?;
        let iv = hex::decode(iv_hex)?;
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|v: Vec<u8>| KeyError::Length {
            expected: IV_LEN,
            got: v.len(),
        })?;
        Ok(Self { key, iv })
    }

    /// Hex encoding of the key, as sent in the welcome frame.
    #[must_use]
    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }

    /// Hex encoding of the IV, as sent in the welcome frame.
    #[must_use]
    pub fn iv_hex(&self) -> String {
        hex::encode(self.iv)
    }
}

// Key bytes stay out of Debug output so they cannot leak through logs.
impl std::fmt::Debug for KeyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyContext")
            .field("key", &"[redacted]")
            .field("iv", &"[redacted]")
            .finish()
    }
}

// ── Cipher ───────────────────────────────────────────────────────────────

/// Errors raised while decrypting a ciphertext.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptError {
    /// The ciphertext length is not a positive multiple of the block size.
    #[error("ciphertext length {0} is not a multiple of the cipher block size")]
    Length(usize),
    /// The decrypted block had invalid PKCS#7 padding, which usually means
    /// the ciphertext was corrupted or produced under different material.
    #[error("bad padding after decryption")]
    Padding,
}

/// Stateless AES-256-CBC encrypt/decrypt around a [`KeyContext`].
///
/// # Examples
///
/// ```
/// use burrow_common::crypto::{CryptoEngine, KeyContext};
///
/// let engine = CryptoEngine::new(KeyContext::generate());
/// let ciphertext = engine.encrypt(b"hello");
/// assert_eq!(engine.decrypt(&ciphertext).unwrap(), b"hello");
/// ```
#[derive(Debug, Clone)]
pub struct CryptoEngine {
    ctx: KeyContext,
}

impl CryptoEngine {
    /// Wraps the given key material.
    #[must_use]
    pub fn new(ctx: KeyContext) -> Self {
        Self { ctx }
    }

    /// The key material this engine operates with.
    #[must_use]
    pub fn context(&self) -> &KeyContext {
        &self.ctx
    }

    /// Encrypts `plaintext` with PKCS#7 padding.
    ///
    /// The output is always a positive multiple of the block size; empty
    /// input encrypts to one full padding block.
    #[must_use]
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.ctx.key.into(), &self.ctx.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypts `ciphertext` and strips the padding.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptError::Length`] when the input cannot be a CBC
    /// ciphertext at all, and [`DecryptError::Padding`] when decryption
    /// yields an invalid padding block.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(DecryptError::Length(ciphertext.len()));
        }
        Aes256CbcDec::new(&self.ctx.key.into(), &self.ctx.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| DecryptError::Padding)
    }
}

/// Current Unix time in milliseconds, for ping timestamps.
///
/// # Examples
///
/// ```
/// let now = burrow_common::crypto::unix_millis();
/// assert!(now > 1_700_000_000_000);
/// ```
#[must_use]
pub fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
