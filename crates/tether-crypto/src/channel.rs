//! Symmetric payload encryption for an established channel.
//!
//! Sealed payload layout: `[12-byte nonce][ciphertext + 16-byte tag]`.
//! A fresh random nonce is drawn per payload; the tag authenticates the
//! ciphertext, so any corruption or tampering fails `open` and the
//! connection must be torn down.

use bytes::Bytes;
use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

/// Bytes in a session key.
pub const SESSION_KEY_LEN: usize = 32;

/// Bytes of nonce prefixed to every sealed payload.
pub const NONCE_LEN: usize = 12;

/// Failures sealing or opening a payload.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    /// Encryption failed (payload too large for the AEAD).
    #[error("payload encryption failed")]
    Seal,

    /// Decryption or tag verification failed — the payload cannot be trusted.
    #[error("payload integrity check failed")]
    Open,
}

impl From<CipherError> for tether_core::ProtocolError {
    fn from(_: CipherError) -> Self {
        tether_core::ProtocolError::IntegrityFailure
    }
}

/// The negotiated symmetric key, immutable for the life of one connection.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Draw a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// AEAD cipher applied to every frame payload after the handshake.
#[derive(Clone)]
pub struct ChannelCipher {
    cipher: ChaCha20Poly1305,
}

impl ChannelCipher {
    /// Build a cipher from the negotiated session key.
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    /// Encrypt a payload: random nonce prefix + ciphertext + tag.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Bytes, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(Bytes::from(sealed))
    }

    /// Decrypt and verify a sealed payload.
    pub fn open(&self, sealed: &[u8]) -> Result<Bytes, CipherError> {
        if sealed.len() < NONCE_LEN {
            return Err(CipherError::Open);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::Open)?;
        Ok(Bytes::from(plaintext))
    }
}

impl std::fmt::Debug for ChannelCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChannelCipher(..)")
    }
}
