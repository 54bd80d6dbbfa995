//! # tether-crypto
//!
//! Cryptographic channel setup for the tether connection engine.
//!
//! Two pieces:
//!
//! - [`handshake::Handshake`] — the one-time key exchange: a random session
//!   key is encrypted under the embedded universe public key and offered to
//!   the server; the server's verdict either establishes the channel or
//!   fails the connection attempt.
//! - [`channel::ChannelCipher`] — the symmetric AEAD applied to every frame
//!   payload once the exchange succeeds.
//!
//! The concrete primitives (RSA-OAEP/SHA-256 and ChaCha20-Poly1305) are an
//! implementation detail of this crate; nothing outside it names them.
//!
//! The `test-support` feature exposes the server half of the handshake so a
//! mock gateway can complete the exchange in integration tests.

#![deny(unsafe_code)]

pub mod channel;
pub mod handshake;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use channel::{ChannelCipher, CipherError, SessionKey};
pub use handshake::{Handshake, HandshakeError, HandshakeState};
