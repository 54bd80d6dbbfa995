//! The one-time key exchange establishing a session's symmetric key.
//!
//! The client generates a random session key plus nonce material, encrypts
//! both under the embedded universe public key, and sends the result as a
//! handshake request. The server answers with a result code: success
//! establishes the channel, anything else fails this connection attempt —
//! the state machine may then fail over to a different pool candidate, but
//! never retries the same server within the attempt.
//!
//! Request body: `[version: u32 LE][blob_len: u32 LE][encrypted blob]
//! [sha256(encrypted blob): 32 bytes]`. The digest lets the server discard
//! corrupted requests before attempting a decryption.
//! Result body: `[code: u32 LE]`.

use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha2::{Digest, Sha256};

use tether_core::message::RESULT_OK;
use tether_core::{Message, MsgKind, ProtocolError};

use crate::channel::{ChannelCipher, SessionKey, SESSION_KEY_LEN};

/// Handshake wire format version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Random bytes appended to the session key for replay resistance.
pub const NONCE_MATERIAL_LEN: usize = 16;

const DIGEST_LEN: usize = 32;

/// Universe public key the session key is encrypted under.
///
/// DER-encoded SubjectPublicKeyInfo, base64. The matching private half
/// lives server-side only (the `test-support` module carries a copy so
/// mock gateways can complete the exchange).
const UNIVERSE_PUBLIC_KEY_B64: &str = "\
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAun6CSITaMtaVWjqsanlyIduahPbA\
JNyJ5k2P9rkGo0zq5e9aBiFWB2h5UuyeL0VLkIHEKIgq9d6LgPq+n/LN129x7b2jP6P9aV+e\
YujYykV6igpVrxPUVUo7XIXlxcxUe4YzKp3ypHjyiqzZfLhTStWQh1P9ZDwccVpyImhNMzKO\
fT0qQ7HXaCJs6OAg2YBDOF3dDuPZqnCJ5MQ4+gY1UWp23EHHrz1LWva7Qg7BErskoXjM1Imv\
XcTR3ZwkdI99kF7hKn21Yqz1hqOilN3phrH1VOJxPvggWtUsjbIB0ss7+cU9LQtG+IIqWKaz\
NYJAQJs7AShtsOiH1ACq2t12VQIDAQAB";

/// Where the key exchange currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No exchange attempted on this connection yet.
    Unestablished,
    /// Request sent; awaiting the server's verdict.
    KeyExchangePending,
    /// Exchange succeeded; payloads are now encrypted.
    Established,
    /// Exchange failed; the connection must be torn down.
    Failed,
}

/// Failures of the key exchange.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The server rejected the offered key.
    #[error("key exchange rejected by server: code {0}")]
    Rejected(u32),

    /// Asymmetric encryption or key parsing failed locally.
    #[error("key exchange failed: {0}")]
    KeyExchange(String),

    /// The peer violated the handshake protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An operation was driven out of order.
    #[error("handshake in wrong state for {0}")]
    InvalidState(&'static str),
}

/// Client side of the key exchange.
pub struct Handshake {
    state: HandshakeState,
    public_key: RsaPublicKey,
    session_key: Option<SessionKey>,
}

impl Handshake {
    /// A handshake against the embedded universe key.
    pub fn new() -> Result<Self, HandshakeError> {
        let der = base64::engine::general_purpose::STANDARD
            .decode(UNIVERSE_PUBLIC_KEY_B64)
            .map_err(|e| HandshakeError::KeyExchange(format!("embedded key: {e}")))?;
        let public_key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| HandshakeError::KeyExchange(format!("embedded key: {e}")))?;
        Ok(Self::with_public_key(public_key))
    }

    /// A handshake against a caller-supplied public key.
    pub fn with_public_key(public_key: RsaPublicKey) -> Self {
        Self {
            state: HandshakeState::Unestablished,
            public_key,
            session_key: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Generate the session key and build the handshake request.
    ///
    /// Transitions `Unestablished -> KeyExchangePending`.
    pub fn begin(&mut self) -> Result<Message, HandshakeError> {
        if self.state != HandshakeState::Unestablished {
            return Err(HandshakeError::InvalidState("begin"));
        }

        let session_key = SessionKey::generate();
        let mut blob = [0u8; SESSION_KEY_LEN + NONCE_MATERIAL_LEN];
        blob[..SESSION_KEY_LEN].copy_from_slice(session_key.as_bytes());
        OsRng.fill_bytes(&mut blob[SESSION_KEY_LEN..]);

        let encrypted = self
            .public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &blob)
            .map_err(|e| {
                self.state = HandshakeState::Failed;
                HandshakeError::KeyExchange(e.to_string())
            })?;

        self.session_key = Some(session_key);
        self.state = HandshakeState::KeyExchangePending;
        Ok(Message::new(
            MsgKind::HandshakeRequest,
            encode_request_body(&encrypted),
        ))
    }

    /// Consume the server's verdict.
    ///
    /// Transitions `KeyExchangePending -> Established` (returning the channel
    /// cipher) or `-> Failed`.
    pub fn complete(&mut self, result: &Message) -> Result<ChannelCipher, HandshakeError> {
        if self.state != HandshakeState::KeyExchangePending {
            return Err(HandshakeError::InvalidState("complete"));
        }

        if result.kind != MsgKind::HandshakeResult {
            self.state = HandshakeState::Failed;
            return Err(ProtocolError::UnexpectedMessage {
                kind: result.kind.as_u32(),
                phase: "key exchange",
            }
            .into());
        }

        let code = parse_result_body(&result.body)?;
        if code != RESULT_OK {
            self.state = HandshakeState::Failed;
            return Err(HandshakeError::Rejected(code));
        }

        // Checked: begin() stored the key before entering KeyExchangePending.
        let session_key = self
            .session_key
            .take()
            .ok_or(HandshakeError::InvalidState("complete"))?;
        self.state = HandshakeState::Established;
        Ok(ChannelCipher::new(&session_key))
    }
}

pub(crate) fn encode_request_body(encrypted: &[u8]) -> Bytes {
    let digest = Sha256::digest(encrypted);
    let mut body = BytesMut::with_capacity(8 + encrypted.len() + DIGEST_LEN);
    body.put_u32_le(PROTOCOL_VERSION);
    body.put_u32_le(encrypted.len() as u32);
    body.put_slice(encrypted);
    body.put_slice(&digest);
    body.freeze()
}

pub(crate) fn parse_request_body(body: &Bytes) -> Result<Bytes, ProtocolError> {
    let mut body = body.clone();
    if body.len() < 8 {
        return Err(ProtocolError::TruncatedHeader { len: body.len() });
    }
    let version = body.get_u32_le();
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnexpectedMessage {
            kind: version,
            phase: "handshake version",
        });
    }
    let blob_len = body.get_u32_le() as usize;
    if body.len() != blob_len + DIGEST_LEN {
        return Err(ProtocolError::TruncatedHeader { len: body.len() });
    }
    let encrypted = body.split_to(blob_len);
    if Sha256::digest(&encrypted)[..] != body[..] {
        return Err(ProtocolError::IntegrityFailure);
    }
    Ok(encrypted)
}

pub(crate) fn encode_result_body(code: u32) -> Bytes {
    Bytes::copy_from_slice(&code.to_le_bytes())
}

pub(crate) fn parse_result_body(body: &Bytes) -> Result<u32, ProtocolError> {
    if body.len() < 4 {
        return Err(ProtocolError::TruncatedHeader { len: body.len() });
    }
    Ok(u32::from_le_bytes([body[0], body[1], body[2], body[3]]))
}
