//! Connection-fatal protocol faults.
//!
//! A `ProtocolError` means the byte stream can no longer be trusted — the
//! decoder is desynchronized, an integrity check failed, or the peer sent
//! something the protocol does not allow. The owning connection must be torn
//! down; none of these are retried on the same bytes.

/// Errors that invalidate the current connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Underlying stream I/O failure surfaced through the codec.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame length field exceeds the configured maximum.
    #[error("oversize frame: {len} bytes exceeds maximum {max}")]
    OversizeFrame {
        /// Length the peer claimed.
        len: usize,
        /// Configured frame size limit.
        max: usize,
    },

    /// Frame magic bytes did not match — the stream is desynchronized.
    #[error("bad frame magic: {0:02x?}")]
    BadMagic([u8; 4]),

    /// Payload too short to contain a message header.
    #[error("truncated message header: {len} bytes")]
    TruncatedHeader {
        /// Actual payload length.
        len: usize,
    },

    /// Decryption or authentication-tag verification failed.
    #[error("payload integrity check failed")]
    IntegrityFailure,

    /// A multi container's internal structure is inconsistent.
    #[error("malformed multi container: {0}")]
    MalformedMulti(&'static str),

    /// The peer sent a message the current phase does not allow.
    #[error("unexpected message kind {kind} in {phase}")]
    UnexpectedMessage {
        /// Raw message kind received.
        kind: u32,
        /// Connection phase that rejected it.
        phase: &'static str,
    },
}
