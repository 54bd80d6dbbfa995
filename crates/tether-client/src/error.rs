//! Error taxonomy for connecting, sending, and waiting on jobs.

use tether_core::ProtocolError;
use tether_crypto::HandshakeError;

/// Failures of the byte path under an active or establishing connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer violated the wire protocol; the connection is torn down.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// An establishment step did not complete in time.
    #[error("operation timed out")]
    Timeout,
}

/// Failures surfaced to a caller waiting on a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// No response arrived before the job's deadline.
    #[error("job timed out")]
    Timeout,

    /// The connection dropped while the job was pending.
    #[error("connection lost while job was pending")]
    Disconnected,

    /// No session is established; nothing was sent.
    #[error("not connected")]
    NotConnected,

    /// The request would exceed the frame size limit; nothing was sent.
    #[error("request payload exceeds the frame size limit")]
    PayloadTooLarge,
}

/// Failures establishing a session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Every pool candidate was tried and failed.
    #[error("all gateway servers exhausted")]
    PoolExhausted,

    /// The server refused the logon request.
    #[error("logon rejected by server: code {0}")]
    LogonRejected(u32),

    /// The caller disconnected while a connection was being established.
    #[error("connect cancelled by disconnect")]
    Cancelled,

    /// The key exchange failed on this candidate.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The byte path failed before the session was established.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
