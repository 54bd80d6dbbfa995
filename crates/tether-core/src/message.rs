//! Messages: the unit the job dispatcher operates on.
//!
//! Post-handshake frame payloads carry a fixed 20-byte header —
//! `[kind: u32 LE][target_job: u64 LE][source_job: u64 LE]` — followed by an
//! opaque body. Body decoding belongs to higher-level collaborators; this
//! engine only reads the handful of bodies it owns (handshake result, logon
//! response, multi containers).

use std::fmt;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Result code meaning "success" in handshake results and logon responses.
pub const RESULT_OK: u32 = 1;

/// Correlation id tying a response to its outstanding request.
///
/// Ids are unique and monotonically increasing for the lifetime of one
/// connection. [`JobId::NONE`] marks messages that are not part of any
/// request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Sentinel for "no job": unsolicited messages and fire-and-forget sends.
    pub const NONE: JobId = JobId(u64::MAX);

    /// Wrap a raw wire value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw wire value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Whether this id refers to an actual job.
    pub fn is_some(self) -> bool {
        self != Self::NONE
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Message kinds the engine itself understands.
///
/// Everything else travels as [`MsgKind::Other`]; the engine routes those by
/// job id or subscription without interpreting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    /// Container bundling several complete messages in one frame.
    ///
    /// Container bodies are always raw length-prefixed sub-messages;
    /// compressed container payloads are not part of this protocol.
    Multi,
    /// Client liveness message sent on the negotiated interval.
    Heartbeat,
    /// Client-initiated session teardown notice.
    LogOff,
    /// Server verdict on a logon request.
    LogonResponse,
    /// Key-exchange request: asymmetrically encrypted session key.
    HandshakeRequest,
    /// Key-exchange verdict from the server.
    HandshakeResult,
    /// Logon request carrying an opaque credentials body.
    Logon,
    /// A kind owned by a higher-level collaborator.
    Other(u32),
}

impl MsgKind {
    /// Decode from the wire representation.
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            1 => Self::Multi,
            703 => Self::Heartbeat,
            706 => Self::LogOff,
            751 => Self::LogonResponse,
            1304 => Self::HandshakeRequest,
            1305 => Self::HandshakeResult,
            5514 => Self::Logon,
            other => Self::Other(other),
        }
    }

    /// Encode to the wire representation.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Multi => 1,
            Self::Heartbeat => 703,
            Self::LogOff => 706,
            Self::LogonResponse => 751,
            Self::HandshakeRequest => 1304,
            Self::HandshakeResult => 1305,
            Self::Logon => 5514,
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for MsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(raw) => write!(f, "other({raw})"),
            known => write!(f, "{known:?}"),
        }
    }
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// What the message is.
    pub kind: MsgKind,
    /// Job this message answers, or [`JobId::NONE`].
    pub target_job: JobId,
    /// Job the sender will accept replies under, or [`JobId::NONE`].
    pub source_job: JobId,
    /// Opaque body bytes.
    pub body: Bytes,
}

impl Message {
    /// Header bytes preceding every body.
    pub const HEADER_LEN: usize = 20;

    /// A message outside any request/response exchange.
    pub fn new(kind: MsgKind, body: Bytes) -> Self {
        Self {
            kind,
            target_job: JobId::NONE,
            source_job: JobId::NONE,
            body,
        }
    }

    /// Tag this message as a request awaiting replies under `job`.
    pub fn with_source_job(mut self, job: JobId) -> Self {
        self.source_job = job;
        self
    }

    /// Tag this message as a reply to `job`.
    pub fn with_target_job(mut self, job: JobId) -> Self {
        self.target_job = job;
        self
    }

    /// Serialize header + body into one frame payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN + self.body.len());
        buf.put_u32_le(self.kind.as_u32());
        buf.put_u64_le(self.target_job.raw());
        buf.put_u64_le(self.source_job.raw());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Parse a frame payload into header + body.
    pub fn parse(mut payload: Bytes) -> Result<Self, ProtocolError> {
        if payload.len() < Self::HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader {
                len: payload.len(),
            });
        }
        let kind = MsgKind::from_u32(payload.get_u32_le());
        let target_job = JobId::from_raw(payload.get_u64_le());
        let source_job = JobId::from_raw(payload.get_u64_le());
        Ok(Self {
            kind,
            target_job,
            source_job,
            body: payload,
        })
    }

    /// Bundle complete messages into one multi container, preserving order.
    pub fn pack_multi(parts: &[Message]) -> Message {
        let mut body = BytesMut::new();
        for part in parts {
            let encoded = part.encode();
            body.put_u32_le(encoded.len() as u32);
            body.put_slice(&encoded);
        }
        Message::new(MsgKind::Multi, body.freeze())
    }

    /// Unpack a multi container body into its sub-messages, in order.
    ///
    /// The body must be uncompressed; there is no deflate path here.
    pub fn unpack_multi(&self) -> Result<Vec<Message>, ProtocolError> {
        let mut body = self.body.clone();
        let mut parts = Vec::new();
        while !body.is_empty() {
            if body.len() < 4 {
                return Err(ProtocolError::MalformedMulti("truncated length prefix"));
            }
            let len = body.get_u32_le() as usize;
            if body.len() < len {
                return Err(ProtocolError::MalformedMulti("truncated sub-message"));
            }
            parts.push(Message::parse(body.split_to(len))?);
        }
        Ok(parts)
    }
}

/// Fixed trailer the server sends in answer to a logon request.
///
/// `[result: u32 LE][heartbeat_interval_secs: u32 LE][assigned_id: u64 LE]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogonResponse {
    /// Logon verdict; [`RESULT_OK`] on success.
    pub result: u32,
    /// Liveness interval the client must honor from now on.
    pub heartbeat_interval: Duration,
    /// Identity the server assigned this session.
    pub assigned_id: u64,
}

impl LogonResponse {
    /// Byte length of the encoded form.
    pub const LEN: usize = 16;

    /// Serialize into a logon-response body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u32_le(self.result);
        buf.put_u32_le(self.heartbeat_interval.as_secs() as u32);
        buf.put_u64_le(self.assigned_id);
        buf.freeze()
    }

    /// Parse from a logon-response body.
    pub fn parse(mut body: Bytes) -> Result<Self, ProtocolError> {
        if body.len() < Self::LEN {
            return Err(ProtocolError::TruncatedHeader { len: body.len() });
        }
        Ok(Self {
            result: body.get_u32_le(),
            heartbeat_interval: Duration::from_secs(u64::from(body.get_u32_le())),
            assigned_id: body.get_u64_le(),
        })
    }
}
