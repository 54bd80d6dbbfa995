//! # tether-core
//!
//! Foundation types, wire codecs, and errors for the tether connection engine.
//!
//! This crate provides the shared vocabulary the other tether crates depend on:
//!
//! - **Frames**: [`frame::FrameCodec`] — length-prefixed, magic-tagged framing
//!   over the raw byte stream
//! - **Messages**: [`message::Message`] with [`message::MsgKind`] and
//!   [`message::JobId`] correlation ids, plus the multi-container codec
//! - **Errors**: [`error::ProtocolError`] — faults that are fatal to a
//!   connection
//! - **Logging**: [`logging`] — `tracing` subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `tether-crypto` and `tether-client`.

#![deny(unsafe_code)]

pub mod error;
pub mod frame;
pub mod logging;
pub mod message;

pub use error::ProtocolError;
pub use frame::FrameCodec;
pub use message::{JobId, LogonResponse, Message, MsgKind};
