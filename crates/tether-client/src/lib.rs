//! # tether-client
//!
//! The connection engine: one secure, multiplexed session against a pool of
//! gateway servers.
//!
//! [`CmClient::connect`] dials pool candidates in health order, runs the key
//! exchange and logon, and hands back a ready client. From there:
//!
//! - [`CmClient::submit_job`] — request/response with correlation ids,
//!   multiplexed over the single connection
//! - [`CmClient::subscribe`] — fanout of unsolicited server pushes by kind
//! - [`CmClient::state`] — watchable connection lifecycle
//!
//! A background supervisor owns the connection: it heartbeats, detects dead
//! servers through inbound silence, tears down on the first wire fault, and
//! reconnects through the pool with exponential backoff. Pending jobs never
//! outlive the connection they were sent on.
//!
//! ## Crate Position
//!
//! Top of the stack: builds on `tether-core` (framing, messages) and
//! `tether-crypto` (key exchange, channel cipher).

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;

mod heartbeat;
mod jobs;
mod transport;

pub use client::CmClient;
pub use config::{ClientConfig, ServerAddr};
pub use connection::{ConnectionState, Session};
pub use error::{ConnectError, JobError, TransportError};
