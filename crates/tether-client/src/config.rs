//! Client configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tether_core::frame::DEFAULT_MAX_FRAME;

/// Address of one gateway server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddr {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ServerAddr {
    /// Build an address from parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in server address `{s}`"))?;
        if host.is_empty() {
            return Err(format!("missing host in server address `{s}`"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("bad port in server address `{s}`: {e}"))?;
        Ok(Self::new(host, port))
    }
}

/// Tunables for one client instance.
///
/// [`ClientConfig::default`] carries production-shaped values; tests shrink
/// the timing knobs to keep suites fast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway servers to rotate through. Must be non-empty.
    pub servers: Vec<ServerAddr>,

    /// Deadline for each establishment step (dial, key exchange, logon).
    pub handshake_timeout: Duration,

    /// Default deadline for a submitted job.
    pub job_timeout: Duration,

    /// Heartbeat intervals of inbound silence tolerated before the
    /// connection is declared dead.
    pub heartbeat_grace: u32,

    /// First delay between connection attempts.
    pub initial_backoff: Duration,

    /// Backoff ceiling; delays double up to this.
    pub max_backoff: Duration,

    /// Maximum frame payload accepted or produced.
    pub frame_max_size: usize,

    /// Consecutive failures before a server is put on cooldown.
    pub failure_threshold: u32,

    /// How long a failing server is deprioritized.
    pub cooldown: Duration,

    /// Opaque credentials body sent with the logon request.
    pub logon_body: Vec<u8>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            handshake_timeout: Duration::from_secs(10),
            job_timeout: Duration::from_secs(20),
            heartbeat_grace: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            frame_max_size: DEFAULT_MAX_FRAME,
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            logon_body: Vec::new(),
        }
    }
}
