//! The connection state machine: candidate selection, establishment,
//! supervision, and reconnection.
//!
//! One supervisor task owns the session lifecycle. Establishment walks the
//! pool — dial, key exchange, logon — failing over between candidates with
//! exponential backoff and never retrying a candidate within one pass.
//! Once ready, the supervisor parks on the connection's event channel;
//! a transport failure or heartbeat timeout tears the session down, fails
//! every pending job, and starts the walk again. Only a caller's
//! disconnect (or an exhausted pool) ends the loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use tether_core::message::RESULT_OK;
use tether_core::{FrameCodec, JobId, LogonResponse, Message, MsgKind, ProtocolError};
use tether_crypto::{ChannelCipher, Handshake};

use crate::config::{ClientConfig, ServerAddr};
use crate::error::{ConnectError, JobError, TransportError};
use crate::heartbeat::{self, Liveness};
use crate::jobs::JobTable;
use crate::pool::{Outcome, ServerPool};
use crate::transport::{ConnEvent, Transport};

/// Where the connection lifecycle currently stands.
///
/// Observable through [`crate::CmClient::state`]; transitions are driven
/// solely by the supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// Dialing a pool candidate.
    Connecting,
    /// TCP is up; the key exchange is in flight.
    Handshaking,
    /// The channel is encrypted; logon not yet sent.
    Encrypted,
    /// Logon sent; awaiting the server's verdict.
    Authenticating,
    /// Session established; jobs flow.
    Ready,
    /// Teardown in progress.
    Disconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Facts about the established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Identity the server assigned at logon.
    pub assigned_id: u64,
    /// Random identity this client presented at logon.
    pub client_instance_id: u64,
    /// Heartbeat interval the server dictated.
    pub heartbeat_interval: Duration,
}

/// State shared between the public client handle and the supervisor.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) pool: Mutex<ServerPool>,
    pub(crate) jobs: Arc<JobTable>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) session: Mutex<Option<Session>>,
    pub(crate) outbound: Mutex<Option<mpsc::Sender<Message>>>,
    pub(crate) last_error: Mutex<Option<ConnectError>>,
    pub(crate) instance_id: u64,
}

impl Shared {
    pub(crate) fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send_replace(state);
        debug!(%state, "connection state");
    }

    /// Remove `id` from the pending table if the connection was torn down
    /// after the job was registered. Returns whether the job was reaped.
    ///
    /// Teardown clears the outbound slot before draining pending jobs, so a
    /// job registered after the drain is invisible to the batch failure and
    /// would otherwise sit until its deadline.
    pub(crate) fn reap_orphaned_job(&self, id: JobId) -> bool {
        self.outbound.lock().is_none() && self.jobs.cancel(id)
    }
}

/// An established but not yet supervised connection.
pub(crate) struct Link {
    framed: Framed<TcpStream, FrameCodec>,
    cipher: ChannelCipher,
    addr: ServerAddr,
    session: Session,
}

/// Walk the pool until a session is established or the pool is exhausted.
///
/// Each candidate is tried at most once per walk. Failures back off
/// exponentially between attempts, doubling from the configured initial
/// delay up to the ceiling. A logon rejection is terminal: credentials
/// will not improve on a different server.
pub(crate) async fn establish(shared: &Shared) -> Result<Link, ConnectError> {
    let mut tried: HashSet<ServerAddr> = HashSet::new();
    let mut backoff = shared.config.initial_backoff;

    loop {
        let candidate = shared.pool.lock().next_candidate(&tried);
        let Some(addr) = candidate else {
            warn!(tried = tried.len(), "server pool exhausted");
            return Err(ConnectError::PoolExhausted);
        };
        let _ = tried.insert(addr.clone());

        match attempt(shared, &addr).await {
            Ok(link) => {
                shared.pool.lock().record_outcome(&addr, Outcome::Success);
                return Ok(link);
            }
            Err(err) => {
                shared.pool.lock().record_outcome(&addr, Outcome::Failure);
                if matches!(err, ConnectError::LogonRejected(_)) {
                    return Err(err);
                }
                warn!(server = %addr, error = %err, "connection attempt failed");
                shared.set_state(ConnectionState::Disconnecting);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(shared.config.max_backoff);
            }
        }
    }
}

/// One full establishment attempt against a single candidate.
async fn attempt(shared: &Shared, addr: &ServerAddr) -> Result<Link, ConnectError> {
    let config = &shared.config;

    shared.set_state(ConnectionState::Connecting);
    let stream = timeout(
        config.handshake_timeout,
        TcpStream::connect((addr.host.as_str(), addr.port)),
    )
    .await
    .map_err(|_| TransportError::Timeout)?
    .map_err(TransportError::Io)?;
    let mut framed = Framed::new(stream, FrameCodec::new(config.frame_max_size));

    shared.set_state(ConnectionState::Handshaking);
    let mut handshake = Handshake::new()?;
    let request = handshake.begin()?;
    framed
        .send(request.encode())
        .await
        .map_err(TransportError::from)?;
    let verdict = Message::parse(recv_frame(&mut framed, config.handshake_timeout).await?)
        .map_err(TransportError::from)?;
    let cipher = handshake.complete(&verdict)?;
    shared.set_state(ConnectionState::Encrypted);

    // Logon body: the client instance id, then the caller's opaque
    // credentials bytes.
    let mut body = BytesMut::with_capacity(8 + config.logon_body.len());
    body.put_u64_le(shared.instance_id);
    body.put_slice(&config.logon_body);
    let logon = Message::new(MsgKind::Logon, body.freeze());
    let sealed = cipher
        .seal(&logon.encode())
        .map_err(|e| TransportError::from(ProtocolError::from(e)))?;
    framed.send(sealed).await.map_err(TransportError::from)?;
    shared.set_state(ConnectionState::Authenticating);

    let frame = recv_frame(&mut framed, config.handshake_timeout).await?;
    let opened = cipher
        .open(&frame)
        .map_err(|e| TransportError::from(ProtocolError::from(e)))?;
    let response = Message::parse(opened).map_err(TransportError::from)?;
    if response.kind != MsgKind::LogonResponse {
        return Err(TransportError::from(ProtocolError::UnexpectedMessage {
            kind: response.kind.as_u32(),
            phase: "logon",
        })
        .into());
    }
    let logon_response = LogonResponse::parse(response.body).map_err(TransportError::from)?;
    if logon_response.result != RESULT_OK {
        return Err(ConnectError::LogonRejected(logon_response.result));
    }

    let session = Session {
        assigned_id: logon_response.assigned_id,
        client_instance_id: shared.instance_id,
        heartbeat_interval: logon_response.heartbeat_interval,
    };
    info!(
        server = %addr,
        assigned_id = session.assigned_id,
        heartbeat_secs = session.heartbeat_interval.as_secs(),
        "session established"
    );
    Ok(Link {
        framed,
        cipher,
        addr: addr.clone(),
        session,
    })
}

/// Read one frame off `framed` within `deadline`.
async fn recv_frame(
    framed: &mut Framed<TcpStream, FrameCodec>,
    deadline: Duration,
) -> Result<Bytes, TransportError> {
    match timeout(deadline, framed.next()).await {
        Err(_) => Err(TransportError::Timeout),
        Ok(None) => Err(TransportError::Closed),
        Ok(Some(frame)) => Ok(frame?),
    }
}

/// Supervise one session after another until disconnect or terminal failure.
///
/// Holds the invariants the rest of the crate leans on: pending jobs never
/// survive a teardown, the outbound slot is only populated while a session
/// is up, and the state watch always lands back on `Disconnected`.
pub(crate) async fn supervise(
    shared: Arc<Shared>,
    mut link: Link,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let (events_tx, mut events_rx) = mpsc::channel::<ConnEvent>(8);
        let liveness = Arc::new(Liveness::new());

        let transport = Transport::spawn(
            link.framed,
            link.cipher,
            shared.jobs.clone(),
            liveness.clone(),
            events_tx.clone(),
        );
        *shared.outbound.lock() = Some(transport.sender());
        *shared.session.lock() = Some(link.session);
        let monitor = tokio::spawn(heartbeat::run(
            link.session.heartbeat_interval,
            shared.config.heartbeat_grace,
            liveness,
            transport.sender(),
            events_tx,
        ));
        shared.set_state(ConnectionState::Ready);

        let caller_disconnect = tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Some(ConnEvent::Closed(err)) => {
                        warn!(server = %link.addr, error = %err, "connection lost");
                    }
                    Some(ConnEvent::HeartbeatTimeout) => {
                        warn!(server = %link.addr, "heartbeat timeout");
                    }
                    // All senders live in the tasks we hold handles to.
                    None => warn!("connection event channel closed"),
                }
                false
            }
            _ = shutdown_rx.changed() => true,
        };

        shared.set_state(ConnectionState::Disconnecting);
        monitor.abort();
        transport.shutdown();
        *shared.outbound.lock() = None;
        *shared.session.lock() = None;
        shared.jobs.fail_all(JobError::Disconnected);

        if caller_disconnect {
            break;
        }
        shared
            .pool
            .lock()
            .record_outcome(&link.addr, Outcome::Failure);

        tokio::time::sleep(shared.config.initial_backoff).await;
        let next = tokio::select! {
            result = establish(&shared) => result,
            _ = shutdown_rx.changed() => Err(ConnectError::Cancelled),
        };
        match next {
            Ok(next_link) => link = next_link,
            Err(ConnectError::Cancelled) => break,
            Err(err) => {
                error!(error = %err, "reconnect failed, giving up");
                *shared.last_error.lock() = Some(err);
                break;
            }
        }
    }
    shared.set_state(ConnectionState::Disconnected);
}
