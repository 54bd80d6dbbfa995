//! The public client handle.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use tether_core::{Message, MsgKind};

use crate::config::ClientConfig;
use crate::connection::{self, ConnectionState, Session, Shared};
use crate::error::{ConnectError, JobError};
use crate::jobs::{self, JobTable};
use crate::pool::ServerPool;

/// How often the deadline sweeper scans pending jobs.
const SWEEP_PERIOD: Duration = Duration::from_millis(25);

/// A session against the gateway server pool.
///
/// `connect` walks the configured pool until a session is ready, then a
/// background supervisor keeps one alive — reconnecting through the pool
/// on transport failure or heartbeat timeout — until [`CmClient::disconnect`]
/// or the pool is exhausted. Requests go through [`CmClient::submit_job`];
/// unsolicited server pushes through [`CmClient::subscribe`].
pub struct CmClient {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CmClient {
    /// Establish a session and start supervising it.
    ///
    /// Returns once the connection is ready, or with the first terminal
    /// failure: an exhausted pool or a rejected logon.
    pub async fn connect(config: ClientConfig) -> Result<Self, ConnectError> {
        if config.servers.is_empty() {
            return Err(ConnectError::PoolExhausted);
        }

        let pool = ServerPool::new(
            config.servers.iter().cloned(),
            config.failure_threshold,
            config.cooldown,
        );
        let (state_tx, mut state_rx) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            config,
            pool: Mutex::new(pool),
            jobs: Arc::new(JobTable::new()),
            state_tx,
            session: Mutex::new(None),
            outbound: Mutex::new(None),
            last_error: Mutex::new(None),
            instance_id: rand::random::<u64>(),
        });

        let link = connection::establish(&shared).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = tokio::spawn(connection::supervise(shared.clone(), link, shutdown_rx));
        let sweeper = tokio::spawn(jobs::sweep(shared.jobs.clone(), SWEEP_PERIOD));

        // The supervisor flips the watch to Ready once the transport and
        // heartbeat tasks are wired up. Landing back on Disconnected instead
        // means the session died and reconnection failed terminally before
        // Ready was ever observed here.
        let settled = state_rx
            .wait_for(|state| {
                matches!(
                    state,
                    ConnectionState::Ready | ConnectionState::Disconnected
                )
            })
            .await
            .map(|state| *state)
            .unwrap_or(ConnectionState::Disconnected);
        if settled == ConnectionState::Disconnected {
            supervisor.abort();
            sweeper.abort();
            let err = shared.last_error.lock().take();
            return Err(err.unwrap_or(ConnectError::PoolExhausted));
        }

        Ok(Self {
            shared,
            shutdown_tx,
            supervisor: Mutex::new(Some(supervisor)),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Send a request and await its response, under the default job timeout.
    pub async fn submit_job(&self, kind: MsgKind, body: Bytes) -> Result<Message, JobError> {
        let timeout = self.shared.config.job_timeout;
        self.submit_job_with_timeout(kind, body, timeout).await
    }

    /// Send a request and await its response within `timeout`.
    ///
    /// The response resolves exactly once: a reply after the deadline is
    /// discarded, and a connection drop fails the job immediately.
    pub async fn submit_job_with_timeout(
        &self,
        kind: MsgKind,
        body: Bytes,
        timeout: Duration,
    ) -> Result<Message, JobError> {
        if Message::HEADER_LEN + body.len() > self.shared.config.frame_max_size {
            return Err(JobError::PayloadTooLarge);
        }
        let Some(outbound) = self.shared.outbound.lock().clone() else {
            return Err(JobError::NotConnected);
        };

        let (id, response) = self.shared.jobs.begin(timeout);
        let msg = Message::new(kind, body).with_source_job(id);
        if outbound.send(msg).await.is_err() {
            let _ = self.shared.jobs.cancel(id);
            return Err(JobError::NotConnected);
        }

        // A teardown racing this submit can drain the pending table before
        // this job landed in it; reap the orphan rather than letting it
        // wait out its deadline.
        if self.shared.reap_orphaned_job(id) {
            return Err(JobError::Disconnected);
        }

        match response.await {
            Ok(result) => result,
            // Slot dropped without resolution: the table itself went away.
            Err(_) => Err(JobError::Disconnected),
        }
    }

    /// Send a message without expecting a response.
    pub async fn send(&self, kind: MsgKind, body: Bytes) -> Result<(), JobError> {
        if Message::HEADER_LEN + body.len() > self.shared.config.frame_max_size {
            return Err(JobError::PayloadTooLarge);
        }
        let Some(outbound) = self.shared.outbound.lock().clone() else {
            return Err(JobError::NotConnected);
        };
        outbound
            .send(Message::new(kind, body))
            .await
            .map_err(|_| JobError::NotConnected)
    }

    /// Subscribe to unsolicited pushes of one message kind.
    ///
    /// Subscriptions survive reconnects. A subscriber that stops polling
    /// has pushes dropped rather than stalling delivery.
    pub fn subscribe(&self, kind: MsgKind) -> ReceiverStream<Message> {
        ReceiverStream::new(self.shared.jobs.subscribe(kind))
    }

    /// Watch connection state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Facts about the current session, if one is established.
    pub fn session(&self) -> Option<Session> {
        *self.shared.session.lock()
    }

    /// Tear the session down and stop supervising.
    ///
    /// Pending jobs fail with [`JobError::Disconnected`]; the state watch
    /// lands on `Disconnected`. Safe to call more than once.
    pub async fn disconnect(&self) {
        // Best-effort logoff notice; the server finds out either way.
        if let Some(outbound) = self.shared.outbound.lock().clone() {
            let _ = outbound.try_send(Message::new(MsgKind::LogOff, Bytes::new()));
        }

        let _ = self.shutdown_tx.send(true);
        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            debug!("waiting for supervisor shutdown");
            let _ = handle.await;
        }
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for CmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CmClient(..)")
    }
}

impl Drop for CmClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}
