//! Request/response correlation and push-message fanout.
//!
//! Every outbound request is a job: a fresh id, an entry in the pending
//! table, and a oneshot the caller awaits. Inbound messages carrying a
//! target job resolve that entry exactly once; late responses after a
//! timeout find no entry and are discarded. Messages with no target are
//! pushes and fan out to per-kind subscribers.
//!
//! Deadlines are enforced by a single sweeper driving [`JobTable::expire`],
//! not a timer per job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use tether_core::{JobId, Message, MsgKind, ProtocolError};

use crate::error::JobError;

/// Buffered pushes per subscriber before drops begin.
const SUBSCRIBER_BUFFER: usize = 64;

struct PendingJob {
    slot: oneshot::Sender<Result<Message, JobError>>,
    deadline: Instant,
}

/// Shared table of in-flight jobs and push subscriptions.
///
/// The table outlives individual connections: subscriptions survive a
/// reconnect, while [`JobTable::fail_all`] clears pending jobs whenever the
/// session drops.
pub(crate) struct JobTable {
    next_id: AtomicU64,
    pending: Mutex<HashMap<JobId, PendingJob>>,
    subscribers: Mutex<HashMap<MsgKind, Vec<mpsc::Sender<Message>>>>,
}

impl JobTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new job; returns its id and the slot the caller awaits.
    pub(crate) fn begin(
        &self,
        timeout: Duration,
    ) -> (JobId, oneshot::Receiver<Result<Message, JobError>>) {
        let id = JobId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let prev = self.pending.lock().insert(
            id,
            PendingJob {
                slot: tx,
                deadline: Instant::now() + timeout,
            },
        );
        debug_assert!(prev.is_none());
        (id, rx)
    }

    /// Drop a job that was never sent. Returns whether it was still pending.
    pub(crate) fn cancel(&self, id: JobId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Route one inbound frame payload's worth of messages.
    ///
    /// Multi containers are unpacked and their parts routed in order. A
    /// malformed container is a protocol error; the caller tears the
    /// connection down.
    pub(crate) fn deliver(&self, msg: Message) -> Result<(), ProtocolError> {
        if msg.kind == MsgKind::Multi {
            for part in msg.unpack_multi()? {
                if part.kind == MsgKind::Multi {
                    return Err(ProtocolError::MalformedMulti("nested container"));
                }
                self.deliver_single(part);
            }
            Ok(())
        } else {
            self.deliver_single(msg);
            Ok(())
        }
    }

    fn deliver_single(&self, msg: Message) {
        if msg.target_job.is_some() {
            let entry = self.pending.lock().remove(&msg.target_job);
            match entry {
                Some(job) => {
                    trace!(job = %msg.target_job, kind = %msg.kind, "job completed");
                    let _ = job.slot.send(Ok(msg));
                }
                // Already timed out, cancelled, or never ours.
                None => debug!(job = %msg.target_job, kind = %msg.kind, "discarding late response"),
            }
        } else {
            self.publish(&msg);
        }
    }

    /// Fan a push message out to its kind's subscribers.
    fn publish(&self, msg: &Message) {
        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(&msg.kind) else {
            trace!(kind = %msg.kind, "push with no subscribers");
            return;
        };
        list.retain(|tx| !tx.is_closed());
        for tx in list.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(msg.clone()) {
                warn!(kind = %msg.kind, "slow subscriber, dropping push");
            }
        }
        if list.is_empty() {
            let _ = subscribers.remove(&msg.kind);
        }
    }

    /// Open a push subscription for one message kind.
    pub(crate) fn subscribe(&self, kind: MsgKind) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().entry(kind).or_default().push(tx);
        rx
    }

    /// Resolve every job whose deadline has passed. Returns how many expired.
    pub(crate) fn expire(&self, now: Instant) -> usize {
        let mut pending = self.pending.lock();
        let due: Vec<JobId> = pending
            .iter()
            .filter(|(_, job)| job.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            if let Some(job) = pending.remove(id) {
                debug!(job = %id, "job deadline passed");
                let _ = job.slot.send(Err(JobError::Timeout));
            }
        }
        due.len()
    }

    /// Resolve every pending job with `err`. Used at teardown.
    pub(crate) fn fail_all(&self, err: JobError) {
        let drained: Vec<PendingJob> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, job)| job).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), error = %err, "failing pending jobs");
        }
        for job in drained {
            let _ = job.slot.send(Err(err));
        }
    }

    /// Number of in-flight jobs.
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Periodically sweep `jobs` for expired deadlines until aborted.
pub(crate) async fn sweep(jobs: std::sync::Arc<JobTable>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        let _ = ticker.tick().await;
        let _ = jobs.expire(Instant::now());
    }
}
