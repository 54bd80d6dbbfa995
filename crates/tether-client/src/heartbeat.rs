//! Keepalive sending and inbound-silence detection.
//!
//! After logon the server dictates a heartbeat interval. This task sends a
//! heartbeat every interval and watches the timestamp the reader stamps on
//! every inbound frame; silence past `interval * grace` means the server is
//! gone even though the socket looks open. The task only signals the state
//! machine — teardown and reconnection are not its business.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio::sync::mpsc;
use tracing::warn;

use bytes::Bytes;
use tether_core::{Message, MsgKind};

use crate::transport::ConnEvent;

/// Timestamp of the most recent inbound frame on a connection.
///
/// Stamped with the tokio clock so paused-time tests see silence accrue.
pub(crate) struct Liveness {
    last_inbound: Mutex<Instant>,
}

impl Liveness {
    pub(crate) fn new() -> Self {
        Self {
            last_inbound: Mutex::new(Instant::now()),
        }
    }

    /// Stamp now as the last inbound activity.
    pub(crate) fn touch(&self) {
        *self.last_inbound.lock() = Instant::now();
    }

    /// How long the connection has been silent.
    pub(crate) fn idle(&self) -> Duration {
        self.last_inbound.lock().elapsed()
    }
}

/// Drive heartbeats until the connection dies or the transport goes away.
pub(crate) async fn run(
    interval: Duration,
    grace: u32,
    liveness: std::sync::Arc<Liveness>,
    outbound: mpsc::Sender<Message>,
    events: mpsc::Sender<ConnEvent>,
) {
    let grace_window = interval * grace.max(1);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let _ = ticker.tick().await;

        let idle = liveness.idle();
        if idle > grace_window {
            warn!(idle_ms = idle.as_millis() as u64, "server silent past grace window");
            let _ = events.send(ConnEvent::HeartbeatTimeout).await;
            return;
        }

        if outbound
            .send(Message::new(MsgKind::Heartbeat, Bytes::new()))
            .await
            .is_err()
        {
            // Transport already torn down.
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn sends_heartbeats_on_the_interval() {
        let liveness = Arc::new(Liveness::new());
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (ev_tx, _ev_rx) = mpsc::channel(8);

        let lv = liveness.clone();
        let task = tokio::spawn(async move {
            run(Duration::from_secs(5), 3, lv, out_tx, ev_tx).await;
        });

        for _ in 0..3 {
            // Keep the connection alive from the fake server's side.
            liveness.touch();
            tokio::time::advance(Duration::from_secs(5)).await;
            let beat = out_rx.recv().await.unwrap();
            assert_eq!(beat.kind, MsgKind::Heartbeat);
        }
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_grace_signals_timeout() {
        let liveness = Arc::new(Liveness::new());
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);

        let task = tokio::spawn(async move {
            run(Duration::from_secs(5), 2, liveness, out_tx, ev_tx).await;
        });

        // Nothing ever touches liveness. A few heartbeats may still go out
        // while the silence accrues; advancing well past the grace window
        // must surface the timeout signal.
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(5)).await;
        }
        assert_matches!(ev_rx.recv().await, Some(ConnEvent::HeartbeatTimeout));
        let _ = task.await;

        while let Ok(beat) = out_rx.try_recv() {
            assert_eq!(beat.kind, MsgKind::Heartbeat);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_quietly_when_transport_is_gone() {
        let liveness = Arc::new(Liveness::new());
        let (out_tx, out_rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);
        drop(out_rx);

        let task = tokio::spawn(async move {
            run(Duration::from_secs(5), 2, liveness, out_tx, ev_tx).await;
        });

        tokio::time::advance(Duration::from_secs(5)).await;
        task.await.unwrap();
        assert!(ev_rx.try_recv().is_err());
    }
}
