//! The byte path of one established connection.
//!
//! After logon the framed stream splits into two tasks: a writer draining
//! the outbound queue (encode, seal, frame) and a reader feeding inbound
//! frames (unframe, open, parse) straight into the job table. All writes
//! funnel through the one queue, so the writer task is the single writer
//! on the socket.
//!
//! Neither task recovers from anything: the first wire, cipher, or protocol
//! error is reported upward as a [`ConnEvent`] and the task stops. The
//! state machine owns the teardown.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use tether_core::{FrameCodec, Message, ProtocolError};
use tether_crypto::ChannelCipher;

use crate::error::TransportError;
use crate::heartbeat::Liveness;
use crate::jobs::JobTable;

/// Outbound messages buffered before senders are backpressured.
const OUTBOUND_BUFFER: usize = 256;

/// What a connection task reports to the state machine.
#[derive(Debug)]
pub(crate) enum ConnEvent {
    /// The byte path failed; the connection is dead.
    Closed(TransportError),
    /// The server went silent past the grace window.
    HeartbeatTimeout,
}

/// Handle to the two I/O tasks of one connection.
pub(crate) struct Transport {
    outbound_tx: mpsc::Sender<Message>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Transport {
    /// Split `framed` and start the writer and reader tasks.
    pub(crate) fn spawn(
        framed: Framed<TcpStream, FrameCodec>,
        cipher: ChannelCipher,
        jobs: Arc<JobTable>,
        liveness: Arc<Liveness>,
        events: mpsc::Sender<ConnEvent>,
    ) -> Self {
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
        let (mut sink, mut stream) = framed.split();

        let write_cipher = cipher.clone();
        let write_events = events.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                trace!(kind = %msg.kind, source_job = %msg.source_job, "sending message");
                let sealed = match write_cipher.seal(&msg.encode()) {
                    Ok(sealed) => sealed,
                    Err(e) => {
                        let _ = write_events
                            .send(ConnEvent::Closed(ProtocolError::from(e).into()))
                            .await;
                        return;
                    }
                };
                if let Err(e) = sink.send(sealed).await {
                    let _ = write_events.send(ConnEvent::Closed(e.into())).await;
                    return;
                }
            }
            // Outbound queue closed: orderly shutdown, nothing to report.
            debug!("writer task stopping");
        });

        let reader = tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(frame)) => {
                        liveness.touch();
                        let routed = cipher
                            .open(&frame)
                            .map_err(ProtocolError::from)
                            .and_then(Message::parse)
                            .and_then(|msg| jobs.deliver(msg));
                        if let Err(e) = routed {
                            let _ = events.send(ConnEvent::Closed(e.into())).await;
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = events.send(ConnEvent::Closed(e.into())).await;
                        return;
                    }
                    None => {
                        let _ = events.send(ConnEvent::Closed(TransportError::Closed)).await;
                        return;
                    }
                }
            }
        });

        Self {
            outbound_tx,
            writer,
            reader,
        }
    }

    /// A sender onto the outbound queue.
    pub(crate) fn sender(&self) -> mpsc::Sender<Message> {
        self.outbound_tx.clone()
    }

    /// Stop both tasks. The socket closes when the halves drop.
    pub(crate) fn shutdown(&self) {
        self.writer.abort();
        self.reader.abort();
    }
}
