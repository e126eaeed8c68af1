//! Send and receive tasks of a device session.
//!
//! The transport is split into halves at session start. The send task owns
//! the write half: it writes queued frames and, after an idle interval, the
//! link keepalive. The receive task owns the read half: it reads frames and
//! routes each one by type to the pending-response slot or the event
//! channel.
//!
//! Either task failing cancels the shared token, which stops the other.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use dvap_core::error::{Error, Result};
use dvap_core::transport::{Transport, TransportReader, TransportWriter};
use dvap_protocol::codes::target;
use dvap_protocol::frame::{Frame, read_frame, write_frame};

use crate::commands::KEEPALIVE;
use crate::events::DeviceEvent;

/// Configuration for the IO tasks.
pub(crate) struct IoConfig {
    /// Idle time after which the send task writes a keepalive.
    pub keepalive_interval: Duration,
    /// Depth of the outbound frame queue.
    pub queue_depth: usize,
}

/// A frame queued for the send task.
pub(crate) struct Outbound {
    pub bytes: Bytes,
    /// Receives the outcome of the write.
    pub reply: oneshot::Sender<Result<()>>,
}

/// Handle to the running IO tasks. Stored inside `DvapDevice`.
pub(crate) struct DeviceIo {
    pub tx: mpsc::Sender<Outbound>,
    pub cancel: CancellationToken,
    pub send_task: JoinHandle<()>,
    pub recv_task: JoinHandle<()>,
}

impl DeviceIo {
    /// Queue a frame and wait until it has been written.
    pub async fn write(&self, bytes: Bytes) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(Outbound { bytes, reply })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }
}

/// Split the transport and spawn both tasks.
///
/// Control responses are pushed into `response_tx`, a single-slot channel
/// drained by whichever control operation is waiting.
pub(crate) fn spawn_io_tasks(
    transport: Box<dyn Transport>,
    config: IoConfig,
    event_tx: broadcast::Sender<DeviceEvent>,
    response_tx: mpsc::Sender<Frame>,
) -> DeviceIo {
    let peer = transport.peer().to_string();
    let (reader, writer) = transport.split();
    let (tx, rx) = mpsc::channel::<Outbound>(config.queue_depth);
    let cancel = CancellationToken::new();

    let send_task = tokio::spawn(send_loop(
        writer,
        rx,
        cancel.clone(),
        config.keepalive_interval,
        peer.clone(),
    ));
    let recv_task = tokio::spawn(receive_loop(
        reader,
        response_tx,
        event_tx,
        cancel.clone(),
        peer,
    ));

    DeviceIo {
        tx,
        cancel,
        send_task,
        recv_task,
    }
}

/// Write queued frames; write the keepalive whenever the queue stays idle
/// for `keepalive_interval`.
///
/// A request and a keepalive never go out in the same iteration, and every
/// request restarts the idle timer.
async fn send_loop(
    mut writer: Box<dyn TransportWriter>,
    mut rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    keepalive_interval: Duration,
    peer: String,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(peer = %peer, "send task cancelled");
                break;
            }

            out = rx.recv() => {
                let Some(Outbound { bytes, reply }) = out else {
                    debug!(peer = %peer, "all senders dropped, exiting send task");
                    break;
                };
                let result = write_frame(writer.as_mut(), &bytes).await;
                let failed = match &result {
                    Err(e) => {
                        error!(peer = %peer, error = %e, "write to device failed");
                        true
                    }
                    Ok(()) => false,
                };
                let _ = reply.send(result);
                if failed {
                    cancel.cancel();
                    break;
                }
            }

            _ = tokio::time::sleep(keepalive_interval) => {
                if let Err(e) = write_frame(writer.as_mut(), &KEEPALIVE).await {
                    error!(peer = %peer, error = %e, "keepalive write failed");
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    if let Err(e) = writer.close().await {
        warn!(peer = %peer, error = %e, "failed to close device writer");
    }
}

/// Read frames until the link fails or the session is cancelled.
async fn receive_loop(
    mut reader: Box<dyn TransportReader>,
    response_tx: mpsc::Sender<Frame>,
    event_tx: broadcast::Sender<DeviceEvent>,
    cancel: CancellationToken,
    peer: String,
) {
    loop {
        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(peer = %peer, "receive task cancelled");
                break;
            }

            r = read_frame(reader.as_mut()) => r,
        };

        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                error!(peer = %peer, error = %e, "device link lost");
                let _ = event_tx.send(DeviceEvent::Disconnected);
                cancel.cancel();
                break;
            }
        };

        match frame.frame_type() {
            target::UNSOLICITED => {
                let _ = event_tx.send(DeviceEvent::from_unsolicited(&frame));
            }
            t if target::is_response(t) => {
                if let Err(mpsc::error::TrySendError::Full(dropped)) = response_tx.try_send(frame) {
                    warn!(
                        peer = %peer,
                        item = ?dropped.control_item(),
                        "response slot occupied, dropping response"
                    );
                }
            }
            _ => {
                let _ = event_tx.send(DeviceEvent::Data(frame));
            }
        }
    }
}
