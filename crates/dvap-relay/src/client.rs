//! Per-client read and write tasks.
//!
//! Each accepted connection is split into halves. The read task turns the
//! byte stream into frames for the dispatcher; the write task drains the
//! client's outbound queue.
//!
//! When the read side ends, the read task reports the disconnect and the
//! dispatcher drops the client's queue; the write task then drains what is
//! left and closes. The shared cancellation token is reserved for a forced
//! disconnect (queue overflow) and relay shutdown, which stop both tasks
//! at once.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dvap_core::error::Error;
use dvap_core::transport::{TransportReader, TransportWriter};
use dvap_protocol::frame::{read_frame_with_limit, write_frame};

use crate::dispatcher::Command;

/// Forward every frame from `reader` to the dispatcher.
///
/// Ends on any read error (clean EOF included) or when `cancel` fires, then
/// sends [`Command::Disconnect`].
pub(crate) async fn read_loop(
    id: String,
    mut reader: Box<dyn TransportReader>,
    max_frame_len: usize,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(peer = %id, "read task cancelled");
                break;
            }

            r = read_frame_with_limit(reader.as_mut(), max_frame_len) => r,
        };

        match result {
            Ok(frame) => {
                let data = Command::Data {
                    id: id.clone(),
                    frame,
                };
                if commands.send(data).await.is_err() {
                    debug!(peer = %id, "dispatcher gone, stopping read task");
                    break;
                }
            }
            Err(Error::Disconnected) => {
                info!(peer = %id, "client closed connection");
                break;
            }
            Err(e) => {
                warn!(peer = %id, error = %e, "client read failed, disconnecting");
                break;
            }
        }
    }

    let _ = commands.send(Command::Disconnect { id }).await;
}

/// Write queued frames to the client until the queue closes or `cancel`
/// fires.
///
/// A failed write drops that one frame; the task keeps draining.
pub(crate) async fn write_loop(
    id: String,
    mut writer: Box<dyn TransportWriter>,
    mut queue: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        let bytes = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            next = queue.recv() => match next {
                Some(bytes) => bytes,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            r = write_frame(writer.as_mut(), &bytes) => r,
        };
        if let Err(e) = result {
            warn!(peer = %id, error = %e, bytes = bytes.len(), "write to client failed, frame dropped");
        }
    }

    if let Err(e) = writer.close().await {
        debug!(peer = %id, error = %e, "closing client writer failed");
    }
    debug!(peer = %id, "write task exited");
}
