//! Output drain loop.
//!
//! Reads the worker's stdout for the whole session and forwards decoded events
//! to the collector. The event channel is unbounded: if the drain ever waited on
//! the consumer, a worker blocked on a full stdout pipe would stop reading its
//! stdin and the host's next write would hang.

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use crate::bridge::codec::EventCodec;
use crate::bridge::protocol::{Event, SessionId};

/// Spawn the task draining protocol events from `reader`.
///
/// The task ends at end-of-stream, on a read error, or when the receiver is
/// dropped. It returns the number of events it forwarded.
pub fn spawn_drain<R>(
    reader: R,
    tx: mpsc::UnboundedSender<Event>,
    session: SessionId,
) -> JoinHandle<usize>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedRead::new(reader, EventCodec::new());
        let mut forwarded = 0usize;
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(event) => {
                    tracing::debug!(%session, channel = %event.channel, id = ?event.id, "Event received");
                    if tx.send(event).is_err() {
                        tracing::debug!(%session, "Event receiver dropped, stopping drain");
                        break;
                    }
                    forwarded += 1;
                }
                Err(e) => {
                    tracing::error!(%session, error = %e, "Worker stdout read failed");
                    break;
                }
            }
        }
        tracing::debug!(%session, forwarded, "Drain loop exiting");
        forwarded
    })
}

/// Spawn the task draining the worker's stderr into the log.
///
/// Nothing reads stderr otherwise, and a worker that fills the pipe blocks.
/// Lines are decoded lossily; the task keeps the pipe open until end-of-stream.
pub fn spawn_stderr_sink<R>(reader: R, session: SessionId) -> JoinHandle<usize>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut logged = 0usize;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let trimmed = line.trim_end();
                    if !trimmed.is_empty() {
                        tracing::debug!(target: "fflogs_bridge::worker", %session, "{}", trimmed);
                        logged += 1;
                    }
                }
                Err(e) => {
                    tracing::debug!(%session, error = %e, "Worker stderr read failed");
                    break;
                }
            }
        }
        logged
    })
}
