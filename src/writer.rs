//! Dedicated writer task for the control channel.
//!
//! Event frames are handed to a writer task through an mpsc channel instead
//! of being written from inside signal handling. The event loop never
//! touches the socket directly, so a frame emitted while a signal is being
//! processed cannot re-enter the transport.
//!
//! # Architecture
//!
//! ```text
//! Multiplexer ─┐
//! Services    ─┼─► mpsc::Sender<Bytes> ─► Writer Task ─► WebSocket sink
//! POLLOUT tick ┘                          (one binary message per frame)
//! ```

use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::{GuestwireError, Result};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames fed to the sink before a flush.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for sending encoded frames to the writer task.
///
/// Cheaply cloneable.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue a frame without waiting.
    ///
    /// A full channel means the host stopped draining the control channel;
    /// that is reported as a transport failure.
    pub fn try_send(&self, frame: Bytes) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                GuestwireError::Transport("control channel writer queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => GuestwireError::ConnectionClosed,
        })
    }

    /// Handle backed by a plain channel instead of a writer task.
    #[cfg(test)]
    pub(crate) fn test_pair(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// Each frame becomes one binary message on `sink`. The returned
/// `JoinHandle` resolves when every handle is dropped (clean shutdown, the
/// sink is closed) or a write fails.
pub fn spawn_writer_task<S>(sink: S, channel_capacity: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, sink));
    (WriterHandle { tx }, task)
}

async fn writer_loop<S>(mut rx: mpsc::Receiver<Bytes>, mut sink: S) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                sink.close().await.ok();
                return Ok(());
            }
        };

        sink.feed(Message::Binary(first)).await?;
        let mut frames = 1;

        while frames < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => {
                    sink.feed(Message::Binary(frame)).await?;
                    frames += 1;
                }
                Err(_) => break,
            }
        }

        sink.flush().await?;
        tracing::trace!(frames, "control frames written");
    }
}
