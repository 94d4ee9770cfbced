//! Service context handed to handlers.
//!
//! A [`ServiceContext`] lets a handler emit MESSAGE events stamped with its
//! own atom. Frames go through the [`Messenger`] back to the session event
//! loop, which forwards them to the control channel after the current signal
//! has been processed.
//!
//! # Example
//!
//! ```ignore
//! registry.register("echo", 1, |payload: Bytes, ctx: &ServiceContext| {
//!     ctx.send(&payload)
//! })?;
//! ```

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{GuestwireError, Result};
use crate::protocol::{build_event_parts, EventCode, MAX_FRAME_SIZE};

/// Build a MESSAGE event frame addressed to `atom`.
///
/// Atom 0 means "unaddressed" and is never sent.
pub fn wrap_message(atom: u32, payload: &[u8], max_frame_size: usize) -> Result<Bytes> {
    if atom == 0 {
        return Err(GuestwireError::protocol(
            "cannot send a message to service atom 0",
        ));
    }
    build_event_parts(
        EventCode::Message,
        &[&atom.to_le_bytes(), payload],
        max_frame_size,
    )
}

/// Sending half of the channel that carries handler-emitted frames to the
/// session event loop.
#[derive(Clone, Debug)]
pub struct Messenger {
    tx: mpsc::UnboundedSender<Bytes>,
    max_frame_size: usize,
}

impl Messenger {
    /// Create a messenger and the receiver the event loop drains.
    pub fn channel(max_frame_size: usize) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, max_frame_size }, rx)
    }

    /// Messenger with the protocol maximum frame size.
    pub fn default_channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        Self::channel(MAX_FRAME_SIZE)
    }

    /// Hand an encoded event frame to the event loop.
    pub fn post(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| GuestwireError::ConnectionClosed)
    }

    /// Frame size bound applied to outgoing messages.
    #[inline]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

/// Context passed to service handlers.
///
/// `ServiceContext` is `Clone`; a handler may keep a copy and emit messages
/// later, from any task.
#[derive(Clone, Debug)]
pub struct ServiceContext {
    atom: u32,
    messenger: Messenger,
}

impl ServiceContext {
    /// Create a context for the service registered under `atom`.
    pub fn new(atom: u32, messenger: Messenger) -> Self {
        Self { atom, messenger }
    }

    /// The service atom this context sends as.
    #[inline]
    pub fn atom(&self) -> u32 {
        self.atom
    }

    /// Send a MESSAGE event carrying `payload` for this service.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        let frame = wrap_message(self.atom, payload, self.messenger.max_frame_size())?;
        self.messenger.post(frame)
    }
}
