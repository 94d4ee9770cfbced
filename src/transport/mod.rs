//! Transport module - the two host links a session uses.
//!
//! - Control channel: a WebSocket carrying one signal/event frame per
//!   binary message (see [`crate::control`]).
//! - Data channel: blocking request/response exchanges that carry guest
//!   `recv`/`send` payloads. [`HttpDataChannel`] is the production
//!   implementation, [`MemoryChannel`] an in-process one.
//!
//! Both are correlated by a [`SessionToken`].

mod http;
mod memory;
mod token;

pub use http::HttpDataChannel;
pub use memory::MemoryChannel;
pub use token::{SessionToken, SessionUrls};

use bytes::Bytes;

use crate::error::Result;

/// How a data-channel fetch should wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// Wait (up to the channel's timeout) for the host to have data.
    Blocking,
    /// Return whatever the host has right now, possibly nothing.
    NonBlocking,
}

/// Blocking request/response link used by guest host calls.
///
/// Calls run on the guest's own thread and may block.
pub trait DataChannel: Send + 'static {
    /// Request input bytes. An empty result means "no data".
    fn fetch(&mut self, mode: RecvMode) -> Result<Bytes>;

    /// Deliver output bytes, returning once the host acknowledged them.
    fn post(&mut self, data: &[u8]) -> Result<()>;
}

impl<D: DataChannel + ?Sized> DataChannel for Box<D> {
    fn fetch(&mut self, mode: RecvMode) -> Result<Bytes> {
        (**self).fetch(mode)
    }

    fn post(&mut self, data: &[u8]) -> Result<()> {
        (**self).post(data)
    }
}
