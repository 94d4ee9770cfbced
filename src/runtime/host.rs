//! Host-call surface exposed to the guest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes};

use super::Trap;
use crate::error::GuestwireError;
use crate::protocol::MAX_FRAME_SIZE;
use crate::transport::{DataChannel, RecvMode};

/// Host ABI version reported to the guest.
pub const ABI_VERSION: u32 = 0;

/// Transmit/receive granularity reported to the guest.
pub const MAX_PACKET_SIZE: u32 = MAX_FRAME_SIZE as u32;

/// `recv` flag: return immediately instead of waiting for data.
pub const RECV_FLAG_NONBLOCK: u32 = 0x1;

/// Host calls available to a running guest.
///
/// Holds the one piece of state the surface needs: bytes fetched from the
/// data channel but not yet consumed by the guest.
pub struct HostCalls {
    channel: Box<dyn DataChannel>,
    pending: Bytes,
    debug: bool,
    exit_status: Option<i32>,
    closed: Arc<AtomicBool>,
}

impl HostCalls {
    pub(crate) fn new(channel: Box<dyn DataChannel>, debug: bool, closed: Arc<AtomicBool>) -> Self {
        Self {
            channel,
            pending: Bytes::new(),
            debug,
            exit_status: None,
            closed,
        }
    }

    /// Protocol compatibility version.
    pub fn abi_version(&self) -> u32 {
        ABI_VERSION
    }

    /// Maximum packet size the guest should use.
    pub fn max_packet_size(&self) -> u32 {
        MAX_PACKET_SIZE
    }

    /// Resolve an optional host function. Nothing is resolvable; always 0.
    pub fn resolve_function_pointer(&self, id: u32) -> u64 {
        tracing::trace!(id, "unresolved host function");
        0
    }

    /// Terminate the guest with `status`.
    ///
    /// Always returns `Err(Trap::Exit)`; propagate it with `?` to unwind out
    /// of the entry point. The first status wins: calling `exit` again
    /// reports the first status.
    pub fn exit<T>(&mut self, status: i32) -> Result<T, Trap> {
        match self.exit_status {
            Some(first) => {
                tracing::warn!(first, status, "guest called exit more than once");
                Err(Trap::Exit(first))
            }
            None => {
                self.exit_status = Some(status);
                Err(Trap::Exit(status))
            }
        }
    }

    /// Receive bytes into `dest`, returning how many bytes of it were left
    /// unfilled.
    ///
    /// Buffered bytes are served first without touching the data channel.
    /// With an empty buffer, a non-blocking call makes one request and
    /// returns `dest.len()` if it yields nothing; a blocking call waits
    /// until bytes arrive.
    pub fn recv(&mut self, dest: &mut [u8], flags: u32) -> Result<usize, Trap> {
        let size = dest.len();
        if size == 0 {
            return Ok(0);
        }

        if self.pending.is_empty() {
            self.check_open()?;

            if flags & RECV_FLAG_NONBLOCK != 0 {
                let data = self.channel.fetch(RecvMode::NonBlocking)?;
                if data.is_empty() {
                    return Ok(size);
                }
                self.pending = data;
            } else {
                while self.pending.is_empty() {
                    self.pending = self.channel.fetch(RecvMode::Blocking)?;
                    self.check_open()?;
                }
            }
        }

        let n = size.min(self.pending.len());
        dest[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(size - n)
    }

    /// Send all of `src`, returning once the host acknowledged it.
    pub fn send(&mut self, src: &[u8]) -> Result<(), Trap> {
        self.check_open()?;
        self.channel.post(src)?;
        Ok(())
    }

    /// Emit guest diagnostics text when debugging is enabled.
    pub fn debug_write(&self, data: &[u8]) {
        if self.debug {
            let text = String::from_utf8_lossy(data);
            tracing::info!(target: "guestwire::guest", "debug: {}", text);
        }
    }

    /// Bytes fetched but not yet consumed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    fn check_open(&self) -> Result<(), Trap> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Trap::Host(GuestwireError::ConnectionClosed));
        }
        Ok(())
    }
}
