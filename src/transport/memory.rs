use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;

use super::{DataChannel, RecvMode};
use crate::error::{GuestwireError, Result};

#[derive(Default)]
struct State {
    inbound: VecDeque<Bytes>,
    sent: Vec<Vec<u8>>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

/// In-process data channel.
///
/// Clones share one queue: keep a clone on the host side to feed input with
/// [`push_inbound`](Self::push_inbound) and inspect output with
/// [`sent`](Self::sent).
#[derive(Clone)]
pub struct MemoryChannel {
    shared: Arc<Shared>,
    timeout: Duration,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::with_timeout(super::http::DEFAULT_RECV_TIMEOUT)
    }

    /// A blocking fetch that waits longer than `timeout` fails with
    /// [`GuestwireError::Timeout`].
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                ready: Condvar::new(),
            }),
            timeout,
        }
    }

    /// Queue bytes for the guest. Each push is served by one fetch.
    pub fn push_inbound(&self, data: impl Into<Bytes>) {
        let mut state = self.lock();
        state.inbound.push_back(data.into());
        self.shared.ready.notify_all();
    }

    /// Everything the guest sent so far, one entry per `send`.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Fail every later request, waking blocked ones.
    pub fn close(&self) {
        self.lock().closed = true;
        self.shared.ready.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a guest panicked mid-call; the queue
        // itself is still consistent.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DataChannel for MemoryChannel {
    fn fetch(&mut self, mode: RecvMode) -> Result<Bytes> {
        let mut state = self.lock();
        if mode == RecvMode::Blocking {
            let (guard, wait) = self
                .shared
                .ready
                .wait_timeout_while(state, self.timeout, |s| s.inbound.is_empty() && !s.closed)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
            if wait.timed_out() && state.inbound.is_empty() {
                return Err(GuestwireError::Timeout);
            }
        }

        if state.closed {
            return Err(GuestwireError::ConnectionClosed);
        }
        Ok(state.inbound.pop_front().unwrap_or_default())
    }

    fn post(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(GuestwireError::ConnectionClosed);
        }
        state.sent.push(data.to_vec());
        Ok(())
    }
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryChannel")
            .field("inbound", &state.inbound.len())
            .field("sent", &state.sent.len())
            .field("closed", &state.closed)
            .finish()
    }
}
