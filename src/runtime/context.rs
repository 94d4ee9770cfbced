use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::oneshot;

use super::host::HostCalls;
use super::{Guest, Trap};
use crate::error::{GuestwireError, Result};
use crate::transport::DataChannel;

/// Lifecycle of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Loaded,
    Running,
    Exited,
}

/// How a guest finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestOutcome {
    /// Exit status, from `exit` or from returning out of the entry point.
    Status(i32),
    /// The guest trapped or panicked.
    Fault(String),
}

impl GuestOutcome {
    /// Exit status if the guest exited normally.
    pub fn status(&self) -> Option<i32> {
        match self {
            GuestOutcome::Status(s) => Some(*s),
            GuestOutcome::Fault(_) => None,
        }
    }
}

/// A loaded guest bound to its host-call surface.
pub struct ExecutionContext {
    guest: Box<dyn Guest>,
    host: HostCalls,
    state: ContextState,
    closed: Arc<AtomicBool>,
}

impl ExecutionContext {
    /// Load `guest` with host calls served over `channel`.
    pub fn load<G, D>(guest: G, channel: D, debug: bool) -> Self
    where
        G: Guest,
        D: DataChannel,
    {
        let closed = Arc::new(AtomicBool::new(false));
        Self {
            guest: Box::new(guest),
            host: HostCalls::new(Box::new(channel), debug, closed.clone()),
            state: ContextState::Loaded,
            closed,
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Flag that makes every later host call fail with `ConnectionClosed`.
    pub fn close_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Run the entry point to completion on the current thread.
    ///
    /// # Errors
    ///
    /// Returns the transport error when a host call failed before the guest
    /// exited, and a config error if the context already ran.
    pub fn run(&mut self) -> Result<GuestOutcome> {
        if self.state != ContextState::Loaded {
            return Err(GuestwireError::Config(
                "execution context has already been started".to_string(),
            ));
        }
        self.state = ContextState::Running;
        tracing::debug!("guest entry point starting");

        let guest = &mut self.guest;
        let host = &mut self.host;
        let result = catch_unwind(AssertUnwindSafe(|| guest.main(host)));
        self.state = ContextState::Exited;

        // First exit wins over whatever happened afterwards.
        if let Some(status) = self.host.exit_status() {
            tracing::debug!(status, "guest exited");
            return Ok(GuestOutcome::Status(status));
        }

        let outcome = match result {
            Ok(Ok(status)) | Ok(Err(Trap::Exit(status))) => GuestOutcome::Status(status),
            Ok(Err(Trap::Fault(message))) => GuestOutcome::Fault(message),
            Ok(Err(Trap::Host(err))) => {
                tracing::debug!(error = %err, "guest stopped by host call failure");
                return Err(err);
            }
            Err(panic) => GuestOutcome::Fault(panic_message(panic.as_ref())),
        };
        tracing::debug!(?outcome, "guest finished");
        Ok(outcome)
    }

    /// Run the guest on a dedicated OS thread.
    pub fn spawn(mut self) -> Result<GuestTask> {
        let (tx, rx) = oneshot::channel();
        let closed = self.closed.clone();
        thread::Builder::new()
            .name("guestwire-guest".to_string())
            .spawn(move || {
                let result = self.run();
                let _ = tx.send(result);
            })?;
        Ok(GuestTask {
            rx: Some(rx),
            closed,
        })
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("state", &self.state)
            .finish()
    }
}

/// A guest running on its own thread.
///
/// Resolves exactly once with the guest's result.
#[derive(Debug)]
pub struct GuestTask {
    rx: Option<oneshot::Receiver<Result<GuestOutcome>>>,
    closed: Arc<AtomicBool>,
}

impl GuestTask {
    /// Wait for the guest to finish. Cancel safe.
    ///
    /// Once the result has been taken, later calls fail.
    pub async fn wait(&mut self) -> Result<GuestOutcome> {
        let rx = self.rx.as_mut().ok_or_else(|| {
            GuestwireError::Config("guest result has already been taken".to_string())
        })?;
        let received = rx.await;
        self.rx = None;
        match received {
            Ok(result) => result,
            Err(_) => Err(GuestwireError::Transport(
                "guest thread ended without a result".to_string(),
            )),
        }
    }

    /// Make the guest's next host call fail. A guest blocked inside a call
    /// notices when that call returns.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "guest panicked".to_string()
    }
}
