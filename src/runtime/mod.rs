//! Execution context - runs the guest and serves its host calls.
//!
//! The guest's entry point runs once on a dedicated OS thread. Every
//! `recv`/`send` it makes becomes one blocking request on the data channel,
//! so the guest may block for as long as it likes without stalling the
//! control channel's event loop.
//!
//! ```text
//! Loaded ──run()──► Running ──exit / return / fault──► Exited
//! ```

mod context;
mod host;

pub use context::{ContextState, ExecutionContext, GuestOutcome, GuestTask};
pub use host::{HostCalls, ABI_VERSION, MAX_PACKET_SIZE, RECV_FLAG_NONBLOCK};

use thiserror::Error;

use crate::error::GuestwireError;

/// Control flow out of a guest entry point.
///
/// Host calls return `Result<_, Trap>` so a guest written in Rust unwinds
/// with `?`.
#[derive(Debug, Error)]
pub enum Trap {
    /// The guest called `exit`.
    #[error("guest exited with status {0}")]
    Exit(i32),

    /// The guest hit an unrecoverable fault.
    #[error("guest fault: {0}")]
    Fault(String),

    /// A host call failed; the session is being torn down.
    #[error(transparent)]
    Host(#[from] GuestwireError),
}

/// A guest program: a single entry point bound to the host-call surface.
pub trait Guest: Send + 'static {
    /// Run the entry point. A returned value is the exit status.
    fn main(&mut self, host: &mut HostCalls) -> Result<i32, Trap>;
}

impl<F> Guest for F
where
    F: FnMut(&mut HostCalls) -> Result<i32, Trap> + Send + 'static,
{
    fn main(&mut self, host: &mut HostCalls) -> Result<i32, Trap> {
        self(host)
    }
}

/// Pin a closure's signature to the guest entry point, so it can be passed
/// where a [`Guest`] is expected without annotating the return type.
pub fn guest_fn<F>(f: F) -> F
where
    F: FnMut(&mut HostCalls) -> Result<i32, Trap> + Send + 'static,
{
    f
}
