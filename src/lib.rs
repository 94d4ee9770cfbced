//! # guestwire
//!
//! Client runtime that hosts a sandboxed guest program and links it to a
//! remote host over two channels.
//!
//! ## Architecture
//!
//! - **Control channel** (WebSocket, one binary frame per message): the
//!   host sends signals (ORIGIN, SERVICES discovery, MESSAGE to a service),
//!   the client answers with events. Inbound signals may request a POLLOUT acknowledgment,
//!   coalesced to one per idle point of the event loop.
//! - **Data channel** (HTTP request/response): carries the guest's `recv`
//!   and `send` host calls. The guest runs on its own thread and may block.
//!
//! ## Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use guestwire::runtime::guest_fn;
//! use guestwire::service::ServiceContext;
//! use guestwire::Session;
//!
//! #[tokio::main]
//! async fn main() -> guestwire::Result<()> {
//!     let session = Session::builder()
//!         .io_url("http://localhost:8080/io/")
//!         .service("log", 1, |payload: Bytes, _ctx: &ServiceContext| {
//!             println!("{}", String::from_utf8_lossy(&payload));
//!             Ok(())
//!         })
//!         .connect(guest_fn(|host| {
//!             let mut buf = [0u8; 256];
//!             let left = host.recv(&mut buf, 0)?;
//!             host.send(&buf[..buf.len() - left])?;
//!             host.exit(0)
//!         }))?;
//!
//!     session.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod multiplexer;
pub mod protocol;
pub mod runtime;
pub mod service;
pub mod transport;

mod session;
mod writer;

pub use config::SessionConfig;
pub use error::{GuestwireError, Result};
pub use multiplexer::{Multiplexer, SessionObserver};
pub use runtime::{Guest, GuestOutcome, HostCalls, Trap};
pub use session::{Session, SessionBuilder, SessionHandle};
pub use writer::{spawn_writer_task, WriterHandle, DEFAULT_CHANNEL_CAPACITY};
