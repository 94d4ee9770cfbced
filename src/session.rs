//! Session builder and event loop.
//!
//! The [`SessionBuilder`] collects services, an observer and configuration.
//! Starting it produces a [`Session`] that owns:
//! 1. A control task: opens the WebSocket, spawns the writer task and
//!    forwards each inbound binary message as one signal frame
//! 2. The guest, running on its own OS thread
//! 3. The event loop, which feeds signals to the [`Multiplexer`] and flushes
//!    the POLLOUT acknowledgment at its idle point
//!
//! # Example
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
//!         .service("echo", 1, |payload: Bytes, ctx: &ServiceContext| ctx.send(&payload))
//!         .connect(guest_fn(|host| {
//!             host.send(b"hello")?;
//!             host.exit(0)
//!         }))?;
//!
//!     let outcome = session.wait().await?;
//!     println!("guest finished: {:?}", outcome);
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::config::SessionConfig;
use crate::control::{self, ControlTransport};
use crate::error::{GuestwireError, Result};
use crate::multiplexer::{Multiplexer, SessionObserver};
use crate::protocol::HEADER_SIZE;
use crate::runtime::{ExecutionContext, Guest, GuestOutcome, GuestTask};
use crate::service::{Messenger, ServiceHandler, ServiceRegistry};
use crate::transport::{DataChannel, HttpDataChannel, SessionToken, SessionUrls};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Inbound frames buffered between the control task and the event loop.
const CONTROL_EVENT_CAPACITY: usize = 256;

/// Builder for configuring and starting a session.
pub struct SessionBuilder {
    registry: ServiceRegistry,
    observer: Option<Box<dyn SessionObserver>>,
    config: SessionConfig,
    /// First registration failure, reported when the session starts.
    error: Option<GuestwireError>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            registry: ServiceRegistry::new(),
            observer: None,
            config: SessionConfig::default(),
            error: None,
        }
    }

    /// Register a service the host can discover and message.
    ///
    /// Registration errors (too many services, atom conflicts) surface when
    /// the session starts.
    pub fn service<H: ServiceHandler>(mut self, name: &str, version: u32, handler: H) -> Self {
        if let Err(e) = self.registry.register(name, version, handler) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Register a service at a fixed atom instead of the next free one.
    pub fn service_at<H: ServiceHandler>(
        mut self,
        atom: u32,
        name: &str,
        version: u32,
        handler: H,
    ) -> Self {
        if let Err(e) = self.registry.register_at(atom, name, version, handler) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Install the observer for ORIGIN signals and the guest outcome.
    pub fn observer<O: SessionObserver>(mut self, observer: O) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable guest diagnostics output.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Set the host I/O base URL.
    pub fn io_url(mut self, url: impl Into<String>) -> Self {
        self.config.io_url = url.into();
        self
    }

    /// Bound each blocking data-channel request.
    ///
    /// Default: 50 seconds
    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.config.recv_timeout_ms = timeout.as_millis().max(1) as u64;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Connect to the host and run `guest`.
    ///
    /// Returns once the session is started; the control WebSocket is opened
    /// in the background at the session's `run` URL, and ORIGIN events sent
    /// before it opens are queued.
    pub fn connect<G: Guest>(self, guest: G) -> Result<Session> {
        self.config.validate()?;

        let token = SessionToken::generate();
        let urls = SessionUrls::new(&self.config.io_url, &token)?;
        let data = HttpDataChannel::new(&urls, self.config.recv_timeout());

        tracing::debug!(run = %urls.run, "starting session");
        let run = urls.run;
        let connect = async move { control::connect(&run).await };

        let mut session = self.launch(connect, data, guest)?;
        session.token = Some(token);
        Ok(session)
    }

    /// Run `guest` over an established control socket and data channel.
    pub fn start_with<S, D, G>(self, socket: S, data: D, guest: G) -> Result<Session>
    where
        S: ControlTransport,
        D: DataChannel,
        G: Guest,
    {
        self.start_with_connector(std::future::ready(Ok(socket)), data, guest)
    }

    /// Run `guest` over a control socket that `connect` will produce.
    ///
    /// Frames sent before `connect` resolves wait in the pending-send queue.
    pub fn start_with_connector<C, S, D, G>(self, connect: C, data: D, guest: G) -> Result<Session>
    where
        C: Future<Output = Result<S>> + Send + 'static,
        S: ControlTransport,
        D: DataChannel,
        G: Guest,
    {
        self.config.validate()?;
        self.launch(connect, data, guest)
    }

    fn launch<C, S, D, G>(mut self, connect: C, data: D, guest: G) -> Result<Session>
    where
        C: Future<Output = Result<S>> + Send + 'static,
        S: ControlTransport,
        D: DataChannel,
        G: Guest,
    {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let config = self.config;
        let registry = self.registry.with_max_frame_size(config.max_frame_size);
        let (messenger, messenger_rx) = Messenger::channel(config.max_frame_size);
        let mut mux = Multiplexer::new(registry, messenger);
        if let Some(observer) = self.observer.take() {
            mux.set_observer(observer);
        }

        let guest = ExecutionContext::load(guest, data, config.debug).spawn()?;

        let (events_tx, control_rx) = mpsc::channel(CONTROL_EVENT_CAPACITY);
        let control_task = tokio::spawn(control_task(connect, config.channel_capacity, events_tx));

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let event_loop = EventLoop {
            mux,
            control_rx,
            messenger_rx,
            command_rx,
            guest,
            control_task,
        };
        let task = tokio::spawn(event_loop.run());

        Ok(Session {
            handle: SessionHandle {
                tx: command_tx,
                max_frame_size: config.max_frame_size,
            },
            task,
            token: None,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running session.
pub struct Session {
    handle: SessionHandle,
    task: JoinHandle<Result<GuestOutcome>>,
    token: Option<SessionToken>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Handle for emitting events into the session.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Token correlating this session's channels, when it was connected
    /// with [`SessionBuilder::connect`].
    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    /// Wait for the session to end.
    ///
    /// Resolves with the guest's outcome, or with the first fatal error
    /// (protocol violation, transport failure, timeout).
    pub async fn wait(self) -> Result<GuestOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(GuestwireError::Transport(format!(
                "session task failed: {}",
                e
            ))),
        }
    }

    /// Tear the session down without waiting for the guest.
    pub fn abort(&self) {
        self.task.abort();
    }
}

enum Command {
    Origin(Bytes),
}

/// Cloneable handle for emitting events into a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
    max_frame_size: usize,
}

impl SessionHandle {
    /// Emit an ORIGIN event. Queued until the control channel opens.
    ///
    /// # Errors
    ///
    /// Fails if the payload does not fit in one frame, or the session ended.
    pub fn send_origin(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if payload.len() > self.max_frame_size - HEADER_SIZE {
            return Err(GuestwireError::protocol(format!(
                "origin payload of {} bytes exceeds frame capacity {}",
                payload.len(),
                self.max_frame_size - HEADER_SIZE
            )));
        }
        self.tx
            .send(Command::Origin(payload))
            .map_err(|_| GuestwireError::ConnectionClosed)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Origin(p) => write!(f, "Origin({} bytes)", p.len()),
        }
    }
}

enum ControlEvent {
    Opened(WriterHandle),
    Signal(Bytes),
    Closed(Result<()>),
}

async fn control_task<C, S>(connect: C, channel_capacity: usize, events: mpsc::Sender<ControlEvent>)
where
    C: Future<Output = Result<S>>,
    S: ControlTransport,
{
    let result = run_control(connect, channel_capacity, &events).await;
    let _ = events.send(ControlEvent::Closed(result)).await;
}

async fn run_control<C, S>(
    connect: C,
    channel_capacity: usize,
    events: &mpsc::Sender<ControlEvent>,
) -> Result<()>
where
    C: Future<Output = Result<S>>,
    S: ControlTransport,
{
    let socket = connect.await?;
    let (sink, mut stream) = StreamExt::split::<Message>(socket);

    let (handle, writer_task) = spawn_writer_task(sink, channel_capacity);
    if events.send(ControlEvent::Opened(handle)).await.is_err() {
        return Ok(());
    }

    tokio::select! {
        result = read_signals(&mut stream, events) => result,
        joined = writer_task => match joined {
            Ok(result) => result,
            Err(e) => Err(GuestwireError::Transport(format!("writer task failed: {}", e))),
        },
    }
}

/// Forward each inbound binary message, as one whole signal frame, in order.
///
/// Returns `Ok` when the host closes the channel.
async fn read_signals<R>(stream: &mut R, events: &mpsc::Sender<ControlEvent>) -> Result<()>
where
    R: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message? {
            Message::Binary(frame) => {
                if events.send(ControlEvent::Signal(frame)).await.is_err() {
                    return Ok(());
                }
            }
            Message::Text(_) => {
                return Err(GuestwireError::protocol(
                    "text message on the control channel",
                ))
            }
            Message::Close(frame) => {
                tracing::debug!(?frame, "control channel closed by host");
                return Ok(());
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
    Ok(())
}

struct EventLoop {
    mux: Multiplexer,
    control_rx: mpsc::Receiver<ControlEvent>,
    messenger_rx: mpsc::UnboundedReceiver<Bytes>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    guest: GuestTask,
    control_task: JoinHandle<()>,
}

impl EventLoop {
    async fn run(mut self) -> Result<GuestOutcome> {
        let result = self.drive().await;

        match &result {
            Ok(outcome) => {
                tracing::debug!(?outcome, "session finished");
                if let Some(mut observer) = self.mux.take_observer() {
                    observer.on_exit(outcome);
                }
            }
            Err(e) => tracing::error!(error = %e, "session torn down"),
        }
        result
    }

    async fn drive(&mut self) -> Result<GuestOutcome> {
        loop {
            tokio::select! {
                biased;

                event = self.control_rx.recv() => match event {
                    Some(ControlEvent::Opened(writer)) => self.mux.open(writer)?,
                    Some(ControlEvent::Signal(frame)) => self.mux.on_signal(frame)?,
                    Some(ControlEvent::Closed(Err(e))) => return Err(e),
                    Some(ControlEvent::Closed(Ok(()))) | None => {
                        return Err(GuestwireError::ConnectionClosed)
                    }
                },

                Some(frame) = self.messenger_rx.recv() => self.mux.send(frame)?,

                Some(command) = self.command_rx.recv() => match command {
                    Command::Origin(payload) => self.mux.send_origin(&payload)?,
                },

                outcome = self.guest.wait() => return outcome,

                // Only reached when nothing else is ready.
                _ = std::future::ready(()), if self.mux.pollout_scheduled() => {
                    self.mux.tick()?;
                }
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.guest.close();
        self.control_task.abort();
    }
}
