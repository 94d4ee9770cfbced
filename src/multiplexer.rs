//! Protocol multiplexer for the control channel.
//!
//! The [`Multiplexer`] owns everything the control channel needs besides
//! the socket itself:
//! - decoding and validating inbound signal frames
//! - answering SERVICES discovery from the [`ServiceRegistry`]
//! - routing MESSAGE signals to service handlers
//! - the POLLOUT acknowledgment state
//! - the pending-send queue used until the channel opens
//!
//! It performs no I/O. Outgoing frames are queued or handed to the writer
//! task, and the session event loop calls [`Multiplexer::tick`] at its idle
//! points to flush a scheduled POLLOUT acknowledgment.

use bytes::Bytes;

use crate::error::{GuestwireError, Result};
use crate::protocol::{
    build_event, build_services_response, parse_services_request, pollout_event, split_message,
    EventCode, Frame, ServiceInfo, SignalCode, MAX_FRAME_SIZE,
};
use crate::runtime::GuestOutcome;
use crate::service::{Messenger, ServiceRegistry};
use crate::writer::WriterHandle;

/// Receives session events.
///
/// Every method has a no-op default; implement the ones you care about.
pub trait SessionObserver: Send + 'static {
    /// An ORIGIN signal arrived; `payload` excludes the frame header.
    fn on_origin(&mut self, payload: Bytes) {
        let _ = payload;
    }

    /// The guest finished. Called at most once per session.
    fn on_exit(&mut self, outcome: &GuestOutcome) {
        let _ = outcome;
    }
}

/// Where outgoing frames go.
enum Outbox {
    /// Channel not open yet: frames wait here in insertion order.
    Connecting(Vec<Bytes>),
    /// Channel open: frames go straight to the writer task.
    Open(WriterHandle),
}

/// Control-channel protocol state for one session.
pub struct Multiplexer {
    registry: ServiceRegistry,
    messenger: Messenger,
    outbox: Outbox,
    pollout_scheduled: bool,
    observer: Option<Box<dyn SessionObserver>>,
    max_frame_size: usize,
}

impl Multiplexer {
    /// Create a multiplexer whose handlers emit through `messenger`.
    pub fn new(registry: ServiceRegistry, messenger: Messenger) -> Self {
        let max_frame_size = messenger.max_frame_size().min(MAX_FRAME_SIZE);
        Self {
            registry,
            messenger,
            outbox: Outbox::Connecting(Vec::new()),
            pollout_scheduled: false,
            observer: None,
            max_frame_size,
        }
    }

    /// Install the observer notified of ORIGIN signals.
    pub fn set_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observer = Some(observer);
    }

    /// Remove and return the observer.
    pub fn take_observer(&mut self) -> Option<Box<dyn SessionObserver>> {
        self.observer.take()
    }

    /// The service registry consulted for discovery and dispatch.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Whether the control channel is open.
    pub fn is_open(&self) -> bool {
        matches!(self.outbox, Outbox::Open(_))
    }

    /// Number of frames waiting for the channel to open.
    pub fn queued_len(&self) -> usize {
        match &self.outbox {
            Outbox::Connecting(queue) => queue.len(),
            Outbox::Open(_) => 0,
        }
    }

    /// Whether a POLLOUT acknowledgment is waiting for the next idle point.
    pub fn pollout_scheduled(&self) -> bool {
        self.pollout_scheduled
    }

    /// Mark the control channel open and flush the pending-send queue.
    ///
    /// Queued frames are handed to `writer` in enqueue order before anything
    /// sent afterwards. The queue is discarded; opening twice is an error.
    pub fn open(&mut self, writer: WriterHandle) -> Result<()> {
        let queued = match std::mem::replace(&mut self.outbox, Outbox::Open(writer.clone())) {
            Outbox::Connecting(queue) => queue,
            Outbox::Open(previous) => {
                self.outbox = Outbox::Open(previous);
                return Err(GuestwireError::protocol("control channel opened twice"));
            }
        };

        tracing::debug!(frames = queued.len(), "control channel open, flushing queue");
        for frame in queued {
            writer.try_send(frame)?;
        }
        Ok(())
    }

    /// Send an encoded event frame, queueing it while the channel is not open.
    pub fn send(&mut self, frame: Bytes) -> Result<()> {
        match &mut self.outbox {
            Outbox::Connecting(queue) => {
                queue.push(frame);
                Ok(())
            }
            Outbox::Open(writer) => writer.try_send(frame),
        }
    }

    /// Send an ORIGIN event carrying `payload`.
    pub fn send_origin(&mut self, payload: &[u8]) -> Result<()> {
        let frame = build_event(EventCode::Origin, payload, self.max_frame_size)?;
        self.send(frame)
    }

    /// Process one whole inbound signal frame.
    ///
    /// Any error is a protocol violation and fatal to the session.
    pub fn on_signal(&mut self, buf: Bytes) -> Result<()> {
        let frame = Frame::parse(buf, self.max_frame_size)?;

        if frame.is_pollout() && !self.pollout_scheduled {
            self.pollout_scheduled = true;
            tracing::trace!("POLLOUT acknowledgment scheduled");
        }

        let code = SignalCode::from_u16(frame.code()).ok_or_else(|| {
            GuestwireError::protocol(format!("unrecognized signal code {}", frame.code()))
        })?;

        match code {
            SignalCode::None => Ok(()),
            SignalCode::Origin => {
                if let Some(observer) = self.observer.as_mut() {
                    observer.on_origin(frame.payload);
                }
                Ok(())
            }
            SignalCode::Services => self.handle_services(&frame.payload),
            SignalCode::Message => self.handle_message(frame.payload),
        }
    }

    /// Idle point of the event loop: send the scheduled acknowledgment.
    ///
    /// Returns whether a POLLOUT event was sent.
    pub fn tick(&mut self) -> Result<bool> {
        if !self.pollout_scheduled {
            return Ok(false);
        }
        self.send(pollout_event())?;
        self.pollout_scheduled = false;
        tracing::trace!("POLLOUT acknowledgment sent");
        Ok(true)
    }

    fn handle_services(&mut self, payload: &[u8]) -> Result<()> {
        let names = parse_services_request(payload)?;

        let infos: Vec<ServiceInfo> = names
            .iter()
            .map(|name| {
                let info = self.registry.resolve(name);
                if !info.is_available() {
                    tracing::warn!(service = %name, "discovery of unregistered service");
                }
                info
            })
            .collect();

        tracing::debug!(count = infos.len(), "answering service discovery");
        let frame = build_services_response(&infos, self.max_frame_size)?;
        self.send(frame)
    }

    fn handle_message(&mut self, payload: Bytes) -> Result<()> {
        let (atom, body) = split_message(payload)?;

        if atom == 0 || !self.registry.dispatch(atom, body, &self.messenger)? {
            return Err(GuestwireError::protocol(format!(
                "invalid service identifier {}",
                atom
            )));
        }
        Ok(())
    }
}
