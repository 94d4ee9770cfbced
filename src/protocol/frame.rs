//! Frame struct and frame builders.
//!
//! A frame is one complete header + payload unit on the control channel.
//! Payloads are held as `bytes::Bytes` so handlers can keep slices of an
//! inbound buffer without copying.
//!
//! # Example
//!
//! ```
//! use guestwire::protocol::{build_event, EventCode, Frame, MAX_FRAME_SIZE};
//!
//! let bytes = build_event(EventCode::Origin, b"hello", MAX_FRAME_SIZE).unwrap();
//! let frame = Frame::parse(bytes, MAX_FRAME_SIZE).unwrap();
//!
//! assert_eq!(frame.code(), 1);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{EventCode, Header, HEADER_SIZE, MESSAGE_ATOM_SIZE};
use crate::error::{GuestwireError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Parse one whole received frame.
    ///
    /// The declared length must be within bounds and equal the number of
    /// bytes actually received; nothing past the header is looked at
    /// otherwise.
    pub fn parse(mut buf: Bytes, max_frame_size: usize) -> Result<Self> {
        let header = Header::decode(&buf).ok_or_else(|| {
            GuestwireError::protocol(format!("frame too short: {} bytes", buf.len()))
        })?;

        header.validate(max_frame_size)?;

        if header.length as usize != buf.len() {
            return Err(GuestwireError::protocol(format!(
                "inconsistent frame size: declared {}, received {}",
                header.length,
                buf.len()
            )));
        }

        let payload = buf.split_off(HEADER_SIZE);
        Ok(Self { header, payload })
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the frame code.
    #[inline]
    pub fn code(&self) -> u16 {
        self.header.code
    }

    /// Check if the POLLOUT flag is set.
    #[inline]
    pub fn is_pollout(&self) -> bool {
        self.header.is_pollout()
    }
}

/// Build an event frame as one contiguous buffer.
///
/// Fails if the resulting frame would exceed `max_frame_size`.
pub fn build_event(code: EventCode, payload: &[u8], max_frame_size: usize) -> Result<Bytes> {
    build_event_parts(code, &[payload], max_frame_size)
}

/// Build an event frame whose payload is the concatenation of `parts`.
pub fn build_event_parts(code: EventCode, parts: &[&[u8]], max_frame_size: usize) -> Result<Bytes> {
    let payload_len: usize = parts.iter().map(|p| p.len()).sum();
    let total = HEADER_SIZE + payload_len;

    if total > max_frame_size {
        return Err(GuestwireError::protocol(format!(
            "frame size {} exceeds maximum {}",
            total, max_frame_size
        )));
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_slice(&Header::event(code, payload_len).encode());
    for part in parts {
        buf.put_slice(part);
    }
    Ok(buf.freeze())
}

/// The flow-control acknowledgment: a bare POLLOUT event header.
pub fn pollout_event() -> Bytes {
    Bytes::copy_from_slice(&Header::event(EventCode::Pollout, 0).encode())
}

/// Split a MESSAGE payload into its service atom and the service bytes.
pub fn split_message(mut payload: Bytes) -> Result<(u32, Bytes)> {
    if payload.len() < MESSAGE_ATOM_SIZE {
        return Err(GuestwireError::protocol("message frame is too short"));
    }
    let body = payload.split_off(MESSAGE_ATOM_SIZE);
    let atom = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok((atom, body))
}
