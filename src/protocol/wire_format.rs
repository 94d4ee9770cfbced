//! Wire format encoding and decoding.
//!
//! Implements the 8-byte frame header shared by signals (host to client)
//! and events (client to host):
//! ```text
//! ┌──────────┬──────────┬──────────┐
//! │ Length   │ Code     │ Flags    │
//! │ 4 bytes  │ 2 bytes  │ 2 bytes  │
//! │ uint32 LE│ uint16 LE│ uint16 LE│
//! └──────────┴──────────┴──────────┘
//! ```
//!
//! `Length` counts the whole frame, header included.
//! All multi-byte integers are Little Endian.

use crate::error::{GuestwireError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Maximum total frame size, header included (64 KiB).
pub const MAX_FRAME_SIZE: usize = 0x10000;

/// Maximum number of services in one discovery request.
pub const MAX_SERVICES: usize = 100;

/// Size of a SERVICES request/response count field.
pub const SERVICES_COUNT_SIZE: usize = 4;

/// Size of one SERVICES response record (atom + version).
pub const SERVICE_RECORD_SIZE: usize = 8;

/// Size of the service atom prefix of a MESSAGE payload.
pub const MESSAGE_ATOM_SIZE: usize = 4;

/// Flag constants for the protocol.
pub mod flags {
    /// Writable capacity available; acknowledge with a POLLOUT event.
    pub const POLLOUT: u16 = 0x0001;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u16, flag: u16) -> bool {
        flags & flag != 0
    }
}

/// Codes of frames flowing host to client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SignalCode {
    None = 0,
    Origin = 1,
    Services = 2,
    Message = 3,
}

impl SignalCode {
    /// Map a raw code, `None` for anything outside the signal code space.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(SignalCode::None),
            1 => Some(SignalCode::Origin),
            2 => Some(SignalCode::Services),
            3 => Some(SignalCode::Message),
            _ => None,
        }
    }
}

/// Codes of frames flowing client to host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EventCode {
    Pollout = 0,
    Origin = 1,
    Services = 2,
    Message = 3,
}

impl From<EventCode> for u16 {
    fn from(code: EventCode) -> u16 {
        code as u16
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total frame length in bytes, header included.
    pub length: u32,
    /// Frame code (signal or event code space, depending on direction).
    pub code: u16,
    /// Flags (see `flags` module).
    pub flags: u16,
}

impl Header {
    /// Create a new header.
    pub fn new(length: u32, code: u16, flags: u16) -> Self {
        Self {
            length,
            code,
            flags,
        }
    }

    /// Header for an event frame carrying `payload_len` bytes.
    pub fn event(code: EventCode, payload_len: usize) -> Self {
        Self::new((HEADER_SIZE + payload_len) as u32, code.into(), 0)
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use guestwire::protocol::Header;
    ///
    /// let bytes = Header::new(12, 3, 1).encode();
    /// assert_eq!(bytes, [12, 0, 0, 0, 3, 0, 1, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..6].copy_from_slice(&self.code.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            length: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            code: u16::from_le_bytes([buf[4], buf[5]]),
            flags: u16::from_le_bytes([buf[6], buf[7]]),
        })
    }

    /// Validate the declared length against the protocol bounds.
    ///
    /// Checks:
    /// - Length covers at least the header
    /// - Length doesn't exceed `max_frame_size`
    pub fn validate(&self, max_frame_size: usize) -> Result<()> {
        let length = self.length as usize;

        if length < HEADER_SIZE {
            return Err(GuestwireError::protocol(format!(
                "frame too short: declared length {}",
                length
            )));
        }

        if length > max_frame_size {
            return Err(GuestwireError::protocol(format!(
                "frame size {} exceeds maximum {}",
                length, max_frame_size
            )));
        }

        Ok(())
    }

    /// Check if the POLLOUT flag is set.
    #[inline]
    pub fn is_pollout(&self) -> bool {
        flags::has_flag(self.flags, flags::POLLOUT)
    }
}
