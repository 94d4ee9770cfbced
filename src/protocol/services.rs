//! SERVICES discovery payloads.
//!
//! Request (host to client):
//! ```text
//! count:u32 LE | name\0 | name\0 | ...
//! ```
//! Response (client to host):
//! ```text
//! count:u32 LE | atom:u32 LE, version:u32 LE | ...
//! ```
//! Response records follow request order.

use bytes::Bytes;

use super::frame::build_event_parts;
use super::wire_format::{EventCode, MAX_SERVICES, SERVICES_COUNT_SIZE, SERVICE_RECORD_SIZE};
use crate::error::{GuestwireError, Result};

/// Per-session identity of a service: its atom and version.
///
/// Atom 0 with version 0 means "unavailable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServiceInfo {
    /// Compact per-session identifier (0 = unaddressed).
    pub atom: u32,
    /// Service version.
    pub version: u32,
}

impl ServiceInfo {
    /// Descriptor reported for names nobody registered.
    pub const UNAVAILABLE: ServiceInfo = ServiceInfo {
        atom: 0,
        version: 0,
    };

    /// Create a descriptor.
    pub fn new(atom: u32, version: u32) -> Self {
        Self { atom, version }
    }

    /// Whether the descriptor addresses a real service.
    #[inline]
    pub fn is_available(&self) -> bool {
        self.atom != 0
    }
}

/// Decode the names listed in a SERVICES request payload.
pub fn parse_services_request(payload: &[u8]) -> Result<Vec<String>> {
    if payload.len() < SERVICES_COUNT_SIZE {
        return Err(GuestwireError::protocol("services request is too short"));
    }

    let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    if count > MAX_SERVICES {
        return Err(GuestwireError::protocol(format!(
            "too many services requested: {} (maximum {})",
            count, MAX_SERVICES
        )));
    }

    let mut rest = &payload[SERVICES_COUNT_SIZE..];
    let mut names = Vec::with_capacity(count);

    for _ in 0..count {
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| GuestwireError::protocol("truncated name in services request"))?;
        names.push(String::from_utf8_lossy(&rest[..len]).into_owned());
        rest = &rest[len + 1..];
    }

    Ok(names)
}

/// Encode a SERVICES request payload (the host side of discovery).
pub fn encode_services_request<S: AsRef<str>>(names: &[S]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SERVICES_COUNT_SIZE + names.len() * 8);
    buf.extend_from_slice(&(names.len() as u32).to_le_bytes());
    for name in names {
        buf.extend_from_slice(name.as_ref().as_bytes());
        buf.push(0);
    }
    buf
}

/// Encode a SERVICES response payload.
pub fn encode_services_response(infos: &[ServiceInfo]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SERVICES_COUNT_SIZE + infos.len() * SERVICE_RECORD_SIZE);
    buf.extend_from_slice(&(infos.len() as u32).to_le_bytes());
    for info in infos {
        buf.extend_from_slice(&info.atom.to_le_bytes());
        buf.extend_from_slice(&info.version.to_le_bytes());
    }
    buf
}

/// Build the complete SERVICES response event frame.
pub fn build_services_response(infos: &[ServiceInfo], max_frame_size: usize) -> Result<Bytes> {
    build_event_parts(
        EventCode::Services,
        &[&encode_services_response(infos)],
        max_frame_size,
    )
}

/// Decode a SERVICES response payload.
pub fn parse_services_response(payload: &[u8]) -> Result<Vec<ServiceInfo>> {
    if payload.len() < SERVICES_COUNT_SIZE {
        return Err(GuestwireError::protocol("services response is too short"));
    }

    let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let records = &payload[SERVICES_COUNT_SIZE..];
    if records.len() != count * SERVICE_RECORD_SIZE {
        return Err(GuestwireError::protocol(format!(
            "services response declares {} records in {} bytes",
            count,
            records.len()
        )));
    }

    Ok(records
        .chunks_exact(SERVICE_RECORD_SIZE)
        .map(|r| {
            ServiceInfo::new(
                u32::from_le_bytes([r[0], r[1], r[2], r[3]]),
                u32::from_le_bytes([r[4], r[5], r[6], r[7]]),
            )
        })
        .collect())
}
