//! Protocol module - wire format, framing, and discovery payloads.
//!
//! This module implements the binary protocol of the control channel:
//! - 8-byte header encoding/decoding
//! - Frame parsing with length consistency checks, event frame builders
//! - SERVICES request/response codecs

mod frame;
mod services;
mod wire_format;

pub use frame::{build_event, build_event_parts, pollout_event, split_message, Frame};
pub use services::{
    build_services_response, encode_services_request, encode_services_response,
    parse_services_request, parse_services_response, ServiceInfo,
};
pub use wire_format::{
    flags, EventCode, Header, SignalCode, HEADER_SIZE, MAX_FRAME_SIZE, MAX_SERVICES,
    MESSAGE_ATOM_SIZE, SERVICES_COUNT_SIZE, SERVICE_RECORD_SIZE,
};
