// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary wire protocol: frame header, type registry, and codec errors.
//!
//! Every message is one frame: a 10-byte big-endian header followed by a
//! typed payload. Header layout:
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 1    | version        |
//! | 1      | 4    | session id     |
//! | 5      | 1    | frame type     |
//! | 6      | 4    | payload length |
//!
//! Session id 0 is reserved for control frames. Type codes 0x20–0x2F and
//! 0x60+ are reserved for future use and must be rejected, not ignored.

pub mod codec;
pub mod payload;

use bytes::Bytes;
use std::fmt;

use crate::error::ErrorCode;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Header size in bytes.
pub const HEADER_LEN: usize = 10;

/// Hard cap on a single frame payload (4 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 4 * 1024 * 1024;

/// Session id carried by frames not bound to a session.
pub const CONTROL_SESSION_ID: i32 = 0;

/// Frame type registry. Codes are stable; gaps are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    // Control
    VersionNegotiation = 0x00,
    VersionResponse = 0x01,
    CapabilityExchange = 0x02,
    CapabilityResponse = 0x03,
    Heartbeat = 0x04,
    HeartbeatAck = 0x05,
    Error = 0x06,
    Auth = 0x07,
    AuthResponse = 0x08,
    // Session lifecycle
    SessionCreate = 0x10,
    SessionCreated = 0x11,
    SessionList = 0x12,
    SessionListResponse = 0x13,
    SessionAttach = 0x14,
    SessionDetach = 0x15,
    SessionClose = 0x16,
    SessionClosed = 0x17,
    SessionAttached = 0x18,
    // Data plane
    Output = 0x30,
    Input = 0x31,
    Resize = 0x32,
    Signal = 0x33,
    // State sync
    StateSnapshot = 0x40,
    StateDelta = 0x41,
    ScrollbackRequest = 0x42,
    ScrollbackResponse = 0x43,
    // Flow control
    FlowControl = 0x50,
    WindowUpdate = 0x51,
}

impl FrameType {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Resolve a wire code, rejecting unknown and reserved codes.
    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        let ty = match code {
            0x00 => Self::VersionNegotiation,
            0x01 => Self::VersionResponse,
            0x02 => Self::CapabilityExchange,
            0x03 => Self::CapabilityResponse,
            0x04 => Self::Heartbeat,
            0x05 => Self::HeartbeatAck,
            0x06 => Self::Error,
            0x07 => Self::Auth,
            0x08 => Self::AuthResponse,
            0x10 => Self::SessionCreate,
            0x11 => Self::SessionCreated,
            0x12 => Self::SessionList,
            0x13 => Self::SessionListResponse,
            0x14 => Self::SessionAttach,
            0x15 => Self::SessionDetach,
            0x16 => Self::SessionClose,
            0x17 => Self::SessionClosed,
            0x18 => Self::SessionAttached,
            0x30 => Self::Output,
            0x31 => Self::Input,
            0x32 => Self::Resize,
            0x33 => Self::Signal,
            0x40 => Self::StateSnapshot,
            0x41 => Self::StateDelta,
            0x42 => Self::ScrollbackRequest,
            0x43 => Self::ScrollbackResponse,
            0x50 => Self::FlowControl,
            0x51 => Self::WindowUpdate,
            other => return Err(CodecError::UnknownFrameType(other)),
        };
        Ok(ty)
    }

    /// Whether this type is only valid on the control session id.
    pub fn is_control(&self) -> bool {
        self.code() < 0x10
    }
}

/// A decoded wire frame: header fields plus the raw payload bytes.
///
/// Payload interpretation is the job of [`payload`]; the codec treats it
/// as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub session_id: i32,
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    /// Control-channel frame (session id 0).
    pub fn control(frame_type: FrameType, payload: Bytes) -> Self {
        Self { version: PROTOCOL_VERSION, session_id: CONTROL_SESSION_ID, frame_type, payload }
    }

    /// Frame bound to a session channel.
    pub fn session(session_id: i32, frame_type: FrameType, payload: Bytes) -> Self {
        Self { version: PROTOCOL_VERSION, session_id, frame_type, payload }
    }
}

/// Frame encode/decode failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Stream ended inside the 10-byte header.
    IncompleteHeader { got: usize },
    /// Stream ended inside the declared payload.
    IncompletePayload { expected: usize, got: usize },
    /// Declared payload length exceeds the configured cap.
    PayloadTooLarge { declared: u32, max: u32 },
    /// Type code not in the registry (includes reserved ranges).
    UnknownFrameType(u8),
    /// Typed payload ended before all declared fields were read.
    TruncatedPayload,
    /// A length-prefixed string was not valid UTF-8.
    InvalidUtf8,
}

impl CodecError {
    /// Map onto the wire error taxonomy for `Error` frames.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::IncompleteHeader { .. } => ErrorCode::IncompleteHeader,
            Self::IncompletePayload { .. } => ErrorCode::IncompletePayload,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::UnknownFrameType(_) => ErrorCode::UnknownFrameType,
            Self::TruncatedPayload | Self::InvalidUtf8 => ErrorCode::TruncatedPayload,
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompleteHeader { got } => {
                write!(f, "incomplete header: {got} of {HEADER_LEN} bytes")
            }
            Self::IncompletePayload { expected, got } => {
                write!(f, "incomplete payload: {got} of {expected} bytes")
            }
            Self::PayloadTooLarge { declared, max } => {
                write!(f, "payload length {declared} exceeds cap {max}")
            }
            Self::UnknownFrameType(code) => write!(f, "unknown frame type 0x{code:02x}"),
            Self::TruncatedPayload => f.write_str("truncated payload"),
            Self::InvalidUtf8 => f.write_str("invalid utf-8 in payload string"),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
