// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol-level error codes carried in `Error` frames.
///
/// Codes are stable wire strings; clients match on them, so renaming a
/// variant must not change its `as_str` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    UnknownFrameType,
    VersionMismatch,
    PayloadTooLarge,
    SessionNotFound,
    SessionLimit,
    NotAuthorized,
    AuthRequired,
    IncompleteHeader,
    IncompletePayload,
    TruncatedPayload,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownFrameType => "UNKNOWN_FRAME_TYPE",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionLimit => "SESSION_LIMIT",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::IncompleteHeader => "INCOMPLETE_HEADER",
            Self::IncompletePayload => "INCOMPLETE_PAYLOAD",
            Self::TruncatedPayload => "TRUNCATED_PAYLOAD",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether the connection should close after this error is sent.
    ///
    /// Framing-level failures leave the byte stream unsynchronized, so the
    /// connection cannot continue. Per-operation failures can.
    pub fn default_fatal(&self) -> bool {
        match self {
            Self::UnknownFrameType
            | Self::VersionMismatch
            | Self::PayloadTooLarge
            | Self::IncompleteHeader
            | Self::IncompletePayload
            | Self::TruncatedPayload => true,
            Self::SessionNotFound
            | Self::SessionLimit
            | Self::NotAuthorized
            | Self::AuthRequired
            | Self::Internal => false,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotAuthorized | Self::AuthRequired => 401,
            Self::SessionNotFound => 404,
            Self::SessionLimit => 429,
            Self::PayloadTooLarge => 413,
            Self::UnknownFrameType
            | Self::VersionMismatch
            | Self::IncompleteHeader
            | Self::IncompletePayload
            | Self::TruncatedPayload => 400,
            Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnection failures surfaced by the reconnection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectError {
    WindowExpired,
    RegistrationFailed(String),
    SessionNotFound,
    NotAuthorized,
}

impl ReconnectError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WindowExpired => "WINDOW_EXPIRED",
            Self::RegistrationFailed(_) => "REGISTRATION_FAILED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::NotAuthorized => "NOT_AUTHORIZED",
        }
    }
}

impl fmt::Display for ReconnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegistrationFailed(detail) => write!(f, "{}: {detail}", self.as_str()),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl std::error::Error for ReconnectError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
