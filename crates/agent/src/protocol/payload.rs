// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed frame payloads and their binary encoding.
//!
//! All integers are big-endian; strings and byte slices are u32
//! length-prefixed. Booleans are one byte (0/1). Optional values carry a
//! one-byte presence flag. Every payload struct round-trips exactly:
//! `decode(encode(p)) == p`.

use bytes::{BufMut, Bytes, BytesMut};

use super::CodecError;

/// Cursor over a payload slice with checked reads.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() - self.pos < n {
            return Err(CodecError::TruncatedPayload);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub fn i64(&mut self) -> Result<i64, CodecError> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub fn bytes(&mut self) -> Result<Bytes, CodecError> {
        let len = self.u32()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// All declared fields consumed; trailing bytes are a framing bug.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(CodecError::TruncatedPayload)
        }
    }
}

/// Growable payload builder mirroring [`PayloadReader`].
pub struct PayloadWriter {
    buf: BytesMut,
}

impl Default for PayloadWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.buf.put_u8(u8::from(v));
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32(v);
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32(v);
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64(v);
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.put_i64(v);
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }

    pub fn string(&mut self, v: &str) -> &mut Self {
        self.bytes(v.as_bytes())
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// First frame on every connection: the client's supported version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionNegotiation {
    pub client_version: u8,
    pub min_version: u8,
    pub max_version: u8,
    pub client_id: String,
}

impl VersionNegotiation {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u8(self.client_version).u8(self.min_version).u8(self.max_version).string(&self.client_id);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self {
            client_version: r.u8()?,
            min_version: r.u8()?,
            max_version: r.u8()?,
            client_id: r.string()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// Server's reply to version negotiation. `rejection_reason` is empty when
/// `accepted` is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionResponse {
    pub selected_version: u8,
    pub server_version: String,
    pub accepted: bool,
    pub rejection_reason: String,
}

impl VersionResponse {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u8(self.selected_version)
            .string(&self.server_version)
            .bool(self.accepted)
            .string(&self.rejection_reason);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self {
            selected_version: r.u8()?,
            server_version: r.string()?,
            accepted: r.bool()?,
            rejection_reason: r.string()?,
        };
        r.finish()?;
        Ok(out)
    }
}

fn encode_string_list(w: &mut PayloadWriter, items: &[String]) {
    w.u32(items.len() as u32);
    for item in items {
        w.string(item);
    }
}

fn decode_string_list(r: &mut PayloadReader<'_>) -> Result<Vec<String>, CodecError> {
    let count = r.u32()? as usize;
    let mut items = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        items.push(r.string()?);
    }
    Ok(items)
}

/// Client's requested feature capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityExchange {
    pub capabilities: Vec<String>,
}

impl CapabilityExchange {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        encode_string_list(&mut w, &self.capabilities);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { capabilities: decode_string_list(&mut r)? };
        r.finish()?;
        Ok(out)
    }
}

/// Capabilities the server granted; feature frames outside this set are
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityResponse {
    pub granted: Vec<String>,
}

impl CapabilityResponse {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        encode_string_list(&mut w, &self.granted);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { granted: decode_string_list(&mut r)? };
        r.finish()?;
        Ok(out)
    }
}

/// Liveness probe. 20 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub seq: u64,
    pub timestamp_ms: i64,
    pub pending_acks: u32,
}

impl Heartbeat {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u64(self.seq).i64(self.timestamp_ms).u32(self.pending_acks);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { seq: r.u64()?, timestamp_ms: r.i64()?, pending_acks: r.u32()? };
        r.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub seq: u64,
    pub timestamp_ms: i64,
}

impl HeartbeatAck {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u64(self.seq).i64(self.timestamp_ms);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { seq: r.u64()?, timestamp_ms: r.i64()? };
        r.finish()?;
        Ok(out)
    }
}

/// Wire error report. `fatal` tells the client whether the connection is
/// about to close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub fatal: bool,
}

impl ErrorPayload {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.string(&self.code).string(&self.message).bool(self.fatal);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { code: r.string()?, message: r.string()?, fatal: r.bool()? };
        r.finish()?;
        Ok(out)
    }
}

/// Client credential presentation (`method` is `none`, `token`, or
/// `certificate`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub method: String,
    pub token: String,
}

impl AuthRequest {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.string(&self.method).string(&self.token);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { method: r.string()?, token: r.string()? };
        r.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

impl AuthResponse {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.bool(self.success).string(&self.message);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { success: r.bool()?, message: r.string()? };
        r.finish()?;
        Ok(out)
    }
}

/// Session creation request. Empty `shell` / `working_dir` select the
/// server defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreate {
    pub shell: String,
    pub cols: u16,
    pub rows: u16,
    pub working_dir: String,
    pub env: Vec<(String, String)>,
}

impl SessionCreate {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.string(&self.shell).u16(self.cols).u16(self.rows).string(&self.working_dir);
        w.u32(self.env.len() as u32);
        for (k, v) in &self.env {
            w.string(k).string(v);
        }
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let shell = r.string()?;
        let cols = r.u16()?;
        let rows = r.u16()?;
        let working_dir = r.string()?;
        let count = r.u32()? as usize;
        let mut env = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            env.push((r.string()?, r.string()?));
        }
        r.finish()?;
        Ok(Self { shell, cols, rows, working_dir, env })
    }
}

/// Session creation acknowledgment. `wire_id` is the numeric channel id
/// carried in data-frame headers for this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreated {
    pub session_id: String,
    pub wire_id: i32,
    pub cols: u16,
    pub rows: u16,
}

impl SessionCreated {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.string(&self.session_id).i32(self.wire_id).u16(self.cols).u16(self.rows);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self {
            session_id: r.string()?,
            wire_id: r.i32()?,
            cols: r.u16()?,
            rows: r.u16()?,
        };
        r.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub state: String,
    pub wire_id: i32,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

impl SessionListResponse {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u32(self.sessions.len() as u32);
        for s in &self.sessions {
            w.string(&s.id)
                .string(&s.state)
                .i32(s.wire_id)
                .u64(s.created_at_ms)
                .u64(s.last_activity_ms)
                .u16(s.cols)
                .u16(s.rows);
        }
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let count = r.u32()? as usize;
        let mut sessions = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            sessions.push(SessionSummary {
                id: r.string()?,
                state: r.string()?,
                wire_id: r.i32()?,
                created_at_ms: r.u64()?,
                last_activity_ms: r.u64()?,
                cols: r.u16()?,
                rows: r.u16()?,
            });
        }
        r.finish()?;
        Ok(Self { sessions })
    }
}

/// Attach (or reattach) to an existing session. `last_sequence` is the last
/// output sequence the client saw, when it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAttach {
    pub session_id: String,
    pub last_sequence: Option<u64>,
}

impl SessionAttach {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.string(&self.session_id);
        match self.last_sequence {
            Some(seq) => {
                w.bool(true).u64(seq);
            }
            None => {
                w.bool(false);
            }
        }
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let session_id = r.string()?;
        let last_sequence = if r.bool()? { Some(r.u64()?) } else { None };
        r.finish()?;
        Ok(Self { session_id, last_sequence })
    }
}

/// Attach acknowledgment: where replay starts and whether a prefix was
/// already evicted from the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAttached {
    pub session_id: String,
    pub wire_id: i32,
    pub replay_from: u64,
    pub data_lost: bool,
    pub has_snapshot: bool,
}

impl SessionAttached {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.string(&self.session_id)
            .i32(self.wire_id)
            .u64(self.replay_from)
            .bool(self.data_lost)
            .bool(self.has_snapshot);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self {
            session_id: r.string()?,
            wire_id: r.i32()?,
            replay_from: r.u64()?,
            data_lost: r.bool()?,
            has_snapshot: r.bool()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// Detach and close requests share one shape: a session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub session_id: String,
}

impl SessionRef {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.string(&self.session_id);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { session_id: r.string()? };
        r.finish()?;
        Ok(out)
    }
}

/// Terminal notification that a session is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClosed {
    pub session_id: String,
    pub exit_code: Option<i32>,
    pub reason: String,
}

impl SessionClosed {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.string(&self.session_id);
        match self.exit_code {
            Some(code) => {
                w.bool(true).i32(code);
            }
            None => {
                w.bool(false);
            }
        }
        w.string(&self.reason);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let session_id = r.string()?;
        let exit_code = if r.bool()? { Some(r.i32()?) } else { None };
        let reason = r.string()?;
        r.finish()?;
        Ok(Self { session_id, exit_code, reason })
    }
}

/// PTY output chunk. `compression` is a [`crate::compress::CompressionType`]
/// wire code; unknown codes pass through untouched so older agents and
/// newer clients stay compatible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub sequence: u64,
    pub timestamp_ms: i64,
    pub compression: u8,
    pub data: Bytes,
}

impl Output {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u64(self.sequence).i64(self.timestamp_ms).u8(self.compression).bytes(&self.data);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self {
            sequence: r.u64()?,
            timestamp_ms: r.i64()?,
            compression: r.u8()?,
            data: r.bytes()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// Keyboard/paste bytes for the PTY. Applied in receive order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub data: Bytes,
}

impl Input {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.bytes(&self.data);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { data: r.bytes()? };
        r.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub cols: u16,
    pub rows: u16,
}

impl Resize {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u16(self.cols).u16(self.rows);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { cols: r.u16()?, rows: r.u16()? };
        r.finish()?;
        Ok(out)
    }
}

/// Signal request by name (`SIGINT`, `SIGTERM`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRequest {
    pub signal: String,
}

impl SignalRequest {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.string(&self.signal);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { signal: r.string()? };
        r.finish()?;
        Ok(out)
    }
}

/// Coarse terminal state for reconnection. The screen bytes are opaque to
/// the agent; `sequence` names the output boundary the snapshot reflects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub cols: u16,
    pub rows: u16,
    pub cursor_x: u16,
    pub cursor_y: u16,
    pub cursor_visible: bool,
    pub screen: Bytes,
    pub scrollback_offset: u32,
    pub scrollback_total: u32,
    pub fg_color: u32,
    pub bg_color: u32,
    pub attributes: u16,
    pub sequence: u64,
}

impl StateSnapshot {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u16(self.cols)
            .u16(self.rows)
            .u16(self.cursor_x)
            .u16(self.cursor_y)
            .bool(self.cursor_visible)
            .bytes(&self.screen)
            .u32(self.scrollback_offset)
            .u32(self.scrollback_total)
            .u32(self.fg_color)
            .u32(self.bg_color)
            .u16(self.attributes)
            .u64(self.sequence);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self {
            cols: r.u16()?,
            rows: r.u16()?,
            cursor_x: r.u16()?,
            cursor_y: r.u16()?,
            cursor_visible: r.bool()?,
            screen: r.bytes()?,
            scrollback_offset: r.u32()?,
            scrollback_total: r.u32()?,
            fg_color: r.u32()?,
            bg_color: r.u32()?,
            attributes: r.u16()?,
            sequence: r.u64()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// Incremental state update between snapshots (opaque delta bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDelta {
    pub sequence: u64,
    pub data: Bytes,
}

impl StateDelta {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u64(self.sequence).bytes(&self.data);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { sequence: r.u64()?, data: r.bytes()? };
        r.finish()?;
        Ok(out)
    }
}

/// Byte-window scrollback page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollbackRequest {
    pub max_bytes: u32,
}

impl ScrollbackRequest {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u32(self.max_bytes);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { max_bytes: r.u32()? };
        r.finish()?;
        Ok(out)
    }
}

/// Scrollback page: the trailing window of buffered output, plus the total
/// bytes ever written so the client can place it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollbackResponse {
    pub total_written: u64,
    pub data: Bytes,
}

impl ScrollbackResponse {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u64(self.total_written).bytes(&self.data);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { total_written: r.u64()?, data: r.bytes()? };
        r.finish()?;
        Ok(out)
    }
}

/// Client pause/resume for a session's output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    pub pause: bool,
}

impl FlowControl {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.bool(self.pause);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { pause: r.bool()? };
        r.finish()?;
        Ok(out)
    }
}

/// Additional output window granted by the client, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdate {
    pub bytes: u32,
}

impl WindowUpdate {
    pub fn encode(&self) -> Bytes {
        let mut w = PayloadWriter::new();
        w.u32(self.bytes);
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = PayloadReader::new(buf);
        let out = Self { bytes: r.u32()? };
        r.finish()?;
        Ok(out)
    }
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
