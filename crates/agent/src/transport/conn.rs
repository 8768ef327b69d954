// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection protocol handler.
//!
//! One WebSocket connection carries binary frames, one frame per message.
//! The connection walks version negotiation, capability exchange, and
//! authentication before session operations are accepted. Each attached
//! session gets a forwarder task that pumps ring-stamped output onto the
//! socket, gated by per-session flow control.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compress::AdaptiveCompressor;
use crate::error::ErrorCode;
use crate::protocol::{codec, payload, Frame, FrameType, PROTOCOL_VERSION};
use crate::pty::spawn::parse_signal;
use crate::pty::{PtyError, SignalOutcome, SpawnSpec};
use crate::reconnect::TerminalStateSnapshot;
use crate::ring::now_ms;
use crate::session::{ManagedSession, SessionEvent, SessionState};
use crate::transport::auth::{self, AuthAttempt, AuthMethod};
use crate::transport::state::{AgentContext, SERVER_CAPABILITIES};

/// Connection handshake phases. Session operations only run in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingVersion,
    AwaitingCapabilities,
    AwaitingAuth,
    Ready,
}

/// Per-session output gate driven by flow-control frames.
///
/// The window starts unlimited; it becomes finite the first time the
/// client grants one.
struct FlowGate {
    paused: AtomicBool,
    window_bytes: AtomicI64,
    unlimited: AtomicBool,
    notify: Notify,
}

impl FlowGate {
    fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            window_bytes: AtomicI64::new(0),
            unlimited: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
        if !paused {
            self.notify.notify_waiters();
        }
    }

    fn grant(&self, bytes: u32) {
        self.unlimited.store(false, Ordering::Release);
        self.window_bytes.fetch_add(i64::from(bytes), Ordering::AcqRel);
        self.notify.notify_waiters();
    }

    fn consume(&self, bytes: usize) {
        if !self.unlimited.load(Ordering::Acquire) {
            self.window_bytes.fetch_sub(bytes as i64, Ordering::AcqRel);
        }
    }

    fn ready(&self) -> bool {
        if self.paused.load(Ordering::Acquire) {
            return false;
        }
        self.unlimited.load(Ordering::Acquire) || self.window_bytes.load(Ordering::Acquire) > 0
    }

    async fn wait_ready(&self) {
        loop {
            let notified = self.notify.notified();
            if self.ready() {
                return;
            }
            notified.await;
        }
    }
}

/// A session attached to this connection.
struct Attachment {
    session_id: String,
    last_delivered: Arc<AtomicU64>,
    gate: Arc<FlowGate>,
    forwarder: JoinHandle<()>,
}

/// WebSocket upgrade endpoint.
pub async fn ws_handler(
    State(ctx): State<Arc<AgentContext>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(ctx, socket))
}

/// Run one connection to completion.
pub async fn handle_connection(ctx: Arc<AgentContext>, socket: WebSocket) {
    let connection_id = Uuid::new_v4().to_string();
    let open_count = ctx.connection_opened();
    info!(connection = %connection_id, open = open_count, "connection opened");

    let (ws_tx, ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<Frame>(256);
    let compressor =
        Arc::new(Mutex::new(AdaptiveCompressor::new(ctx.config.compression_policy())));

    let writer = tokio::spawn(write_loop(ws_tx, out_rx, Arc::clone(&compressor)));

    let mut conn = Conn {
        ctx: Arc::clone(&ctx),
        connection_id: connection_id.clone(),
        client_id: connection_id.clone(),
        phase: Phase::AwaitingVersion,
        granted_caps: HashSet::new(),
        attachments: HashMap::new(),
        out_tx: out_tx.clone(),
        compressor,
        heartbeat_seq: 0,
        last_ack_ms: now_ms(),
    };

    let heartbeat_period = Duration::from_secs(ctx.config.heartbeat_secs.max(1));
    let mut heartbeat = tokio::time::interval(heartbeat_period);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut ws_rx: SplitStream<WebSocket> = ws_rx;

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = heartbeat.tick() => {
                if conn.phase != Phase::Ready {
                    continue;
                }
                // Three missed acks in a row means the peer is gone.
                let idle = now_ms().saturating_sub(conn.last_ack_ms);
                if idle > heartbeat_period.as_millis() as u64 * 3 {
                    info!(connection = %connection_id, idle_ms = idle, "heartbeat timeout");
                    break;
                }
                if !conn.send_heartbeat().await {
                    break;
                }
            }
            message = ws_rx.next() => {
                let message = match message {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        debug!(connection = %connection_id, "socket error: {e}");
                        break;
                    }
                    None => break,
                };
                match message {
                    Message::Binary(raw) => {
                        if conn.on_raw(&raw).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    // Pings are answered by axum; text frames are not part
                    // of this protocol.
                    Message::Text(_) => {
                        if conn
                            .send_error(ErrorCode::UnknownFrameType, "binary frames only")
                            .await
                        {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    conn.teardown().await;
    drop(out_tx);
    writer.abort();
    ctx.connection_closed();
    info!(connection = %connection_id, "connection closed");
}

/// Socket writer: frames in, binary messages out, with a throughput sample
/// fed back into the compressor per send.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Frame>,
    compressor: Arc<Mutex<AdaptiveCompressor>>,
) {
    while let Some(frame) = out_rx.recv().await {
        let encoded = codec::encode(&frame);
        let len = encoded.len();
        let start = Instant::now();
        if ws_tx.send(Message::Binary(encoded)).await.is_err() {
            break;
        }
        if len >= 1024 {
            let elapsed = start.elapsed();
            if let Ok(mut c) = compressor.lock() {
                c.record_throughput(len, elapsed);
            }
        }
    }
}

struct Conn {
    ctx: Arc<AgentContext>,
    connection_id: String,
    /// Client identity from version negotiation; used for reconnection
    /// records and auth lockout. Defaults to the connection id.
    client_id: String,
    phase: Phase,
    granted_caps: HashSet<String>,
    attachments: HashMap<i32, Attachment>,
    out_tx: mpsc::Sender<Frame>,
    compressor: Arc<Mutex<AdaptiveCompressor>>,
    heartbeat_seq: u64,
    last_ack_ms: u64,
}

impl Conn {
    /// Decode and dispatch one raw message. Returns true when the
    /// connection must close.
    async fn on_raw(&mut self, raw: &[u8]) -> bool {
        // Any inbound frame counts as liveness for the heartbeat timeout.
        self.last_ack_ms = now_ms();
        let frame = match codec::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = %self.connection_id, "frame decode failed: {e}");
                return self.send_error(e.error_code(), &e.to_string()).await;
            }
        };

        if frame.version != PROTOCOL_VERSION && self.phase != Phase::AwaitingVersion {
            return self
                .send_error(ErrorCode::VersionMismatch, "unsupported frame version")
                .await;
        }

        match self.phase {
            Phase::AwaitingVersion => self.on_version_phase(frame).await,
            Phase::AwaitingCapabilities => self.on_capability_phase(frame).await,
            Phase::AwaitingAuth => self.on_auth_phase(frame).await,
            Phase::Ready => self.on_ready_phase(frame).await,
        }
    }

    async fn on_version_phase(&mut self, frame: Frame) -> bool {
        if frame.frame_type != FrameType::VersionNegotiation {
            let _ = self
                .send_error(ErrorCode::VersionMismatch, "expected version negotiation")
                .await;
            return true;
        }
        let negotiation = match payload::VersionNegotiation::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };

        let accepted = (negotiation.min_version..=negotiation.max_version)
            .contains(&PROTOCOL_VERSION);
        let response = payload::VersionResponse {
            selected_version: if accepted { PROTOCOL_VERSION } else { 0 },
            server_version: env!("CARGO_PKG_VERSION").to_owned(),
            accepted,
            rejection_reason: if accepted {
                String::new()
            } else {
                format!(
                    "server speaks version {PROTOCOL_VERSION}, client supports {}..={}",
                    negotiation.min_version, negotiation.max_version
                )
            },
        };
        let close = !self
            .send(Frame::control(FrameType::VersionResponse, response.encode()))
            .await;
        if !accepted {
            info!(connection = %self.connection_id, "version negotiation failed");
            return true;
        }
        if !negotiation.client_id.is_empty() {
            self.client_id = negotiation.client_id;
        }
        self.phase = Phase::AwaitingCapabilities;
        close
    }

    async fn on_capability_phase(&mut self, frame: Frame) -> bool {
        match frame.frame_type {
            FrameType::CapabilityExchange => {}
            FrameType::Heartbeat => return self.on_heartbeat(&frame).await,
            _ => {
                return self
                    .send_error(ErrorCode::NotAuthorized, "expected capability exchange")
                    .await
            }
        }
        let exchange = match payload::CapabilityExchange::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };

        self.granted_caps = exchange
            .capabilities
            .iter()
            .filter(|c| SERVER_CAPABILITIES.contains(&c.as_str()))
            .cloned()
            .collect();
        let response = payload::CapabilityResponse {
            granted: self.granted_caps.iter().cloned().collect(),
        };
        let close = !self
            .send(Frame::control(FrameType::CapabilityResponse, response.encode()))
            .await;

        match self.ctx.auth_method {
            AuthMethod::Token => self.phase = Phase::AwaitingAuth,
            AuthMethod::None => {
                warn!(connection = %self.connection_id, "authentication disabled, allowing all operations");
                self.phase = Phase::Ready;
            }
            AuthMethod::Certificate => {
                // mTLS was verified at the transport; the message layer
                // trusts anything that got this far.
                self.phase = Phase::Ready;
            }
        }
        close
    }

    async fn on_auth_phase(&mut self, frame: Frame) -> bool {
        match frame.frame_type {
            FrameType::Auth => {}
            FrameType::Heartbeat => return self.on_heartbeat(&frame).await,
            _ => {
                return self
                    .send_error(ErrorCode::AuthRequired, "authenticate first")
                    .await
            }
        }
        let request = match payload::AuthRequest::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };

        if let AuthAttempt::LockedOut { retry_after_secs } =
            self.ctx.auth_guard.check(&self.client_id)
        {
            let _ = self
                .send(Frame::control(
                    FrameType::AuthResponse,
                    payload::AuthResponse {
                        success: false,
                        message: format!("locked out, retry in {retry_after_secs}s"),
                    }
                    .encode(),
                ))
                .await;
            return true;
        }

        let expected = self.ctx.config.auth_token.as_deref().unwrap_or_default();
        if auth::validate_token(expected, &request.token) {
            self.ctx.auth_guard.record_success(&self.client_id);
            self.phase = Phase::Ready;
            let sent = self
                .send(Frame::control(
                    FrameType::AuthResponse,
                    payload::AuthResponse { success: true, message: String::new() }.encode(),
                ))
                .await;
            info!(connection = %self.connection_id, client = %self.client_id, "authenticated");
            return !sent;
        }

        let locked = self.ctx.auth_guard.record_failure(&self.client_id);
        let _ = self
            .send(Frame::control(
                FrameType::AuthResponse,
                payload::AuthResponse { success: false, message: "invalid token".to_owned() }
                    .encode(),
            ))
            .await;
        if locked {
            warn!(connection = %self.connection_id, client = %self.client_id, "auth lockout, closing");
            return true;
        }
        false
    }

    async fn on_ready_phase(&mut self, frame: Frame) -> bool {
        match frame.frame_type {
            FrameType::Heartbeat => self.on_heartbeat(&frame).await,
            FrameType::HeartbeatAck => {
                self.last_ack_ms = now_ms();
                false
            }
            FrameType::Auth => {
                // Already authenticated (or auth disabled); idempotent ok.
                !self
                    .send(Frame::control(
                        FrameType::AuthResponse,
                        payload::AuthResponse { success: true, message: String::new() }.encode(),
                    ))
                    .await
            }
            FrameType::SessionCreate => self.on_session_create(&frame).await,
            FrameType::SessionList => self.on_session_list().await,
            FrameType::SessionAttach => self.on_session_attach(&frame).await,
            FrameType::SessionDetach => self.on_session_detach(&frame).await,
            FrameType::SessionClose => self.on_session_close(&frame).await,
            FrameType::Input => self.on_input(&frame).await,
            FrameType::Resize => self.on_resize(&frame).await,
            FrameType::Signal => self.on_signal(&frame).await,
            FrameType::ScrollbackRequest => self.on_scrollback(&frame).await,
            FrameType::FlowControl => self.on_flow_control(&frame).await,
            FrameType::WindowUpdate => self.on_window_update(&frame).await,
            FrameType::VersionNegotiation | FrameType::CapabilityExchange => {
                self.send_error(ErrorCode::VersionMismatch, "handshake already complete").await
            }
            _ => {
                self.send_error(
                    ErrorCode::UnknownFrameType,
                    &format!(
                        "frame type 0x{:02x} not valid client-to-server",
                        frame.frame_type.code()
                    ),
                )
                .await
            }
        }
    }

    async fn on_heartbeat(&mut self, frame: &Frame) -> bool {
        let hb = match payload::Heartbeat::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };
        let ack = payload::HeartbeatAck { seq: hb.seq, timestamp_ms: now_ms() as i64 };
        !self.send(Frame::control(FrameType::HeartbeatAck, ack.encode())).await
    }

    async fn send_heartbeat(&mut self) -> bool {
        self.heartbeat_seq += 1;
        let hb = payload::Heartbeat {
            seq: self.heartbeat_seq,
            timestamp_ms: now_ms() as i64,
            pending_acks: 0,
        };
        self.send(Frame::control(FrameType::Heartbeat, hb.encode())).await
    }

    async fn on_session_create(&mut self, frame: &Frame) -> bool {
        let create = match payload::SessionCreate::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };

        let backend = match self.ctx.backends.preferred() {
            Some(b) => b,
            None => {
                return self.send_error(ErrorCode::Internal, "no terminal backend available").await
            }
        };

        let spec = SpawnSpec {
            shell: create.shell,
            cols: create.cols,
            rows: create.rows,
            working_dir: if create.working_dir.is_empty() {
                None
            } else {
                Some(create.working_dir.into())
            },
            env: create.env,
        };

        let session =
            match self.ctx.registry.create_session(&self.connection_id, backend.as_ref(), &spec) {
                Ok(session) => session,
                Err(e) => {
                    let code = e.error_code();
                    return self.send_error(code, &e.to_string()).await;
                }
            };

        session.attach_client(&self.client_id);
        let (cols, rows) = session.process.dimensions();
        let created = payload::SessionCreated {
            session_id: session.id.clone(),
            wire_id: session.wire_id,
            cols,
            rows,
        };
        let sent = self
            .send(Frame::control(FrameType::SessionCreated, created.encode()))
            .await;
        self.spawn_forwarder(&session);
        !sent
    }

    async fn on_session_list(&mut self) -> bool {
        let sessions = self
            .ctx
            .registry
            .all_sessions()
            .into_iter()
            .map(|s| {
                let summary = s.summary();
                payload::SessionSummary {
                    id: summary.id,
                    state: summary.state.as_str().to_owned(),
                    wire_id: s.wire_id,
                    created_at_ms: summary.created_at_ms,
                    last_activity_ms: summary.last_activity_ms,
                    cols: summary.cols,
                    rows: summary.rows,
                }
            })
            .collect();
        let response = payload::SessionListResponse { sessions };
        !self
            .send(Frame::control(FrameType::SessionListResponse, response.encode()))
            .await
    }

    async fn on_session_attach(&mut self, frame: &Frame) -> bool {
        let attach = match payload::SessionAttach::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };

        let outcome = match self.ctx.reconnect.attempt_reconnection(
            &self.client_id,
            &attach.session_id,
            &self.connection_id,
            attach.last_sequence,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                return self
                    .send_error_code_str(e.as_str(), &e.to_string(), false)
                    .await
            }
        };

        let session = Arc::clone(&outcome.session);
        let attached = payload::SessionAttached {
            session_id: session.id.clone(),
            wire_id: session.wire_id,
            replay_from: outcome.replay_from,
            data_lost: outcome.data_lost,
            has_snapshot: outcome.snapshot.is_some(),
        };
        if !self.send(Frame::control(FrameType::SessionAttached, attached.encode())).await {
            return true;
        }

        if self.granted_caps.contains("state-sync") {
            if let Some(snapshot) = outcome.snapshot {
                let frame = snapshot_frame(session.wire_id, &snapshot);
                if !self.send(frame).await {
                    return true;
                }
            }
        }

        // Replay before live forwarding starts; the forwarder subscribes
        // afterwards, so replayed chunks and live chunks may overlap by at
        // most the broadcast backlog, which the client dedups by sequence.
        for chunk in &outcome.replay {
            let frame =
                self.output_frame(session.wire_id, chunk.sequence, chunk.timestamp_ms, &chunk.data);
            if !self.send(frame).await {
                return true;
            }
        }

        self.spawn_forwarder(&session);
        if let Some(last) = outcome.replay.last() {
            if let Some(att) = self.attachments.get(&session.wire_id) {
                att.last_delivered.store(last.sequence, Ordering::Relaxed);
            }
        }
        false
    }

    async fn on_session_detach(&mut self, frame: &Frame) -> bool {
        let detach = match payload::SessionRef::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };

        let session = match self.ctx.registry.get_session(&detach.session_id) {
            Some(s) => s,
            None => {
                return self
                    .send_error(ErrorCode::SessionNotFound, "unknown session")
                    .await
            }
        };

        self.detach_session(&session, true).await;
        false
    }

    async fn on_session_close(&mut self, frame: &Frame) -> bool {
        let close = match payload::SessionRef::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };

        let session = match self.ctx.registry.get_session(&close.session_id) {
            Some(s) => s,
            None => {
                return self
                    .send_error(ErrorCode::SessionNotFound, "unknown session")
                    .await
            }
        };

        let wire_id = session.wire_id;
        if let Some(att) = self.attachments.remove(&wire_id) {
            att.forwarder.abort();
        }
        self.ctx.registry.terminate_session(&close.session_id, "closed by client").await;
        self.ctx.reconnect.clear_session_state(&close.session_id);

        let closed = payload::SessionClosed {
            session_id: close.session_id.clone(),
            exit_code: None,
            reason: "closed by client".to_owned(),
        };
        !self.send(Frame::control(FrameType::SessionClosed, closed.encode())).await
    }

    async fn on_input(&mut self, frame: &Frame) -> bool {
        let input = match payload::Input::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };
        let session = match self.session_by_wire(frame.session_id) {
            Some(s) => s,
            None => {
                return self
                    .send_error(ErrorCode::SessionNotFound, "unknown session channel")
                    .await
            }
        };

        session.touch();
        if let Err(e) = session.process.write(&input.data).await {
            return self.send_pty_error(&e).await;
        }
        false
    }

    async fn on_resize(&mut self, frame: &Frame) -> bool {
        let resize = match payload::Resize::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };
        let session = match self.session_by_wire(frame.session_id) {
            Some(s) => s,
            None => {
                return self
                    .send_error(ErrorCode::SessionNotFound, "unknown session channel")
                    .await
            }
        };

        if let Err(e) = session.process.resize(resize.cols, resize.rows) {
            return self.send_pty_error(&e).await;
        }
        session.touch();
        let _ = session
            .events
            .send(SessionEvent::Resized { cols: resize.cols, rows: resize.rows });
        false
    }

    async fn on_signal(&mut self, frame: &Frame) -> bool {
        let request = match payload::SignalRequest::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };
        let session = match self.session_by_wire(frame.session_id) {
            Some(s) => s,
            None => {
                return self
                    .send_error(ErrorCode::SessionNotFound, "unknown session channel")
                    .await
            }
        };

        let signal = match parse_signal(&request.signal) {
            Some(s) => s,
            None => {
                return self
                    .send_error_code_str("UNSUPPORTED_SIGNAL", &request.signal, false)
                    .await
            }
        };

        match session.process.signal(signal).await {
            Ok(SignalOutcome::Delivered) => false,
            Ok(SignalOutcome::Unsupported) => {
                self.send_error_code_str("UNSUPPORTED_SIGNAL", &request.signal, false).await
            }
            Err(e) => self.send_pty_error(&e).await,
        }
    }

    async fn on_scrollback(&mut self, frame: &Frame) -> bool {
        if !self.granted_caps.contains("scrollback-replay") {
            return self
                .send_error(ErrorCode::NotAuthorized, "scrollback-replay capability not granted")
                .await;
        }
        let request = match payload::ScrollbackRequest::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };
        let session = match self.session_by_wire(frame.session_id) {
            Some(s) => s,
            None => {
                return self
                    .send_error(ErrorCode::SessionNotFound, "unknown session channel")
                    .await
            }
        };

        let (total_written, data) = {
            let ring = crate::session::lock(&session.ring);
            (ring.cumulative_bytes(), ring.latest_bytes(request.max_bytes as usize))
        };
        let response =
            payload::ScrollbackResponse { total_written, data: Bytes::from(data) };
        !self
            .send(Frame::session(
                session.wire_id,
                FrameType::ScrollbackResponse,
                response.encode(),
            ))
            .await
    }

    async fn on_flow_control(&mut self, frame: &Frame) -> bool {
        if !self.granted_caps.contains("flow-control") {
            return self
                .send_error(ErrorCode::NotAuthorized, "flow-control capability not granted")
                .await;
        }
        let control = match payload::FlowControl::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };
        if let Some(att) = self.attachments.get(&frame.session_id) {
            att.gate.set_paused(control.pause);
        }
        false
    }

    async fn on_window_update(&mut self, frame: &Frame) -> bool {
        if !self.granted_caps.contains("flow-control") {
            return self
                .send_error(ErrorCode::NotAuthorized, "flow-control capability not granted")
                .await;
        }
        let update = match payload::WindowUpdate::decode(&frame.payload) {
            Ok(p) => p,
            Err(e) => return self.payload_error(&e).await,
        };
        if let Some(att) = self.attachments.get(&frame.session_id) {
            att.gate.grant(update.bytes);
        }
        false
    }

    /// Start the forwarder pumping session events to this socket.
    fn spawn_forwarder(&mut self, session: &Arc<ManagedSession>) {
        if self.attachments.contains_key(&session.wire_id) {
            return;
        }

        let gate = Arc::new(FlowGate::new());
        let last_delivered = Arc::new(AtomicU64::new(0));
        let mut events = session.events.subscribe();
        let out_tx = self.out_tx.clone();
        let compressor = Arc::clone(&self.compressor);
        let wire_id = session.wire_id;
        let session_id = session.id.clone();
        let gate_for_task = Arc::clone(&gate);
        let delivered_for_task = Arc::clone(&last_delivered);

        let forwarder = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        // The client can recover the gap via replay.
                        debug!(session = %session_id, missed, "forwarder lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                match event {
                    SessionEvent::Output { sequence, timestamp_ms, data } => {
                        gate_for_task.wait_ready().await;
                        let result = match compressor.lock() {
                            Ok(c) => c.compress(&data),
                            Err(_) => break,
                        };
                        let output = payload::Output {
                            sequence,
                            timestamp_ms: timestamp_ms as i64,
                            compression: result.compression_type.code(),
                            data: Bytes::from(result.data),
                        };
                        let frame =
                            Frame::session(wire_id, FrameType::Output, output.encode());
                        if out_tx.send(frame).await.is_err() {
                            break;
                        }
                        delivered_for_task.store(sequence, Ordering::Relaxed);
                        gate_for_task.consume(data.len());
                    }
                    SessionEvent::Exited { status } => {
                        let closed = payload::SessionClosed {
                            session_id: session_id.clone(),
                            exit_code: status.code,
                            reason: "process exited".to_owned(),
                        };
                        let frame =
                            Frame::control(FrameType::SessionClosed, closed.encode());
                        let _ = out_tx.send(frame).await;
                        break;
                    }
                    SessionEvent::Resized { cols, rows } => {
                        let resize = payload::Resize { cols, rows };
                        let frame = Frame::session(wire_id, FrameType::Resize, resize.encode());
                        if out_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.attachments.insert(
            wire_id,
            Attachment { session_id: session.id.clone(), last_delivered, gate, forwarder },
        );
    }

    /// Detach one session from this connection. `explicit` marks a client
    /// request rather than a dropped socket.
    async fn detach_session(&mut self, session: &Arc<ManagedSession>, explicit: bool) {
        let att = match self.attachments.remove(&session.wire_id) {
            Some(att) => att,
            None => return,
        };
        att.forwarder.abort();

        let remaining = session.detach_client(&self.client_id);
        let last_seq = att.last_delivered.load(Ordering::Relaxed);

        if remaining == 0 && session.state() == SessionState::Active {
            if self.ctx.registry.mark_disconnected(&session.id).is_ok() {
                self.ctx
                    .reconnect
                    .record_disconnection(&self.client_id, &session.id, last_seq);
            }
        }
        debug!(
            connection = %self.connection_id,
            session = %att.session_id,
            explicit,
            last_seq,
            "detached"
        );
    }

    /// Connection closing: detach everything, keep processes alive for the
    /// reconnection window.
    async fn teardown(&mut self) {
        let wire_ids: Vec<i32> = self.attachments.keys().copied().collect();
        for wire_id in wire_ids {
            if let Some(session_id) =
                self.attachments.get(&wire_id).map(|a| a.session_id.clone())
            {
                if let Some(session) = self.ctx.registry.get_session(&session_id) {
                    self.detach_session(&session, false).await;
                } else if let Some(att) = self.attachments.remove(&wire_id) {
                    att.forwarder.abort();
                }
            }
        }
    }

    fn session_by_wire(&self, wire_id: i32) -> Option<Arc<ManagedSession>> {
        self.ctx.registry.get_by_wire_id(wire_id)
    }

    fn output_frame(
        &self,
        wire_id: i32,
        sequence: u64,
        timestamp_ms: u64,
        data: &[u8],
    ) -> Frame {
        let result = match self.compressor.lock() {
            Ok(c) => c.compress(data),
            Err(poisoned) => poisoned.into_inner().compress(data),
        };
        let output = payload::Output {
            sequence,
            timestamp_ms: timestamp_ms as i64,
            compression: result.compression_type.code(),
            data: Bytes::from(result.data),
        };
        Frame::session(wire_id, FrameType::Output, output.encode())
    }

    async fn send(&self, frame: Frame) -> bool {
        self.out_tx.send(frame).await.is_ok()
    }

    /// Send an `Error` frame. Returns true when the connection must close
    /// (send failed or the code is fatal).
    async fn send_error(&self, code: ErrorCode, message: &str) -> bool {
        self.send_error_code_str(code.as_str(), message, code.default_fatal()).await
    }

    async fn send_error_code_str(&self, code: &str, message: &str, fatal: bool) -> bool {
        let payload = payload::ErrorPayload {
            code: code.to_owned(),
            message: message.to_owned(),
            fatal,
        };
        let sent = self.send(Frame::control(FrameType::Error, payload.encode())).await;
        !sent || fatal
    }

    async fn send_pty_error(&self, e: &PtyError) -> bool {
        self.send_error_code_str(e.as_str(), &e.to_string(), false).await
    }

    async fn payload_error(&self, e: &crate::protocol::CodecError) -> bool {
        self.send_error(e.error_code(), &e.to_string()).await
    }
}

/// Build a state-snapshot frame from the cached snapshot.
fn snapshot_frame(wire_id: i32, snapshot: &TerminalStateSnapshot) -> Frame {
    let payload = payload::StateSnapshot {
        cols: snapshot.cols,
        rows: snapshot.rows,
        cursor_x: snapshot.cursor_x,
        cursor_y: snapshot.cursor_y,
        cursor_visible: snapshot.cursor_visible,
        screen: Bytes::from(snapshot.screen.clone()),
        scrollback_offset: snapshot.scrollback_offset,
        scrollback_total: snapshot.scrollback_total,
        fg_color: snapshot.fg_color,
        bg_color: snapshot.bg_color,
        attributes: snapshot.attributes,
        sequence: snapshot.sequence,
    };
    Frame::session(wire_id, FrameType::StateSnapshot, payload.encode())
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
