// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnection bookkeeping: who disconnected where, what to replay, and
//! the cached terminal snapshot served on reattach.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::error::ReconnectError;
use crate::ring::{now_ms, OutputChunk};
use crate::session::registry::{RegistryError, SessionRegistry};
use crate::session::ManagedSession;

/// Coarse terminal state cached per session for reattach. The screen bytes
/// are opaque; `sequence` names the output boundary the snapshot reflects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalStateSnapshot {
    pub session_id: String,
    pub cols: u16,
    pub rows: u16,
    pub cursor_x: u16,
    pub cursor_y: u16,
    pub cursor_visible: bool,
    pub screen: Vec<u8>,
    pub scrollback_offset: u32,
    pub scrollback_total: u32,
    pub fg_color: u32,
    pub bg_color: u32,
    pub attributes: u16,
    pub sequence: u64,
}

#[derive(Debug, Clone)]
pub struct ReconnectionConfig {
    /// How long a disconnection record stays reconnectable.
    pub window_ms: u64,
    /// Extra slack before a stale record is garbage-collected.
    pub cleanup_grace_ms: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self { window_ms: 5 * 60 * 1000, cleanup_grace_ms: 60 * 1000 }
    }
}

/// State kept for a client that dropped uncleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectedClient {
    pub client_id: String,
    pub session_id: String,
    /// Last output sequence the client acknowledged before dropping.
    pub last_sequence: u64,
    pub disconnected_at_ms: u64,
}

/// What a successful reattach hands back to the connection handler.
pub struct ReconnectionOutcome {
    pub session: Arc<ManagedSession>,
    /// Chunks to replay, in sequence order. May be empty.
    pub replay: Vec<OutputChunk>,
    /// Sequence replay starts from (0 when nothing was requested).
    pub replay_from: u64,
    /// True when a prefix of the requested range was already evicted.
    pub data_lost: bool,
    pub snapshot: Option<TerminalStateSnapshot>,
}

/// Arbitrates replay on reattach and caches per-session snapshots.
pub struct ReconnectionManager {
    config: ReconnectionConfig,
    registry: Arc<SessionRegistry>,
    records: Mutex<HashMap<(String, String), DisconnectedClient>>,
    snapshots: Mutex<HashMap<String, TerminalStateSnapshot>>,
}

impl ReconnectionManager {
    pub fn new(config: ReconnectionConfig, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config,
            registry,
            records: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Remember where a client was when its connection dropped. Also
    /// garbage-collects records past window + grace.
    pub fn record_disconnection(&self, client_id: &str, session_id: &str, last_sequence: u64) {
        let now = now_ms();
        let mut records = lock(&self.records);

        let horizon = self.config.window_ms + self.config.cleanup_grace_ms;
        records.retain(|_, rec| now.saturating_sub(rec.disconnected_at_ms) <= horizon);

        debug!(client = %client_id, session = %session_id, last_sequence, "recorded disconnection");
        records.insert(
            (client_id.to_owned(), session_id.to_owned()),
            DisconnectedClient {
                client_id: client_id.to_owned(),
                session_id: session_id.to_owned(),
                last_sequence,
                disconnected_at_ms: now,
            },
        );
    }

    pub fn get_record(&self, client_id: &str, session_id: &str) -> Option<DisconnectedClient> {
        lock(&self.records).get(&(client_id.to_owned(), session_id.to_owned())).cloned()
    }

    /// Reattach `client_id` to `session_id` on a new connection.
    ///
    /// Replay starts after the last sequence the client saw: the explicit
    /// `client_last_seq` wins over the stored record. `data_lost` is set
    /// when the ring no longer holds that boundary.
    pub fn attempt_reconnection(
        &self,
        client_id: &str,
        session_id: &str,
        new_connection_id: &str,
        client_last_seq: Option<u64>,
    ) -> Result<ReconnectionOutcome, ReconnectError> {
        let key = (client_id.to_owned(), session_id.to_owned());
        let stored = lock(&self.records).get(&key).cloned();

        if let Some(rec) = &stored {
            if now_ms().saturating_sub(rec.disconnected_at_ms) > self.config.window_ms {
                lock(&self.records).remove(&key);
                return Err(ReconnectError::WindowExpired);
            }
        }

        let replay_from = client_last_seq.or(stored.as_ref().map(|r| r.last_sequence));

        let session = match self.registry.reconnect_session(session_id, new_connection_id) {
            Ok(session) => session,
            // A live session another client still holds can be observed
            // without a state flip.
            Err(RegistryError::NotDetached) => self
                .registry
                .get_session(session_id)
                .ok_or(ReconnectError::SessionNotFound)?,
            Err(RegistryError::NotFound) => return Err(ReconnectError::SessionNotFound),
            Err(RegistryError::WindowExpired) => return Err(ReconnectError::WindowExpired),
            Err(e) => return Err(ReconnectError::RegistrationFailed(e.to_string())),
        };

        let (replay, data_lost) = match replay_from {
            Some(last_seen) => {
                let ring = crate::session::lock(&session.ring);
                let read = ring.read_from(last_seen + 1);
                (read.chunks, read.data_lost)
            }
            None => (Vec::new(), false),
        };

        session.attach_client(client_id);
        lock(&self.records).remove(&key);

        let snapshot = self.get_state_snapshot(session_id);
        info!(
            client = %client_id,
            session = %session_id,
            replay_chunks = replay.len(),
            data_lost,
            "client reattached"
        );
        Ok(ReconnectionOutcome {
            session,
            replay,
            replay_from: replay_from.map(|s| s + 1).unwrap_or(0),
            data_lost,
            snapshot,
        })
    }

    pub fn update_state_snapshot(&self, snapshot: TerminalStateSnapshot) {
        lock(&self.snapshots).insert(snapshot.session_id.clone(), snapshot);
    }

    pub fn get_state_snapshot(&self, session_id: &str) -> Option<TerminalStateSnapshot> {
        lock(&self.snapshots).get(session_id).cloned()
    }

    /// Drop all state for a session that terminated.
    pub fn clear_session_state(&self, session_id: &str) {
        lock(&self.snapshots).remove(session_id);
        lock(&self.records).retain(|_, rec| rec.session_id != session_id);
    }

    pub fn pending_record_count(&self) -> usize {
        lock(&self.records).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
#[path = "reconnect_tests.rs"]
mod tests;
