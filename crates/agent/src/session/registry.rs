// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The authoritative session table.
//!
//! Admission (per-connection and global caps), lookup, state transitions,
//! and teardown all go through here. Cap checks and inserts share one
//! critical section so concurrent creates cannot oversubscribe.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{lock, ManagedSession, PersistedSession, SessionState};
use crate::error::ErrorCode;
use crate::pty::backend::TerminalBackend;
use crate::pty::supervisor::PtySupervisor;
use crate::pty::{PtyError, SpawnSpec};
use crate::ring::{now_ms, OutputRing};

/// Admission and retention limits.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_sessions_per_connection: usize,
    pub max_total_sessions: usize,
    /// How long a detached session survives awaiting reconnection.
    pub reconnection_window_ms: u64,
    pub ring_max_bytes: usize,
    pub ring_max_chunks: usize,
    /// Grace budget for process termination.
    pub termination_grace_ms: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions_per_connection: 10,
            max_total_sessions: 100,
            reconnection_window_ms: 5 * 60 * 1000,
            ring_max_bytes: crate::ring::DEFAULT_MAX_SIZE_BYTES,
            ring_max_chunks: crate::ring::DEFAULT_MAX_CHUNKS,
            termination_grace_ms: 5000,
        }
    }
}

/// Registry operation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    ConnectionLimit { limit: usize },
    GlobalLimit { limit: usize },
    NotFound,
    NotDetached,
    WindowExpired,
    InvalidTransition { from: SessionState, to: SessionState },
    Pty(PtyError),
}

impl RegistryError {
    /// Wire error code for `Error` frames.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ConnectionLimit { .. } | Self::GlobalLimit { .. } => ErrorCode::SessionLimit,
            Self::NotFound | Self::WindowExpired => ErrorCode::SessionNotFound,
            Self::NotDetached | Self::InvalidTransition { .. } | Self::Pty(_) => {
                ErrorCode::Internal
            }
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLimit { limit } => {
                write!(f, "connection session limit {limit} reached")
            }
            Self::GlobalLimit { limit } => write!(f, "global session limit {limit} reached"),
            Self::NotFound => f.write_str("session not found"),
            Self::NotDetached => f.write_str("session is not detached"),
            Self::WindowExpired => f.write_str("reconnection window expired"),
            Self::InvalidTransition { from, to } => {
                write!(f, "illegal transition {} -> {}", from.as_str(), to.as_str())
            }
            Self::Pty(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<PtyError> for RegistryError {
    fn from(e: PtyError) -> Self {
        Self::Pty(e)
    }
}

struct Inner {
    sessions: HashMap<String, Arc<ManagedSession>>,
    next_wire_id: i32,
}

/// Exclusive owner of all [`ManagedSession`]s.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    limits: SessionLimits,
    supervisor: Arc<PtySupervisor>,
}

impl SessionRegistry {
    pub fn new(limits: SessionLimits, supervisor: Arc<PtySupervisor>) -> Self {
        Self {
            inner: Mutex::new(Inner { sessions: HashMap::new(), next_wire_id: 1 }),
            limits,
            supervisor,
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Create a session: cap check, spawn, insert, then start the reader.
    ///
    /// Spawning happens inside the critical section; spawn is synchronous
    /// and the alternative (reserve-then-fill) leaks placeholder records on
    /// failure.
    pub fn create_session(
        &self,
        connection_id: &str,
        backend: &dyn TerminalBackend,
        spec: &SpawnSpec,
    ) -> Result<Arc<ManagedSession>, RegistryError> {
        let session = {
            let mut inner = lock(&self.inner);

            let live = |s: &Arc<ManagedSession>| s.state() != SessionState::Terminated;
            let total = inner.sessions.values().filter(|s| live(s)).count();
            if total >= self.limits.max_total_sessions {
                return Err(RegistryError::GlobalLimit { limit: self.limits.max_total_sessions });
            }
            let per_conn = inner
                .sessions
                .values()
                .filter(|s| live(s) && s.connection_id() == connection_id)
                .count();
            if per_conn >= self.limits.max_sessions_per_connection {
                return Err(RegistryError::ConnectionLimit {
                    limit: self.limits.max_sessions_per_connection,
                });
            }

            let process = backend.create_session(spec)?;
            let wire_id = inner.next_wire_id;
            inner.next_wire_id += 1;

            let id = Uuid::new_v4().to_string();
            let ring = OutputRing::new(self.limits.ring_max_bytes, self.limits.ring_max_chunks);
            let session = Arc::new(ManagedSession::new(
                id.clone(),
                wire_id,
                backend.kind(),
                connection_id.to_owned(),
                Arc::clone(&process),
                ring,
            ));
            inner.sessions.insert(id, Arc::clone(&session));
            self.supervisor.register(&session.id, process);
            session
        };

        session.spawn_reader();
        if let Err(state) = session.transition(SessionState::Active) {
            // The process died between spawn and activation.
            debug!(session = %session.id, state = state.as_str(), "activation raced termination");
        }
        info!(session = %session.id, wire_id = session.wire_id, "session created");
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<ManagedSession>> {
        lock(&self.inner).sessions.get(id).cloned()
    }

    pub fn get_by_wire_id(&self, wire_id: i32) -> Option<Arc<ManagedSession>> {
        lock(&self.inner).sessions.values().find(|s| s.wire_id == wire_id).cloned()
    }

    pub fn sessions_for_connection(&self, connection_id: &str) -> Vec<Arc<ManagedSession>> {
        lock(&self.inner)
            .sessions
            .values()
            .filter(|s| s.connection_id() == connection_id)
            .cloned()
            .collect()
    }

    pub fn all_sessions(&self) -> Vec<Arc<ManagedSession>> {
        lock(&self.inner).sessions.values().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.inner)
            .sessions
            .values()
            .filter(|s| s.state() != SessionState::Terminated)
            .count()
    }

    /// Validated state update; illegal backward transitions fail.
    pub fn update_session_state(
        &self,
        id: &str,
        next: SessionState,
    ) -> Result<(), RegistryError> {
        let session = self.get_session(id).ok_or(RegistryError::NotFound)?;
        session
            .transition(next)
            .map_err(|from| RegistryError::InvalidTransition { from, to: next })
    }

    /// Connection dropped: keep the process, flip ACTIVE -> DETACHED.
    pub fn mark_disconnected(&self, id: &str) -> Result<(), RegistryError> {
        let session = self.get_session(id).ok_or(RegistryError::NotFound)?;
        match session.state() {
            SessionState::Detached => Ok(()),
            SessionState::Active => session
                .transition(SessionState::Detached)
                .map_err(|from| RegistryError::InvalidTransition {
                    from,
                    to: SessionState::Detached,
                }),
            state => {
                Err(RegistryError::InvalidTransition { from: state, to: SessionState::Detached })
            }
        }
    }

    /// Reattach a detached session to a new connection.
    pub fn reconnect_session(
        &self,
        id: &str,
        new_connection_id: &str,
    ) -> Result<Arc<ManagedSession>, RegistryError> {
        let session = self.get_session(id).ok_or(RegistryError::NotFound)?;

        if session.state() != SessionState::Detached {
            return Err(RegistryError::NotDetached);
        }
        if let Some(detached_at) = session.detached_at_ms() {
            if now_ms().saturating_sub(detached_at) > self.limits.reconnection_window_ms {
                return Err(RegistryError::WindowExpired);
            }
        }

        session
            .transition(SessionState::Active)
            .map_err(|from| RegistryError::InvalidTransition { from, to: SessionState::Active })?;
        session.set_connection_id(new_connection_id);
        session.touch();
        info!(session = %id, connection = %new_connection_id, "session reconnected");
        Ok(session)
    }

    /// Tear a session down: cancel its reader, terminate the process,
    /// remove the record. Safe to call twice.
    pub async fn terminate_session(&self, id: &str, reason: &str) {
        let session = match { lock(&self.inner).sessions.remove(id) } {
            Some(s) => s,
            None => return,
        };

        info!(session = %id, reason, "terminating session");
        session.cancel_reader();
        let status = session.process.graceful_terminate(self.limits.termination_grace_ms).await;
        let _ = session.transition(SessionState::Terminated);
        let _ = session.events.send(super::SessionEvent::Exited { status });
        self.supervisor.unregister(id);
        if let Some(handle) = session.reader_handle() {
            let _ = handle.await;
        }
    }

    /// Terminate detached sessions whose reconnection window lapsed.
    /// Returns the ids that were torn down.
    pub async fn expire_detached(&self) -> Vec<String> {
        let now = now_ms();
        let expired: Vec<String> = {
            lock(&self.inner)
                .sessions
                .values()
                .filter(|s| {
                    s.state() == SessionState::Detached
                        && s.detached_at_ms()
                            .map(|t| now.saturating_sub(t) > self.limits.reconnection_window_ms)
                            .unwrap_or(false)
                })
                .map(|s| s.id.clone())
                .collect()
        };

        for id in &expired {
            warn!(session = %id, "reconnection window expired");
            self.terminate_session(id, "reconnection window expired").await;
        }
        expired
    }

    /// Terminate everything, used on agent shutdown.
    pub async fn terminate_all(&self, reason: &str) {
        let ids: Vec<String> = lock(&self.inner).sessions.keys().cloned().collect();
        for id in ids {
            self.terminate_session(&id, reason).await;
        }
    }

    /// Enumerate sessions for the persistence snapshot.
    pub fn export_state(&self) -> Vec<PersistedSession> {
        lock(&self.inner).sessions.values().map(|s| s.summary()).collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
