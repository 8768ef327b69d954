// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session records and the per-session output reader task.
//!
//! A [`ManagedSession`] exclusively owns its PTY process and ring buffer.
//! The registry is the single owner of `ManagedSession`s; connections and
//! the reconnection manager hold the session id and look records up.

pub mod registry;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pty::backend::BackendKind;
use crate::pty::spawn::PtyProcess;
use crate::pty::{ExitStatus, ProcessState};
use crate::ring::{now_ms, OutputRing};

/// Session lifecycle. Transitions are monotonic except the
/// ACTIVE/DETACHED pair, which flips on disconnect and reattach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Starting,
    Active,
    Detached,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Active => "ACTIVE",
            Self::Detached => "DETACHED",
            Self::Terminated => "TERMINATED",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Active)
                | (Self::Starting, Self::Terminated)
                | (Self::Active, Self::Detached)
                | (Self::Active, Self::Terminated)
                | (Self::Detached, Self::Active)
                | (Self::Detached, Self::Terminated)
        )
    }
}

/// Events fanned out to attached connections.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A ring-buffered output chunk, already sequence-stamped.
    Output { sequence: u64, timestamp_ms: u64, data: Bytes },
    /// The process exited; the session is terminal.
    Exited { status: ExitStatus },
    /// The terminal was resized (echoed to observers).
    Resized { cols: u16, rows: u16 },
}

/// Snapshot of a session for persistence and list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub id: String,
    pub state: SessionState,
    pub connection_id: String,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
    pub cols: u16,
    pub rows: u16,
}

/// A live session: the process, its output ring, and attachment state.
pub struct ManagedSession {
    pub id: String,
    /// Numeric channel id used in data-frame headers.
    pub wire_id: i32,
    pub kind: BackendKind,
    pub created_at_ms: u64,
    pub process: Arc<PtyProcess>,
    pub ring: Mutex<OutputRing>,
    /// Output/exit fan-out to attached connections.
    pub events: broadcast::Sender<SessionEvent>,
    connection_id: Mutex<String>,
    state: Mutex<SessionState>,
    last_activity_ms: AtomicU64,
    /// Epoch ms of the ACTIVE -> DETACHED transition; 0 while attached.
    detached_at_ms: AtomicU64,
    attached_clients: Mutex<HashSet<String>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ManagedSession {
    pub fn new(
        id: String,
        wire_id: i32,
        kind: BackendKind,
        connection_id: String,
        process: Arc<PtyProcess>,
        ring: OutputRing,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            id,
            wire_id,
            kind,
            created_at_ms: now_ms(),
            process,
            ring: Mutex::new(ring),
            events,
            connection_id: Mutex::new(connection_id),
            state: Mutex::new(SessionState::Starting),
            last_activity_ms: AtomicU64::new(now_ms()),
            detached_at_ms: AtomicU64::new(0),
            attached_clients: Mutex::new(HashSet::new()),
            reader: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Apply a validated state transition. Terminated is absorbing.
    pub fn transition(&self, next: SessionState) -> Result<(), SessionState> {
        let mut state = lock(&self.state);
        if !state.can_transition_to(next) {
            return Err(*state);
        }
        debug!(session = %self.id, from = state.as_str(), to = next.as_str(), "session transition");
        if next == SessionState::Detached {
            self.detached_at_ms.store(now_ms(), Ordering::Relaxed);
        } else {
            self.detached_at_ms.store(0, Ordering::Relaxed);
        }
        *state = next;
        Ok(())
    }

    pub fn connection_id(&self) -> String {
        lock(&self.connection_id).clone()
    }

    pub fn set_connection_id(&self, connection_id: &str) {
        *lock(&self.connection_id) = connection_id.to_owned();
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    /// Epoch ms when the session detached, or `None` while attached.
    pub fn detached_at_ms(&self) -> Option<u64> {
        match self.detached_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn attach_client(&self, client_id: &str) {
        lock(&self.attached_clients).insert(client_id.to_owned());
        self.touch();
    }

    pub fn detach_client(&self, client_id: &str) -> usize {
        let mut clients = lock(&self.attached_clients);
        clients.remove(client_id);
        clients.len()
    }

    pub fn attached_client_count(&self) -> usize {
        lock(&self.attached_clients).len()
    }

    pub fn summary(&self) -> PersistedSession {
        let (cols, rows) = self.process.dimensions();
        PersistedSession {
            id: self.id.clone(),
            state: self.state(),
            connection_id: self.connection_id(),
            created_at_ms: self.created_at_ms,
            last_activity_ms: self.last_activity_ms(),
            cols,
            rows,
        }
    }

    /// Start the output reader task: PTY -> ring buffer -> event fan-out.
    ///
    /// Runs until EOF or cancellation. Cancellation still flushes the chunk
    /// being processed before exit; once the process reports TERMINATED the
    /// ring is sealed and further output is dropped.
    pub fn spawn_reader(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            let mut cancelled = false;
            loop {
                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    read = session.process.read_output(&mut buf) => read,
                };
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if session.process.state() == ProcessState::Terminated {
                            break;
                        }
                        // The write below always completes before the next
                        // read or a cancellation check, so a cancelled
                        // reader never drops a chunk it already read.
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        let sequence = {
                            let mut ring = lock(&session.ring);
                            ring.write(&data, false)
                        };
                        session.touch();
                        let _ = session.events.send(SessionEvent::Output {
                            sequence,
                            timestamp_ms: now_ms(),
                            data,
                        });
                    }
                    Err(_) => break,
                }
            }

            if cancelled && session.process.state() != ProcessState::Terminated {
                // Cancelled while the process lives: the termination path
                // owns reaping and state transitions.
                debug!(session = %session.id, "reader cancelled");
                return;
            }

            // Reap on the blocking pool, then mark the session terminal.
            let process = Arc::clone(&session.process);
            let status = tokio::task::spawn_blocking(move || process.reap_blocking())
                .await
                .unwrap_or(ExitStatus { code: None, signal: None });
            session.process.mark_exited(status);
            let _ = session.transition(SessionState::Terminated);
            let _ = session.events.send(SessionEvent::Exited { status });
            debug!(session = %session.id, code = ?status.code, signal = ?status.signal, "reader finished");
        });
        *lock(&self.reader) = Some(handle);
    }

    /// Cancel the reader task (it flushes and exits on its own).
    pub fn cancel_reader(&self) {
        self.cancel.cancel();
    }

    pub fn reader_handle(&self) -> Option<JoinHandle<()>> {
        lock(&self.reader).take()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
