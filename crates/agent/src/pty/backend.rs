// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal backend abstraction.
//!
//! PTY, tmux, and screen expose the same capability set; the core only
//! knows the trait and a registry keyed by backend kind. Preference
//! ordering is the one place backend identity matters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::policy::EnvPolicy;
use super::spawn::PtyProcess;
use super::supervisor::PtySupervisor;
use super::{PtyError, SpawnSpec};

/// Budget for commands run against an external multiplexer binary
/// (`tmux list-sessions` and friends). Adapters must not block past it.
pub const EXTERNAL_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Known backend kinds. Only the native PTY backend ships in-core; the
/// multiplexer adapters register from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Pty,
    Tmux,
    Screen,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pty => "pty",
            Self::Tmux => "tmux",
            Self::Screen => "screen",
        }
    }
}

/// Capability set shared by every terminal backend.
pub trait TerminalBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// One-time startup (probe the multiplexer binary, verify the
    /// environment). Native PTY has nothing to do.
    fn initialize(&self) -> anyhow::Result<()>;

    fn create_session(&self, spec: &SpawnSpec) -> Result<Arc<PtyProcess>, PtyError>;

    /// Reattach to a backend-managed session. Native PTYs hand back the
    /// live process; multiplexers respawn a client.
    fn attach_session(&self, session_id: &str) -> Result<Arc<PtyProcess>, PtyError>;

    fn list_sessions(&self) -> Vec<String>;

    fn session_exists(&self, session_id: &str) -> bool;

    fn shutdown(&self) -> anyhow::Result<()>;
}

/// Native PTY backend: spawn policy plus the shared process table.
pub struct PtyBackend {
    env_policy: EnvPolicy,
    allowed_shells: Vec<PathBuf>,
    allowed_working_dirs: Vec<PathBuf>,
    graceful_enabled: bool,
    supervisor: Arc<PtySupervisor>,
}

impl PtyBackend {
    pub fn new(
        env_policy: EnvPolicy,
        allowed_shells: Vec<PathBuf>,
        allowed_working_dirs: Vec<PathBuf>,
        graceful_enabled: bool,
        supervisor: Arc<PtySupervisor>,
    ) -> Self {
        Self {
            env_policy,
            allowed_shells,
            allowed_working_dirs,
            graceful_enabled,
            supervisor,
        }
    }
}

impl TerminalBackend for PtyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Pty
    }

    fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn create_session(&self, spec: &SpawnSpec) -> Result<Arc<PtyProcess>, PtyError> {
        let process = PtyProcess::spawn(
            spec,
            &self.env_policy,
            &self.allowed_shells,
            &self.allowed_working_dirs,
            self.graceful_enabled,
        )?;
        Ok(Arc::new(process))
    }

    fn attach_session(&self, session_id: &str) -> Result<Arc<PtyProcess>, PtyError> {
        self.supervisor.get(session_id).ok_or(PtyError::ProcessNotRunning)
    }

    fn list_sessions(&self) -> Vec<String> {
        self.supervisor.session_ids()
    }

    fn session_exists(&self, session_id: &str) -> bool {
        self.supervisor.get(session_id).is_some()
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Registry of available backends with a preference order.
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn TerminalBackend>>,
    preference: Vec<BackendKind>,
}

impl BackendRegistry {
    pub fn new(preference: Vec<BackendKind>) -> Self {
        Self { backends: HashMap::new(), preference }
    }

    pub fn register(&mut self, backend: Arc<dyn TerminalBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn TerminalBackend>> {
        self.backends.get(&kind).cloned()
    }

    /// First available backend in preference order.
    pub fn preferred(&self) -> Option<Arc<dyn TerminalBackend>> {
        self.preference.iter().find_map(|kind| self.backends.get(kind).cloned())
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.preference.iter().copied().filter(|k| self.backends.contains_key(k)).collect()
    }

    pub fn initialize_all(&self) -> anyhow::Result<()> {
        for backend in self.backends.values() {
            backend.initialize()?;
        }
        Ok(())
    }

    pub fn shutdown_all(&self) {
        for backend in self.backends.values() {
            if let Err(e) = backend.shutdown() {
                tracing::warn!(backend = backend.kind().as_str(), "backend shutdown failed: {e}");
            }
        }
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
