// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: context builders and assertion helpers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::pairing::store::DeviceStore;
use crate::pairing::PairingCoordinator;
use crate::pty::backend::{BackendKind, BackendRegistry, PtyBackend};
use crate::pty::supervisor::{PtySupervisor, SupervisorConfig};
use crate::reconnect::ReconnectionManager;
use crate::session::registry::{SessionLimits, SessionRegistry};
use crate::transport::auth::AuthMethod;
use crate::transport::state::AgentContext;

/// Convert foreign errors (without `std::error::Error`) into anyhow, so
/// tests can stay on `?`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Debug> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e:?}"))
    }
}

/// Test-only handle bundling the context with the tempdir backing its
/// device store.
pub struct ContextCtx {
    pub ctx: Arc<AgentContext>,
    pub _dir: tempfile::TempDir,
}

/// Builder for an [`AgentContext`] with test defaults.
pub struct ContextBuilder {
    auth: AuthMethod,
    token: Option<String>,
    max_sessions_per_connection: usize,
    max_sessions: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            auth: AuthMethod::None,
            token: None,
            max_sessions_per_connection: 10,
            max_sessions: 100,
        }
    }

    pub fn with_token_auth(mut self, token: &str) -> Self {
        self.auth = AuthMethod::Token;
        self.token = Some(token.to_owned());
        self
    }

    pub fn with_session_caps(mut self, per_connection: usize, total: usize) -> Self {
        self.max_sessions_per_connection = per_connection;
        self.max_sessions = total;
        self
    }

    pub fn build(self) -> anyhow::Result<ContextCtx> {
        use clap::Parser;

        let dir = tempfile::tempdir()?;
        let mut config = Config::try_parse_from(["terminox-agent"])?;
        config.auth = self.auth.as_str().to_owned();
        config.auth_token = self.token;
        config.max_sessions_per_connection = self.max_sessions_per_connection;
        config.max_sessions = self.max_sessions;
        config.grace_secs = 0;
        config.device_store = Some(dir.path().join("paired_devices.json"));

        let supervisor = Arc::new(PtySupervisor::new(SupervisorConfig::default()));
        let backend = PtyBackend::new(
            config.env_policy(),
            Vec::new(),
            Vec::new(),
            true,
            Arc::clone(&supervisor),
        );
        let mut backends = BackendRegistry::new(vec![BackendKind::Pty]);
        backends.register(Arc::new(backend));

        let limits = SessionLimits {
            max_sessions_per_connection: self.max_sessions_per_connection,
            max_total_sessions: self.max_sessions,
            termination_grace_ms: 0,
            ..SessionLimits::default()
        };
        let registry = Arc::new(SessionRegistry::new(limits, Arc::clone(&supervisor)));
        let reconnect = Arc::new(ReconnectionManager::new(
            config.reconnection_config(),
            Arc::clone(&registry),
        ));
        let store = Arc::new(DeviceStore::open(config.device_store_path())?);
        let pairing = Arc::new(PairingCoordinator::new(store, config.rate_limit_config()));

        let auth_method = self.auth;
        let ctx = Arc::new(AgentContext::new(
            config,
            auth_method,
            registry,
            supervisor,
            reconnect,
            pairing,
            Arc::new(backends),
            CancellationToken::new(),
        ));
        Ok(ContextCtx { ctx, _dir: dir })
    }
}
