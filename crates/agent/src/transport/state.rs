// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared agent state handed to every connection handler via the axum
//! `State` extractor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::pairing::PairingCoordinator;
use crate::pty::backend::BackendRegistry;
use crate::pty::supervisor::PtySupervisor;
use crate::reconnect::ReconnectionManager;
use crate::session::registry::SessionRegistry;
use crate::transport::auth::{AuthGuard, AuthMethod};

/// Capabilities this agent can grant during the capability exchange.
pub const SERVER_CAPABILITIES: &[&str] =
    &["pty", "reconnect", "state-sync", "scrollback-replay", "flow-control"];

/// Everything a connection needs, organized by concern. Process-wide
/// holders (backend registry, device store, advertiser) live here rather
/// than as ambient singletons.
pub struct AgentContext {
    pub config: Config,
    pub auth_method: AuthMethod,
    pub registry: Arc<SessionRegistry>,
    pub supervisor: Arc<PtySupervisor>,
    pub reconnect: Arc<ReconnectionManager>,
    pub pairing: Arc<PairingCoordinator>,
    pub backends: Arc<BackendRegistry>,
    pub auth_guard: AuthGuard,
    pub shutdown: CancellationToken,
    connection_count: AtomicUsize,
    started: Instant,
}

impl AgentContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        auth_method: AuthMethod,
        registry: Arc<SessionRegistry>,
        supervisor: Arc<PtySupervisor>,
        reconnect: Arc<ReconnectionManager>,
        pairing: Arc<PairingCoordinator>,
        backends: Arc<BackendRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        let auth_guard = AuthGuard::new(
            config.max_auth_failures,
            config.auth_lockout_minutes * 60 * 1000,
        );
        Self {
            config,
            auth_method,
            registry,
            supervisor,
            reconnect,
            pairing,
            backends,
            auth_guard,
            shutdown,
            connection_count: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn connection_opened(&self) -> usize {
        self.connection_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_closed(&self) {
        self.connection_count.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}
