// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level agent runner: wire the subsystems together, serve until a
//! shutdown signal, then tear everything down in order.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::pairing::store::DeviceStore;
use crate::pairing::PairingCoordinator;
use crate::persist;
use crate::pty::backend::{BackendKind, BackendRegistry, PtyBackend};
use crate::pty::supervisor::PtySupervisor;
use crate::reconnect::ReconnectionManager;
use crate::session::registry::SessionRegistry;
use crate::transport;
use crate::transport::auth::AuthMethod;
use crate::transport::state::AgentContext;

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / TERMINOX_LOG_LEVEL > RUST_LOG > "info".
    let filter = if std::env::var("TERMINOX_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// A fully-wired agent, ready to serve.
pub struct PreparedAgent {
    pub ctx: Arc<AgentContext>,
    listener: TcpListener,
    shutdown: CancellationToken,
}

/// Build every subsystem and bind the listener. Failure here is the only
/// process-fatal path.
pub async fn prepare(config: Config) -> anyhow::Result<PreparedAgent> {
    init_tracing(&config);
    config.validate()?;

    let auth_method = config.auth_method()?;
    if auth_method == AuthMethod::None {
        warn!("authentication is disabled; all operations are allowed");
    }

    let shutdown = CancellationToken::new();

    // PTY plane: supervisor, native backend, backend registry.
    let supervisor = Arc::new(PtySupervisor::new(config.supervisor_config()));
    let backend = PtyBackend::new(
        config.env_policy(),
        config.allowed_shells.clone(),
        config.allowed_working_dirs.clone(),
        config.graceful_termination_enabled(),
        Arc::clone(&supervisor),
    );
    let mut backends =
        BackendRegistry::new(vec![BackendKind::Pty, BackendKind::Tmux, BackendKind::Screen]);
    backends.register(Arc::new(backend));
    backends.initialize_all()?;
    let backends = Arc::new(backends);

    // Session plane.
    let registry =
        Arc::new(SessionRegistry::new(config.session_limits(), Arc::clone(&supervisor)));
    let reconnect = Arc::new(ReconnectionManager::new(
        config.reconnection_config(),
        Arc::clone(&registry),
    ));

    // Pairing plane.
    let store = Arc::new(DeviceStore::open(config.device_store_path())?);
    info!(devices = store.trusted_count(), "device store loaded");
    let pairing = Arc::new(PairingCoordinator::new(store, config.rate_limit_config()));

    // Previous-run snapshot, for operator visibility only.
    if let Some(path) = &config.persist_path {
        let restored = persist::load(path);
        if !restored.is_empty() {
            info!(count = restored.len(), "previous session snapshot found (processes not restored)");
        }
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    let ctx = Arc::new(AgentContext::new(
        config,
        auth_method,
        registry,
        supervisor,
        reconnect,
        pairing,
        backends,
        shutdown.clone(),
    ));

    Ok(PreparedAgent { ctx, listener, shutdown })
}

impl PreparedAgent {
    pub fn local_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until SIGINT/SIGTERM, then shut down cleanly.
    pub async fn run(self) -> anyhow::Result<()> {
        let PreparedAgent { ctx, listener, shutdown } = self;

        // Background maintenance: process sweep, window expiry, pairing
        // session expiry.
        let supervisor_task =
            tokio::spawn(Arc::clone(&ctx.supervisor).run(shutdown.clone()));
        let maintenance_task = tokio::spawn(maintenance_loop(Arc::clone(&ctx), shutdown.clone()));

        // mDNS advertisement is best-effort; a failure is logged and the
        // agent serves without it.
        let advertiser = if ctx.config.no_mdns {
            None
        } else {
            match crate::discovery::MdnsAdvertiser::start(&ctx.config, &ctx.backends.kinds()) {
                Ok(adv) => Some(adv),
                Err(e) => {
                    warn!("mdns advertisement failed: {e}");
                    None
                }
            }
        };

        // Cancel on SIGINT/SIGTERM.
        let signal_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let sigterm = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                    }
                    Err(e) => warn!("sigterm handler failed: {e}"),
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm => {}
            }
            info!("shutdown signal received");
            signal_shutdown.cancel();
        });

        let serve_result =
            transport::serve(listener, Arc::clone(&ctx), shutdown.clone()).await;
        shutdown.cancel();

        // Teardown order: snapshot first (sessions still present), then
        // terminate processes, then the rest.
        if let Some(path) = &ctx.config.persist_path {
            persist::save(path, ctx.registry.export_state());
        }
        ctx.registry.terminate_all("agent shutdown").await;
        ctx.supervisor.terminate_all(ctx.config.grace_secs * 1000).await;
        ctx.backends.shutdown_all();
        if let Some(adv) = advertiser {
            adv.shutdown();
        }
        maintenance_task.abort();
        supervisor_task.abort();

        info!("agent stopped");
        serve_result
    }
}

/// Periodic registry and pairing maintenance.
async fn maintenance_loop(ctx: Arc<AgentContext>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let expired = ctx.registry.expire_detached().await;
                for id in &expired {
                    ctx.reconnect.clear_session_state(id);
                }
                ctx.pairing.sweep();
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Run the agent to completion.
pub async fn run(config: Config) -> anyhow::Result<()> {
    prepare(config).await?.run().await
}
