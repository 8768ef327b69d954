// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LAN service advertisement over mDNS.
//!
//! Advertises `_terminox._tcp.local.` with a TXT payload describing the
//! agent's capabilities and auth posture. Per-interface registration
//! failures are handled inside the daemon; losing one interface never
//! takes the advertisement down.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{info, warn};

use crate::config::Config;
use crate::pty::backend::BackendKind;

pub const SERVICE_TYPE: &str = "_terminox._tcp.local.";

/// Build the TXT key/value payload for the advertisement.
pub fn build_txt(
    config: &Config,
    backends: &[BackendKind],
    session_count: usize,
) -> Vec<(String, String)> {
    let mut caps: Vec<&str> = backends.iter().map(|b| b.as_str()).collect();
    caps.push("reconnect");
    if config.persist_path.is_some() {
        caps.push("persist");
    }
    caps.push("multiplex");

    vec![
        ("version".to_owned(), env!("CARGO_PKG_VERSION").to_owned()),
        ("caps".to_owned(), caps.join(",")),
        ("auth".to_owned(), config.auth.to_ascii_lowercase()),
        ("tls".to_owned(), "false".to_owned()),
        ("mtls".to_owned(), (config.auth.to_ascii_lowercase() == "certificate").to_string()),
        ("platform".to_owned(), std::env::consts::OS.to_owned()),
        ("sessions".to_owned(), session_count.to_string()),
        ("protocol".to_owned(), "websocket".to_owned()),
    ]
}

/// Running advertisement handle. Dropping it leaves the daemon running;
/// call [`MdnsAdvertiser::shutdown`] for a clean unregister.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl MdnsAdvertiser {
    /// Register the service on all usable interfaces.
    pub fn start(config: &Config, backends: &[BackendKind]) -> anyhow::Result<Self> {
        let instance = match &config.instance_name {
            Some(name) => name.clone(),
            None => hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "terminox-agent".to_owned()),
        };
        let host = format!("{instance}.local.");

        let txt = build_txt(config, backends, 0);
        let daemon = ServiceDaemon::new()?;
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &instance,
            &host,
            "",
            config.port,
            &txt.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect::<Vec<_>>()[..],
        )?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_owned();
        daemon.register(service)?;
        info!(service = %fullname, port = config.port, "mdns advertisement started");
        Ok(Self { daemon, fullname })
    }

    /// Unregister and stop the daemon.
    pub fn shutdown(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("mdns unregister failed: {e}");
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!("mdns daemon shutdown failed: {e}");
        }
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
