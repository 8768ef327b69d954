// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use crate::compress::CompressionPolicy;
use crate::pairing::rate_limit::RateLimitConfig;
use crate::pty::policy::{EnvLimits, EnvPolicy};
use crate::pty::supervisor::SupervisorConfig;
use crate::reconnect::ReconnectionConfig;
use crate::session::registry::SessionLimits;
use crate::transport::auth::AuthMethod;

/// LAN terminal agent: PTY sessions over a framed multiplexed protocol.
#[derive(Debug, Clone, Parser)]
#[command(name = "terminox-agent", version, about)]
pub struct Config {
    /// Port to listen on.
    #[arg(long, env = "TERMINOX_PORT", default_value = "7320")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "TERMINOX_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Authentication method (none, token, certificate).
    #[arg(long, env = "TERMINOX_AUTH", default_value = "none")]
    pub auth: String,

    /// Bearer token for token authentication.
    #[arg(long, env = "TERMINOX_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Auth failures tolerated before a client is locked out.
    #[arg(long, env = "TERMINOX_MAX_AUTH_FAILURES", default_value = "5")]
    pub max_auth_failures: u32,

    /// Auth lockout duration in minutes.
    #[arg(long, env = "TERMINOX_AUTH_LOCKOUT_MINUTES", default_value = "15")]
    pub auth_lockout_minutes: u64,

    /// Shells clients may request (comma separated). Empty allows any
    /// shell that passes validation.
    #[arg(long, env = "TERMINOX_ALLOWED_SHELLS", value_delimiter = ',')]
    pub allowed_shells: Vec<PathBuf>,

    /// Roots session working directories must live under. Empty allows
    /// any existing directory.
    #[arg(long, env = "TERMINOX_ALLOWED_WORKING_DIRS", value_delimiter = ',')]
    pub allowed_working_dirs: Vec<PathBuf>,

    /// Copy only these variables into child environments (whitelist mode).
    #[arg(long, env = "TERMINOX_ENV_WHITELIST", value_delimiter = ',')]
    pub env_whitelist: Vec<String>,

    /// Extra variables to strip in blacklist mode.
    #[arg(long, env = "TERMINOX_ENV_BLACKLIST", value_delimiter = ',')]
    pub env_blacklist: Vec<String>,

    /// Global session cap.
    #[arg(long, env = "TERMINOX_MAX_SESSIONS", default_value = "100")]
    pub max_sessions: usize,

    /// Per-connection session cap.
    #[arg(long, env = "TERMINOX_MAX_SESSIONS_PER_CONNECTION", default_value = "10")]
    pub max_sessions_per_connection: usize,

    /// Output ring buffer size per session, in bytes.
    #[arg(long, env = "TERMINOX_RING_SIZE", default_value = "1048576")]
    pub ring_size: usize,

    /// Output ring buffer chunk cap per session.
    #[arg(long, env = "TERMINOX_RING_CHUNKS", default_value = "10000")]
    pub ring_chunks: usize,

    /// Reconnection window in seconds.
    #[arg(long, env = "TERMINOX_RECONNECT_WINDOW_SECS", default_value = "300")]
    pub reconnect_window_secs: u64,

    /// Grace period for process termination, in seconds.
    #[arg(long, env = "TERMINOX_GRACE_SECS", default_value = "5")]
    pub grace_secs: u64,

    /// Skip SIGTERM and kill immediately on termination.
    #[arg(long, env = "TERMINOX_NO_GRACEFUL_TERMINATION")]
    pub no_graceful_termination: bool,

    /// Maximum session wall-clock runtime in seconds (0 = unlimited).
    #[arg(long, env = "TERMINOX_MAX_SESSION_DURATION_SECS", default_value = "0")]
    pub max_session_duration_secs: u64,

    /// Idle threshold in seconds for the advisory idle event (0 = off).
    #[arg(long, env = "TERMINOX_IDLE_TIMEOUT_SECS", default_value = "0")]
    pub idle_timeout_secs: u64,

    /// Heartbeat period in seconds.
    #[arg(long, env = "TERMINOX_HEARTBEAT_SECS", default_value = "30")]
    pub heartbeat_secs: u64,

    /// Disable adaptive output compression.
    #[arg(long, env = "TERMINOX_NO_COMPRESSION")]
    pub no_compression: bool,

    /// Smallest payload considered for compression, in bytes.
    #[arg(long, env = "TERMINOX_COMPRESSION_MIN_SIZE", default_value = "256")]
    pub compression_min_size: usize,

    /// Paired-device store path. Defaults to
    /// `$HOME/.terminox/paired_devices.json`.
    #[arg(long, env = "TERMINOX_DEVICE_STORE")]
    pub device_store: Option<PathBuf>,

    /// Session persistence snapshot path (unset = no persistence).
    #[arg(long, env = "TERMINOX_PERSIST_PATH")]
    pub persist_path: Option<PathBuf>,

    /// Disable mDNS advertisement.
    #[arg(long, env = "TERMINOX_NO_MDNS")]
    pub no_mdns: bool,

    /// Advertised instance name. Defaults to the hostname.
    #[arg(long, env = "TERMINOX_INSTANCE_NAME")]
    pub instance_name: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "TERMINOX_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TERMINOX_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let method = self.auth_method()?;
        if method == AuthMethod::Token {
            match &self.auth_token {
                Some(token) if !token.is_empty() => {
                    if token.len() > crate::transport::auth::MAX_TOKEN_LEN {
                        anyhow::bail!("--auth-token exceeds {} bytes", crate::transport::auth::MAX_TOKEN_LEN);
                    }
                }
                _ => anyhow::bail!("--auth token requires --auth-token"),
            }
        }
        if self.max_sessions == 0 || self.max_sessions_per_connection == 0 {
            anyhow::bail!("session caps must be at least 1");
        }
        if self.ring_size == 0 || self.ring_chunks == 0 {
            anyhow::bail!("ring buffer caps must be at least 1");
        }
        Ok(())
    }

    pub fn auth_method(&self) -> anyhow::Result<AuthMethod> {
        AuthMethod::parse(&self.auth)
            .ok_or_else(|| anyhow::anyhow!("invalid auth method: {}", self.auth))
    }

    pub fn graceful_termination_enabled(&self) -> bool {
        !self.no_graceful_termination
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_sessions_per_connection: self.max_sessions_per_connection,
            max_total_sessions: self.max_sessions,
            reconnection_window_ms: self.reconnect_window_secs * 1000,
            ring_max_bytes: self.ring_size,
            ring_max_chunks: self.ring_chunks,
            termination_grace_ms: self.grace_secs * 1000,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_session_duration_ms: self.max_session_duration_secs * 1000,
            idle_timeout_ms: self.idle_timeout_secs * 1000,
            termination_grace_ms: self.grace_secs * 1000,
            ..SupervisorConfig::default()
        }
    }

    pub fn reconnection_config(&self) -> ReconnectionConfig {
        ReconnectionConfig {
            window_ms: self.reconnect_window_secs * 1000,
            ..ReconnectionConfig::default()
        }
    }

    pub fn env_policy(&self) -> EnvPolicy {
        EnvPolicy {
            whitelist: self.env_whitelist.clone(),
            blacklist: self.env_blacklist.clone(),
            limits: EnvLimits::default(),
        }
    }

    pub fn compression_policy(&self) -> CompressionPolicy {
        CompressionPolicy {
            enabled: !self.no_compression,
            min_size: self.compression_min_size,
            ..CompressionPolicy::default()
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::default()
    }

    pub fn device_store_path(&self) -> PathBuf {
        self.device_store
            .clone()
            .unwrap_or_else(crate::pairing::store::default_store_path)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
