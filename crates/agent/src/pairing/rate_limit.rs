// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-device pairing rate limiter: sliding attempt window, exponential
//! backoff on failures, hard lockout past the failure threshold.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::warn;

use crate::ring::now_ms;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_attempts_per_window: u32,
    pub window_ms: u64,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub lockout_threshold: u32,
    pub lockout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_window: 5,
            window_ms: 60_000,
            base_backoff_secs: 5,
            max_backoff_secs: 300,
            lockout_threshold: 10,
            lockout_ms: 3_600_000,
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

#[derive(Debug, Default)]
struct DeviceAttempts {
    /// Attempt timestamps inside the sliding window, epoch ms.
    attempts: Vec<u64>,
    consecutive_failures: u32,
    backoff_until_ms: u64,
    lockout_until_ms: u64,
}

/// Tracks pairing attempts per device id.
pub struct PairingRateLimiter {
    config: RateLimitConfig,
    devices: Mutex<HashMap<String, DeviceAttempts>>,
}

impl PairingRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, devices: Mutex::new(HashMap::new()) }
    }

    /// Check whether a pairing attempt from `device_id` may proceed, and
    /// record it when allowed.
    pub fn check_and_record(&self, device_id: &str) -> RateLimitDecision {
        let now = now_ms();
        let mut devices = self.lock();
        let entry = devices.entry(device_id.to_owned()).or_default();

        if entry.lockout_until_ms > now {
            let retry = (entry.lockout_until_ms - now).div_ceil(1000);
            warn!(device = %device_id, retry_after_secs = retry, "pairing locked out");
            return RateLimitDecision::Limited { retry_after_secs: retry };
        }

        if entry.backoff_until_ms > now {
            let retry = (entry.backoff_until_ms - now).div_ceil(1000);
            return RateLimitDecision::Limited { retry_after_secs: retry };
        }

        entry.attempts.retain(|t| now.saturating_sub(*t) <= self.config.window_ms);
        if entry.attempts.len() as u32 >= self.config.max_attempts_per_window {
            let oldest = entry.attempts.first().copied().unwrap_or(now);
            let retry =
                (oldest + self.config.window_ms).saturating_sub(now).div_ceil(1000).max(1);
            return RateLimitDecision::Limited { retry_after_secs: retry };
        }

        entry.attempts.push(now);
        RateLimitDecision::Allowed
    }

    /// Record a failed attempt: exponential backoff, then lockout past the
    /// threshold.
    pub fn record_failure(&self, device_id: &str) {
        let now = now_ms();
        let mut devices = self.lock();
        let entry = devices.entry(device_id.to_owned()).or_default();

        entry.consecutive_failures += 1;

        if entry.consecutive_failures >= self.config.lockout_threshold {
            entry.lockout_until_ms = now + self.config.lockout_ms;
            warn!(device = %device_id, failures = entry.consecutive_failures, "pairing lockout engaged");
            return;
        }

        let backoff_secs = self.backoff_secs(entry.consecutive_failures);
        entry.backoff_until_ms = now + backoff_secs * 1000;
    }

    /// Successful pairing clears every restriction for the device.
    pub fn record_success(&self, device_id: &str) {
        self.lock().remove(device_id);
    }

    /// Backoff for the n-th consecutive failure: base * 2^(n-1), capped.
    pub fn backoff_secs(&self, failures: u32) -> u64 {
        let exp = failures.saturating_sub(1).min(32);
        let uncapped = self.config.base_backoff_secs.saturating_mul(1u64 << exp);
        uncapped.min(self.config.max_backoff_secs)
    }

    pub fn consecutive_failures(&self, device_id: &str) -> u32 {
        self.lock().get(device_id).map(|e| e.consecutive_failures).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DeviceAttempts>> {
        match self.devices.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
