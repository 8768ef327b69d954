// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! First-time device pairing: ECDH key exchange with a human-verified
//! short code, rate limiting, and the persisted trusted-device set.

pub mod crypto;
pub mod rate_limit;
pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};
use uuid::Uuid;

use crate::ring::now_ms;
use crypto::AgentKeyPair;
use rate_limit::{PairingRateLimiter, RateLimitConfig, RateLimitDecision};
use store::{DeviceStatus, DeviceStore, PairedDevice};

/// Default pairing session lifetime.
pub const DEFAULT_PAIRING_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Pairing failure taxonomy with stable wire codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    SessionExpired,
    InvalidState,
    RateLimited { retry_after_secs: u64 },
    UserRejected,
    VerificationFailed,
    InvalidKey,
    AlreadyPaired,
    DeviceNotFound,
    DeviceRevoked,
    CryptoError(String),
    Internal(String),
}

impl PairingError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::InvalidState => "INVALID_STATE",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::UserRejected => "USER_REJECTED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::InvalidKey => "INVALID_KEY",
            Self::AlreadyPaired => "ALREADY_PAIRED",
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::DeviceRevoked => "DEVICE_REVOKED",
            Self::CryptoError(_) => "CRYPTO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for PairingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { retry_after_secs } => {
                write!(f, "{}: retry after {retry_after_secs}s", self.as_str())
            }
            Self::CryptoError(detail) | Self::Internal(detail) => {
                write!(f, "{}: {detail}", self.as_str())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

impl std::error::Error for PairingError {}

/// Pairing session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    AwaitingMobileKey,
    AwaitingVerification,
    Completed,
    Cancelled,
    Expired,
}

impl PairingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingMobileKey => "AWAITING_MOBILE_KEY",
            Self::AwaitingVerification => "AWAITING_VERIFICATION",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

/// One in-flight pairing handshake. The raw ECDH secret lives only inside
/// the key pair and is consumed during derivation; afterwards the session
/// holds just the derived key and code.
struct PairingSession {
    session_id: String,
    device_name: String,
    keypair: Option<AgentKeyPair>,
    agent_fingerprint: String,
    agent_public_b64: String,
    mobile_device_id: Option<String>,
    mobile_public_b64: Option<String>,
    mobile_fingerprint: Option<String>,
    session_key: Option<[u8; 32]>,
    verification_code: Option<String>,
    state: PairingState,
    expires_at_ms: u64,
}

/// Returned by `initiate_pairing` for display/QR on the agent side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingInitiation {
    pub session_id: String,
    pub agent_fingerprint: String,
    pub agent_public_key: String,
    pub expires_at_ms: u64,
}

/// Returned by `process_mobile_key`: the code both sides display, plus
/// both fingerprints for the confirmation dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchange {
    pub verification_code: String,
    pub agent_fingerprint: String,
    pub mobile_fingerprint: String,
}

/// Agent-side pairing state machine over all in-flight sessions.
pub struct PairingCoordinator {
    sessions: Mutex<HashMap<String, PairingSession>>,
    limiter: PairingRateLimiter,
    store: Arc<DeviceStore>,
    default_timeout_ms: u64,
}

impl PairingCoordinator {
    pub fn new(store: Arc<DeviceStore>, rate_limit: RateLimitConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            limiter: PairingRateLimiter::new(rate_limit),
            store,
            default_timeout_ms: DEFAULT_PAIRING_TIMEOUT_MS,
        }
    }

    /// Start a pairing session: fresh key pair, session id, expiry.
    pub fn initiate_pairing(
        &self,
        device_name: &str,
        timeout_ms: Option<u64>,
    ) -> Result<PairingInitiation, PairingError> {
        let keypair = AgentKeyPair::generate()?;
        let session_id = Uuid::new_v4().to_string();
        let expires_at_ms = now_ms() + timeout_ms.unwrap_or(self.default_timeout_ms);

        let initiation = PairingInitiation {
            session_id: session_id.clone(),
            agent_fingerprint: keypair.fingerprint(),
            agent_public_key: keypair.public_base64(),
            expires_at_ms,
        };

        let session = PairingSession {
            session_id: session_id.clone(),
            device_name: device_name.to_owned(),
            agent_fingerprint: initiation.agent_fingerprint.clone(),
            agent_public_b64: initiation.agent_public_key.clone(),
            keypair: Some(keypair),
            mobile_device_id: None,
            mobile_public_b64: None,
            mobile_fingerprint: None,
            session_key: None,
            verification_code: None,
            state: PairingState::AwaitingMobileKey,
            expires_at_ms,
        };
        self.lock().insert(session_id.clone(), session);

        info!(session = %session_id, device_name, "pairing initiated");
        Ok(initiation)
    }

    /// Receive the mobile public key: rate-limit, validate, run ECDH, and
    /// derive the verification code.
    pub fn process_mobile_key(
        &self,
        session_id: &str,
        mobile_public_b64: &str,
        mobile_device_id: &str,
    ) -> Result<KeyExchange, PairingError> {
        if let RateLimitDecision::Limited { retry_after_secs } =
            self.limiter.check_and_record(mobile_device_id)
        {
            return Err(PairingError::RateLimited { retry_after_secs });
        }

        if let Some(existing) = self.store.get(mobile_device_id) {
            match existing.status {
                DeviceStatus::Trusted => return Err(PairingError::AlreadyPaired),
                DeviceStatus::Revoked => {
                    // Revoked devices may re-pair; trust is re-established
                    // by the human verification step.
                    info!(device = %mobile_device_id, "revoked device re-pairing");
                }
                _ => {}
            }
        }

        let mut sessions = self.lock();
        let session = sessions.get_mut(session_id).ok_or(PairingError::SessionExpired)?;

        if now_ms() > session.expires_at_ms {
            session.state = PairingState::Expired;
            return Err(PairingError::SessionExpired);
        }
        if session.state != PairingState::AwaitingMobileKey {
            return Err(PairingError::InvalidState);
        }

        let (mobile_key, mobile_der) = match crypto::decode_public_key(mobile_public_b64) {
            Ok(decoded) => decoded,
            Err(e) => {
                drop(sessions);
                self.limiter.record_failure(mobile_device_id);
                return Err(e);
            }
        };

        let keypair = session.keypair.take().ok_or(PairingError::InvalidState)?;
        let agent_fingerprint = session.agent_fingerprint.clone();
        let derived = keypair.derive(&mobile_key);
        let mobile_fingerprint = crypto::fingerprint(&mobile_der);

        session.mobile_device_id = Some(mobile_device_id.to_owned());
        session.mobile_public_b64 = Some(mobile_public_b64.to_owned());
        session.mobile_fingerprint = Some(mobile_fingerprint.clone());
        session.session_key = Some(derived.session_key);
        session.verification_code = Some(derived.verification_code.clone());
        session.state = PairingState::AwaitingVerification;

        info!(session = %session_id, device = %mobile_device_id, "key exchange complete");
        Ok(KeyExchange {
            verification_code: derived.verification_code,
            agent_fingerprint,
            mobile_fingerprint,
        })
    }

    /// Apply the human verdict. Confirmation persists the device and
    /// clears rate-limit state; rejection counts as a failed attempt.
    pub fn confirm_verification(
        &self,
        session_id: &str,
        confirmed: bool,
    ) -> Result<PairedDevice, PairingError> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(session_id).ok_or(PairingError::SessionExpired)?;

        if now_ms() > session.expires_at_ms {
            session.state = PairingState::Expired;
            return Err(PairingError::SessionExpired);
        }
        if session.state != PairingState::AwaitingVerification {
            return Err(PairingError::InvalidState);
        }

        let device_id = session
            .mobile_device_id
            .clone()
            .ok_or_else(|| PairingError::Internal("missing device id".to_owned()))?;

        if !confirmed {
            session.state = PairingState::Cancelled;
            drop(sessions);
            self.limiter.record_failure(&device_id);
            warn!(session = %session_id, device = %device_id, "pairing rejected by user");
            return Err(PairingError::UserRejected);
        }

        let public_key = session
            .mobile_public_b64
            .clone()
            .ok_or_else(|| PairingError::Internal("missing mobile key".to_owned()))?;
        let fingerprint = session
            .mobile_fingerprint
            .clone()
            .ok_or_else(|| PairingError::Internal("missing fingerprint".to_owned()))?;

        let device = PairedDevice {
            device_id: device_id.clone(),
            device_name: session.device_name.clone(),
            fingerprint,
            public_key,
            status: DeviceStatus::Trusted,
            paired_at_ms: now_ms(),
            last_seen_at_ms: now_ms(),
        };
        session.state = PairingState::Completed;
        drop(sessions);

        self.store
            .upsert(device.clone())
            .map_err(|e| PairingError::Internal(format!("persist device: {e}")))?;
        self.limiter.record_success(&device_id);
        info!(device = %device_id, "device paired");
        Ok(device)
    }

    /// Session key for post-pairing message encryption. Consumes the key;
    /// it never leaves the agent more than once.
    pub fn take_session_key(&self, session_id: &str) -> Option<[u8; 32]> {
        self.lock().get_mut(session_id).and_then(|s| s.session_key.take())
    }

    pub fn cancel(&self, session_id: &str) {
        if let Some(session) = self.lock().get_mut(session_id) {
            session.state = PairingState::Cancelled;
        }
    }

    pub fn session_state(&self, session_id: &str) -> Option<PairingState> {
        self.lock().get(session_id).map(|s| s.state)
    }

    /// Expire overdue in-flight sessions and drop everything past its
    /// expiry, whatever the state.
    pub fn sweep(&self) {
        let now = now_ms();
        let mut sessions = self.lock();
        for session in sessions.values_mut() {
            if now > session.expires_at_ms
                && matches!(
                    session.state,
                    PairingState::AwaitingMobileKey | PairingState::AwaitingVerification
                )
            {
                session.state = PairingState::Expired;
            }
        }
        sessions.retain(|_, s| now <= s.expires_at_ms);
    }

    pub fn is_device_paired(&self, device_id: &str, public_key_b64: &str) -> bool {
        self.store.is_device_paired(device_id, public_key_b64)
    }

    pub fn revoke_device(&self, device_id: &str) -> Result<bool, PairingError> {
        self.store
            .revoke(device_id)
            .map_err(|e| PairingError::Internal(format!("revoke: {e}")))
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PairingSession>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
