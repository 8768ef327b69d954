// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::pairing::crypto::AgentKeyPair;

struct Fixture {
    coordinator: PairingCoordinator,
    _dir: tempfile::TempDir,
}

fn fixture() -> anyhow::Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(DeviceStore::open(dir.path().join("paired_devices.json"))?);
    let coordinator = PairingCoordinator::new(store, RateLimitConfig::default());
    Ok(Fixture { coordinator, _dir: dir })
}

fn mobile_key() -> anyhow::Result<String> {
    Ok(AgentKeyPair::generate().map_err(anyhow::Error::from)?.public_base64())
}

// Full happy path: initiate, key exchange, confirm, persisted TRUSTED
// device, then revoke.
#[test]
fn pairing_happy_path() -> anyhow::Result<()> {
    let f = fixture()?;

    let init = f.coordinator.initiate_pairing("Pixel 9", None)?;
    assert!(init.agent_fingerprint.starts_with("SHA256:"));
    assert_eq!(
        f.coordinator.session_state(&init.session_id),
        Some(PairingState::AwaitingMobileKey)
    );

    let mobile_pub = mobile_key()?;
    let exchange = f.coordinator.process_mobile_key(&init.session_id, &mobile_pub, "m-1")?;
    assert_eq!(exchange.verification_code.len(), 6);
    assert_eq!(exchange.agent_fingerprint, init.agent_fingerprint);
    assert!(exchange.mobile_fingerprint.starts_with("SHA256:"));
    assert_eq!(
        f.coordinator.session_state(&init.session_id),
        Some(PairingState::AwaitingVerification)
    );

    let device = f.coordinator.confirm_verification(&init.session_id, true)?;
    assert_eq!(device.device_id, "m-1");
    assert_eq!(device.device_name, "Pixel 9");
    assert_eq!(device.status, DeviceStatus::Trusted);
    assert_eq!(
        f.coordinator.session_state(&init.session_id),
        Some(PairingState::Completed)
    );

    assert!(f.coordinator.is_device_paired("m-1", &mobile_pub));
    assert!(f.coordinator.take_session_key(&init.session_id).is_some());
    // Key leaves the coordinator once.
    assert!(f.coordinator.take_session_key(&init.session_id).is_none());

    assert!(f.coordinator.revoke_device("m-1")?);
    assert!(!f.coordinator.is_device_paired("m-1", &mobile_pub));
    Ok(())
}

#[test]
fn rejection_counts_as_failure() -> anyhow::Result<()> {
    let f = fixture()?;
    let init = f.coordinator.initiate_pairing("Pixel", None)?;
    f.coordinator.process_mobile_key(&init.session_id, &mobile_key()?, "m-1")?;

    let err = f.coordinator.confirm_verification(&init.session_id, false).err();
    assert_eq!(err, Some(PairingError::UserRejected));
    assert_eq!(
        f.coordinator.session_state(&init.session_id),
        Some(PairingState::Cancelled)
    );
    assert!(!f.coordinator.is_device_paired("m-1", "anything"));
    Ok(())
}

#[test]
fn wrong_state_transitions_rejected() -> anyhow::Result<()> {
    let f = fixture()?;
    let init = f.coordinator.initiate_pairing("Pixel", None)?;

    // Verification before the key exchange.
    let err = f.coordinator.confirm_verification(&init.session_id, true).err();
    assert_eq!(err, Some(PairingError::InvalidState));

    // Key exchange twice.
    f.coordinator.process_mobile_key(&init.session_id, &mobile_key()?, "m-1")?;
    let err = f.coordinator.process_mobile_key(&init.session_id, &mobile_key()?, "m-1").err();
    assert_eq!(err, Some(PairingError::InvalidState));
    Ok(())
}

#[test]
fn unknown_session_reports_expired() -> anyhow::Result<()> {
    let f = fixture()?;
    let err = f.coordinator.process_mobile_key("nope", &mobile_key()?, "m-1").err();
    assert_eq!(err, Some(PairingError::SessionExpired));
    Ok(())
}

#[test]
fn overdue_session_expires() -> anyhow::Result<()> {
    let f = fixture()?;
    let init = f.coordinator.initiate_pairing("Pixel", Some(0))?;

    std::thread::sleep(std::time::Duration::from_millis(10));
    let err = f.coordinator.process_mobile_key(&init.session_id, &mobile_key()?, "m-1").err();
    assert_eq!(err, Some(PairingError::SessionExpired));
    assert_eq!(
        f.coordinator.session_state(&init.session_id),
        Some(PairingState::Expired)
    );

    // The sweep drops it entirely.
    f.coordinator.sweep();
    assert_eq!(f.coordinator.session_state(&init.session_id), None);
    Ok(())
}

#[test]
fn invalid_mobile_key_is_a_failure() -> anyhow::Result<()> {
    let f = fixture()?;
    let init = f.coordinator.initiate_pairing("Pixel", None)?;

    let err = f.coordinator.process_mobile_key(&init.session_id, "not-a-key", "m-1").err();
    assert_eq!(err, Some(PairingError::InvalidKey));
    Ok(())
}

#[test]
fn already_trusted_device_cannot_repair() -> anyhow::Result<()> {
    let f = fixture()?;
    let mobile_pub = mobile_key()?;

    let init = f.coordinator.initiate_pairing("Pixel", None)?;
    f.coordinator.process_mobile_key(&init.session_id, &mobile_pub, "m-1")?;
    f.coordinator.confirm_verification(&init.session_id, true)?;

    let second = f.coordinator.initiate_pairing("Pixel again", None)?;
    let err = f.coordinator.process_mobile_key(&second.session_id, &mobile_pub, "m-1").err();
    assert_eq!(err, Some(PairingError::AlreadyPaired));
    Ok(())
}

#[test]
fn revoked_device_may_repair() -> anyhow::Result<()> {
    let f = fixture()?;
    let mobile_pub = mobile_key()?;

    let init = f.coordinator.initiate_pairing("Pixel", None)?;
    f.coordinator.process_mobile_key(&init.session_id, &mobile_pub, "m-1")?;
    f.coordinator.confirm_verification(&init.session_id, true)?;
    f.coordinator.revoke_device("m-1")?;

    let again = f.coordinator.initiate_pairing("Pixel", None)?;
    let exchange = f.coordinator.process_mobile_key(&again.session_id, &mobile_pub, "m-1")?;
    assert_eq!(exchange.verification_code.len(), 6);
    f.coordinator.confirm_verification(&again.session_id, true)?;
    assert!(f.coordinator.is_device_paired("m-1", &mobile_pub));
    Ok(())
}

#[test]
fn rate_limit_surfaces_retry_after() -> anyhow::Result<()> {
    let f = fixture()?;

    // Burn through the sliding window with bad keys.
    for _ in 0..6 {
        let init = f.coordinator.initiate_pairing("Pixel", None)?;
        let _ = f.coordinator.process_mobile_key(&init.session_id, "bad-key", "m-flood");
    }

    let init = f.coordinator.initiate_pairing("Pixel", None)?;
    let err = f.coordinator.process_mobile_key(&init.session_id, &mobile_key()?, "m-flood").err();
    assert!(
        matches!(err, Some(PairingError::RateLimited { retry_after_secs }) if retry_after_secs > 0),
        "expected rate limit, got {err:?}"
    );
    Ok(())
}
