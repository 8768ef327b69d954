// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn device(id: &str, key: &str) -> PairedDevice {
    PairedDevice {
        device_id: id.to_owned(),
        device_name: "Pixel".to_owned(),
        fingerprint: format!("SHA256:fp-{id}"),
        public_key: key.to_owned(),
        status: DeviceStatus::Trusted,
        paired_at_ms: 1_700_000_000_000,
        last_seen_at_ms: 1_700_000_000_000,
    }
}

#[test]
fn missing_file_is_empty_store() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = DeviceStore::open(dir.path().join("paired_devices.json"))?;
    assert!(store.list().is_empty());
    assert_eq!(store.trusted_count(), 0);
    Ok(())
}

#[test]
fn upsert_persists_across_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("paired_devices.json");

    {
        let store = DeviceStore::open(&path)?;
        store.upsert(device("m-1", "key-a"))?;
        store.upsert(device("m-2", "key-b"))?;
    }

    let reopened = DeviceStore::open(&path)?;
    assert_eq!(reopened.list().len(), 2);
    assert_eq!(reopened.get("m-1").map(|d| d.public_key), Some("key-a".to_owned()));
    Ok(())
}

#[test]
fn file_schema_is_versioned() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("paired_devices.json");
    let store = DeviceStore::open(&path)?;
    store.upsert(device("m-1", "key-a"))?;

    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
    assert_eq!(raw["version"], 1);
    assert_eq!(raw["devices"][0]["deviceId"], "m-1");
    assert_eq!(raw["devices"][0]["status"], "TRUSTED");
    Ok(())
}

#[test]
fn corrupt_file_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("paired_devices.json");
    std::fs::write(&path, b"{ not json")?;

    assert!(DeviceStore::open(&path).is_err());
    Ok(())
}

// Pairing check requires TRUSTED status and the exact key; revocation is
// a soft delete that flips the check to false.
#[test]
fn is_paired_and_revocation() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = DeviceStore::open(dir.path().join("d.json"))?;
    store.upsert(device("m-1", "key-a"))?;

    assert!(store.is_device_paired("m-1", "key-a"));
    assert!(!store.is_device_paired("m-1", "key-other"));
    assert!(!store.is_device_paired("m-2", "key-a"));

    assert!(store.revoke("m-1")?);
    assert!(!store.is_device_paired("m-1", "key-a"));
    // Record survives as a soft delete.
    assert_eq!(store.get("m-1").map(|d| d.status), Some(DeviceStatus::Revoked));
    assert_eq!(store.trusted_count(), 0);

    assert!(!store.revoke("m-unknown")?);
    Ok(())
}

#[test]
fn snapshot_is_point_in_time() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = DeviceStore::open(dir.path().join("d.json"))?;
    store.upsert(device("m-1", "key-a"))?;

    let before = store.snapshot();
    store.upsert(device("m-2", "key-b"))?;

    assert_eq!(before.len(), 1);
    assert_eq!(store.snapshot().len(), 2);
    Ok(())
}

#[test]
fn touch_updates_last_seen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = DeviceStore::open(dir.path().join("d.json"))?;
    store.upsert(device("m-1", "key-a"))?;

    store.touch_last_seen("m-1")?;
    let seen = store.get("m-1").map(|d| d.last_seen_at_ms).unwrap_or(0);
    assert!(seen > 1_700_000_000_000);
    Ok(())
}

#[test]
fn default_path_is_under_home() {
    let path = default_store_path();
    assert!(path.ends_with(".terminox/paired_devices.json"));
}
