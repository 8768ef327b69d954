// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted trusted-device set.
//!
//! JSON file (`{version: 1, devices: [...]}`) written atomically via a
//! sibling temp file. Writes serialize on a mutex; reads clone a
//! point-in-time map so they never contend with a writer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ring::now_ms;

/// Trust status. Revocation is a soft delete so the fingerprint history
/// survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    Trusted,
    Revoked,
    Expired,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairedDevice {
    pub device_id: String,
    pub device_name: String,
    /// `SHA256:...` of the public key; immutable identity.
    pub fingerprint: String,
    /// Base64 SubjectPublicKeyInfo.
    pub public_key: String,
    pub status: DeviceStatus,
    pub paired_at_ms: u64,
    pub last_seen_at_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    devices: Vec<PairedDevice>,
}

const STORE_VERSION: u32 = 1;

/// The paired-device set, backed by a JSON file.
pub struct DeviceStore {
    path: PathBuf,
    /// Serializes mutation + save.
    write_lock: Mutex<()>,
    /// Point-in-time map swapped wholesale on each write.
    current: RwLock<Arc<HashMap<String, PairedDevice>>>,
}

impl DeviceStore {
    /// Open the store, loading existing state. A missing file is an empty
    /// store; a corrupt file is an error (never silently clobbered).
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let devices = match std::fs::read(&path) {
            Ok(raw) => {
                let file: StoreFile = serde_json::from_slice(&raw)
                    .with_context(|| format!("parse device store {}", path.display()))?;
                if file.version != STORE_VERSION {
                    warn!(version = file.version, "device store has unexpected version");
                }
                file.devices.into_iter().map(|d| (d.device_id.clone(), d)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("read device store {}", path.display()))
            }
        };

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            current: RwLock::new(Arc::new(devices)),
        })
    }

    /// Point-in-time view of the device map.
    pub fn snapshot(&self) -> Arc<HashMap<String, PairedDevice>> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn get(&self, device_id: &str) -> Option<PairedDevice> {
        self.snapshot().get(device_id).cloned()
    }

    pub fn list(&self) -> Vec<PairedDevice> {
        let mut devices: Vec<PairedDevice> = self.snapshot().values().cloned().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// A device is paired when it is TRUSTED and presents the same public
    /// key it was paired with. REVOKED devices never match.
    pub fn is_device_paired(&self, device_id: &str, public_key_b64: &str) -> bool {
        self.snapshot()
            .get(device_id)
            .map(|d| d.status == DeviceStatus::Trusted && d.public_key == public_key_b64)
            .unwrap_or(false)
    }

    /// Insert or replace a device record and persist.
    pub fn upsert(&self, device: PairedDevice) -> anyhow::Result<()> {
        self.mutate(|map| {
            map.insert(device.device_id.clone(), device);
        })
    }

    /// Soft-delete: flip status to REVOKED. Returns false for unknown ids.
    pub fn revoke(&self, device_id: &str) -> anyhow::Result<bool> {
        let mut found = false;
        self.mutate(|map| {
            if let Some(device) = map.get_mut(device_id) {
                device.status = DeviceStatus::Revoked;
                found = true;
            }
        })?;
        if found {
            info!(device = %device_id, "device revoked");
        }
        Ok(found)
    }

    pub fn touch_last_seen(&self, device_id: &str) -> anyhow::Result<()> {
        self.mutate(|map| {
            if let Some(device) = map.get_mut(device_id) {
                device.last_seen_at_ms = now_ms();
            }
        })
    }

    pub fn trusted_count(&self) -> usize {
        self.snapshot().values().filter(|d| d.status == DeviceStatus::Trusted).count()
    }

    fn mutate(&self, f: impl FnOnce(&mut HashMap<String, PairedDevice>)) -> anyhow::Result<()> {
        let _guard = match self.write_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut next = (*self.snapshot()).clone();
        f(&mut next);
        self.save(&next)?;

        match self.current.write() {
            Ok(mut guard) => *guard = Arc::new(next),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(next),
        }
        Ok(())
    }

    fn save(&self, devices: &HashMap<String, PairedDevice>) -> anyhow::Result<()> {
        let mut list: Vec<PairedDevice> = devices.values().cloned().collect();
        list.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        let file = StoreFile { version: STORE_VERSION, devices: list };
        let raw = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &raw).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename into {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Default store location: `$HOME/.terminox/paired_devices.json`.
pub fn default_store_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".terminox")
        .join("paired_devices.json")
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
