// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Opaque session-state snapshot written on shutdown and reloaded at
//! startup. The format is versioned but deliberately not stable across
//! releases; a mismatched or unreadable snapshot is discarded.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ring::now_ms;
use crate::session::PersistedSession;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at_ms: u64,
    sessions: Vec<PersistedSession>,
}

/// Write the session snapshot. Failures are logged, not fatal; losing the
/// snapshot only loses reconnect bookkeeping across restarts.
pub fn save(path: &Path, sessions: Vec<PersistedSession>) {
    let snapshot = Snapshot { version: SNAPSHOT_VERSION, saved_at_ms: now_ms(), sessions };
    let raw = match serde_json::to_vec(&snapshot) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("session snapshot serialization failed: {e}");
            return;
        }
    };

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("session snapshot directory creation failed: {e}");
            return;
        }
    }
    let tmp = path.with_extension("tmp");
    let result = std::fs::write(&tmp, &raw).and_then(|()| std::fs::rename(&tmp, path));
    match result {
        Ok(()) => info!(path = %path.display(), count = snapshot.sessions.len(), "session snapshot written"),
        Err(e) => warn!("session snapshot write failed: {e}"),
    }
}

/// Best-effort reload. Restored sessions have no processes; they come back
/// as records only, for operator visibility.
pub fn load(path: &Path) -> Vec<PersistedSession> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("session snapshot read failed: {e}");
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Snapshot>(&raw) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot.sessions,
        Ok(snapshot) => {
            warn!(version = snapshot.version, "discarding session snapshot with unknown version");
            Vec::new()
        }
        Err(e) => {
            warn!("session snapshot parse failed, discarding: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
