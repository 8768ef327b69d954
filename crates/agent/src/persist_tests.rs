// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::session::SessionState;

fn sample(id: &str) -> PersistedSession {
    PersistedSession {
        id: id.to_owned(),
        state: SessionState::Detached,
        connection_id: "conn-1".to_owned(),
        created_at_ms: 1_700_000_000_000,
        last_activity_ms: 1_700_000_060_000,
        cols: 80,
        rows: 24,
    }
}

#[test]
fn save_load_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sessions.json");

    save(&path, vec![sample("s-1"), sample("s-2")]);
    let restored = load(&path);
    assert_eq!(restored.len(), 2);
    assert_eq!(restored[0].id, "s-1");
    assert_eq!(restored[0].state, SessionState::Detached);
    Ok(())
}

#[test]
fn missing_snapshot_is_empty() {
    assert!(load(std::path::Path::new("/no/such/snapshot.json")).is_empty());
}

#[test]
fn corrupt_snapshot_discarded() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sessions.json");
    std::fs::write(&path, b"not json at all")?;
    assert!(load(&path).is_empty());
    Ok(())
}

#[test]
fn unknown_version_discarded() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sessions.json");
    std::fs::write(&path, br#"{"version": 99, "saved_at_ms": 0, "sessions": []}"#)?;
    assert!(load(&path).is_empty());
    Ok(())
}
