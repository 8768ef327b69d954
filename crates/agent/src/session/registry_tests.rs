// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::pty::backend::{PtyBackend, TerminalBackend};
use crate::pty::policy::EnvPolicy;
use crate::pty::supervisor::{PtySupervisor, SupervisorConfig};
use crate::session::SessionState;

struct Fixture {
    registry: SessionRegistry,
    backend: PtyBackend,
}

fn fixture(limits: SessionLimits) -> Fixture {
    let supervisor = Arc::new(PtySupervisor::new(SupervisorConfig::default()));
    let backend = PtyBackend::new(
        EnvPolicy::default(),
        Vec::new(),
        Vec::new(),
        true,
        Arc::clone(&supervisor),
    );
    Fixture { registry: SessionRegistry::new(limits, supervisor), backend }
}

fn sh_spec() -> SpawnSpec {
    SpawnSpec {
        shell: "/bin/sh".to_owned(),
        cols: 80,
        rows: 24,
        working_dir: None,
        env: Vec::new(),
    }
}

fn quick_limits() -> SessionLimits {
    SessionLimits { termination_grace_ms: 0, ..SessionLimits::default() }
}

// Per-connection cap of two: the third create fails with the session-limit
// code and allocates nothing.
#[tokio::test]
#[serial_test::serial]
async fn per_connection_cap_enforced() -> anyhow::Result<()> {
    let limits = SessionLimits { max_sessions_per_connection: 2, ..quick_limits() };
    let f = fixture(limits);

    let s1 = f.registry.create_session("conn-1", &f.backend, &sh_spec())?;
    let s2 = f.registry.create_session("conn-1", &f.backend, &sh_spec())?;
    assert_ne!(s1.id, s2.id);

    let err = f.registry.create_session("conn-1", &f.backend, &sh_spec()).err();
    assert_eq!(err, Some(RegistryError::ConnectionLimit { limit: 2 }));
    assert_eq!(f.registry.session_count(), 2);
    assert_eq!(
        RegistryError::ConnectionLimit { limit: 2 }.error_code(),
        crate::error::ErrorCode::SessionLimit
    );

    // A different connection is unaffected.
    let s3 = f.registry.create_session("conn-2", &f.backend, &sh_spec())?;
    assert_eq!(f.registry.sessions_for_connection("conn-2").len(), 1);

    f.registry.terminate_all("test teardown").await;
    let _ = s3;
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn global_cap_enforced() -> anyhow::Result<()> {
    let limits = SessionLimits {
        max_total_sessions: 2,
        max_sessions_per_connection: 10,
        ..quick_limits()
    };
    let f = fixture(limits);

    f.registry.create_session("conn-1", &f.backend, &sh_spec())?;
    f.registry.create_session("conn-2", &f.backend, &sh_spec())?;
    let err = f.registry.create_session("conn-3", &f.backend, &sh_spec());
    assert!(matches!(err, Err(RegistryError::GlobalLimit { limit: 2 })));

    f.registry.terminate_all("test teardown").await;
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn spawn_failure_surfaces_and_reserves_nothing() -> anyhow::Result<()> {
    let f = fixture(quick_limits());
    let bad = SpawnSpec { shell: "/nonexistent/shell".to_owned(), ..sh_spec() };

    let err = f.registry.create_session("conn-1", &f.backend, &bad);
    assert!(matches!(err, Err(RegistryError::Pty(_))));
    assert_eq!(f.registry.session_count(), 0);
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn disconnect_then_reconnect() -> anyhow::Result<()> {
    let f = fixture(quick_limits());
    let session = f.registry.create_session("conn-1", &f.backend, &sh_spec())?;
    assert_eq!(session.state(), SessionState::Active);

    f.registry.mark_disconnected(&session.id)?;
    assert_eq!(session.state(), SessionState::Detached);
    // The process stays alive while detached.
    assert_eq!(session.process.state(), crate::pty::ProcessState::Running);

    let reconnected = f.registry.reconnect_session(&session.id, "conn-2")?;
    assert_eq!(reconnected.state(), SessionState::Active);
    assert_eq!(reconnected.connection_id(), "conn-2");

    f.registry.terminate_all("test teardown").await;
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn reconnect_requires_detached_state() -> anyhow::Result<()> {
    let f = fixture(quick_limits());
    let session = f.registry.create_session("conn-1", &f.backend, &sh_spec())?;

    let err = f.registry.reconnect_session(&session.id, "conn-2");
    assert!(matches!(err, Err(RegistryError::NotDetached)));

    let err = f.registry.reconnect_session("no-such-id", "conn-2");
    assert!(matches!(err, Err(RegistryError::NotFound)));

    f.registry.terminate_all("test teardown").await;
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn expired_window_rejects_and_expires() -> anyhow::Result<()> {
    let limits = SessionLimits { reconnection_window_ms: 0, ..quick_limits() };
    let f = fixture(limits);
    let session = f.registry.create_session("conn-1", &f.backend, &sh_spec())?;
    f.registry.mark_disconnected(&session.id)?;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let err = f.registry.reconnect_session(&session.id, "conn-2");
    assert!(matches!(err, Err(RegistryError::WindowExpired)));

    let expired = f.registry.expire_detached().await;
    assert_eq!(expired, vec![session.id.clone()]);
    assert!(f.registry.get_session(&session.id).is_none());
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn terminate_session_is_idempotent() -> anyhow::Result<()> {
    let f = fixture(quick_limits());
    let session = f.registry.create_session("conn-1", &f.backend, &sh_spec())?;
    let id = session.id.clone();

    f.registry.terminate_session(&id, "client close").await;
    assert!(f.registry.get_session(&id).is_none());
    assert_eq!(session.process.state(), crate::pty::ProcessState::Terminated);

    // Second call is a no-op.
    f.registry.terminate_session(&id, "client close").await;
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn wire_id_lookup_and_export() -> anyhow::Result<()> {
    let f = fixture(quick_limits());
    let session = f.registry.create_session("conn-1", &f.backend, &sh_spec())?;

    let by_wire = f.registry.get_by_wire_id(session.wire_id);
    assert_eq!(by_wire.map(|s| s.id.clone()), Some(session.id.clone()));

    let exported = f.registry.export_state();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].id, session.id);
    assert_eq!(exported[0].state, SessionState::Active);
    assert_eq!(exported[0].cols, 80);

    f.registry.terminate_all("test teardown").await;
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn update_state_validates_transitions() -> anyhow::Result<()> {
    let f = fixture(quick_limits());
    let session = f.registry.create_session("conn-1", &f.backend, &sh_spec())?;

    let err = f.registry.update_session_state(&session.id, SessionState::Starting);
    assert!(matches!(err, Err(RegistryError::InvalidTransition { .. })));

    f.registry.update_session_state(&session.id, SessionState::Detached)?;
    assert_eq!(session.state(), SessionState::Detached);

    f.registry.terminate_all("test teardown").await;
    Ok(())
}
