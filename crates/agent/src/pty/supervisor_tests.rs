// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::pty::policy::EnvPolicy;
use crate::pty::spawn::PtyProcess;
use crate::pty::SpawnSpec;

fn spawn_sh() -> anyhow::Result<Arc<PtyProcess>> {
    let spec = SpawnSpec {
        shell: "/bin/sh".to_owned(),
        cols: 80,
        rows: 24,
        working_dir: None,
        env: Vec::new(),
    };
    Ok(Arc::new(PtyProcess::spawn(&spec, &EnvPolicy::default(), &[], &[], true)?))
}

#[tokio::test]
#[serial_test::serial]
async fn sweep_removes_terminated_processes() -> anyhow::Result<()> {
    let supervisor = PtySupervisor::new(SupervisorConfig::default());
    let mut events = supervisor.subscribe();

    let pty = spawn_sh()?;
    supervisor.register("s-1", Arc::clone(&pty));
    assert_eq!(supervisor.len(), 1);

    pty.terminate().await;
    supervisor.sweep().await;

    assert!(supervisor.is_empty());
    assert_eq!(
        events.try_recv(),
        Ok(SupervisorEvent::Removed { session_id: "s-1".to_owned() })
    );
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn sweep_terminates_over_duration_process() -> anyhow::Result<()> {
    let config = SupervisorConfig {
        max_session_duration_ms: 1,
        termination_grace_ms: 0,
        ..SupervisorConfig::default()
    };
    let supervisor = PtySupervisor::new(config);
    let mut events = supervisor.subscribe();

    let pty = spawn_sh()?;
    supervisor.register("s-1", Arc::clone(&pty));

    tokio::time::sleep(Duration::from_millis(20)).await;
    supervisor.sweep().await;

    assert_eq!(pty.state(), crate::pty::ProcessState::Terminated);
    assert_eq!(
        events.try_recv(),
        Ok(SupervisorEvent::Expired { session_id: "s-1".to_owned() })
    );

    // The next pass drops the now-terminated entry.
    supervisor.sweep().await;
    assert!(supervisor.is_empty());
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn idle_event_fires_once_per_idle_period() -> anyhow::Result<()> {
    let config = SupervisorConfig { idle_timeout_ms: 1, ..SupervisorConfig::default() };
    let supervisor = PtySupervisor::new(config);
    let mut events = supervisor.subscribe();

    let pty = spawn_sh()?;
    supervisor.register("s-1", Arc::clone(&pty));

    tokio::time::sleep(Duration::from_millis(20)).await;
    supervisor.sweep().await;
    supervisor.sweep().await;

    // Exactly one idle event, and the process was not terminated.
    match events.try_recv() {
        Ok(SupervisorEvent::Idle { session_id, idle_ms }) => {
            assert_eq!(session_id, "s-1");
            assert!(idle_ms >= 1);
        }
        other => anyhow::bail!("expected idle event, got {other:?}"),
    }
    assert!(events.try_recv().is_err());
    assert_eq!(pty.state(), crate::pty::ProcessState::Running);

    pty.terminate().await;
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn terminate_all_clears_table() -> anyhow::Result<()> {
    let supervisor = PtySupervisor::new(SupervisorConfig::default());
    let a = spawn_sh()?;
    let b = spawn_sh()?;
    supervisor.register("s-a", Arc::clone(&a));
    supervisor.register("s-b", Arc::clone(&b));

    supervisor.terminate_all(0).await;

    assert!(supervisor.is_empty());
    assert_eq!(a.state(), crate::pty::ProcessState::Terminated);
    assert_eq!(b.state(), crate::pty::ProcessState::Terminated);
    Ok(())
}
