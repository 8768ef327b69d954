// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    starting_to_active       = { SessionState::Starting, SessionState::Active, true },
    starting_to_terminated   = { SessionState::Starting, SessionState::Terminated, true },
    starting_to_detached     = { SessionState::Starting, SessionState::Detached, false },
    active_to_detached       = { SessionState::Active, SessionState::Detached, true },
    active_to_terminated     = { SessionState::Active, SessionState::Terminated, true },
    active_to_starting       = { SessionState::Active, SessionState::Starting, false },
    detached_to_active       = { SessionState::Detached, SessionState::Active, true },
    detached_to_terminated   = { SessionState::Detached, SessionState::Terminated, true },
    terminated_to_active     = { SessionState::Terminated, SessionState::Active, false },
    terminated_to_starting   = { SessionState::Terminated, SessionState::Starting, false },
    active_to_active         = { SessionState::Active, SessionState::Active, false },
)]
fn transition_matrix(from: SessionState, to: SessionState, legal: bool) {
    assert_eq!(from.can_transition_to(to), legal);
}

#[yare::parameterized(
    starting   = { SessionState::Starting, "STARTING" },
    active     = { SessionState::Active, "ACTIVE" },
    detached   = { SessionState::Detached, "DETACHED" },
    terminated = { SessionState::Terminated, "TERMINATED" },
)]
fn state_names(state: SessionState, name: &str) {
    assert_eq!(state.as_str(), name);
}

mod with_process {
    use std::sync::Arc;

    use super::super::*;
    use crate::pty::policy::EnvPolicy;
    use crate::pty::spawn::PtyProcess;
    use crate::pty::SpawnSpec;
    use crate::ring::OutputRing;

    fn session() -> anyhow::Result<Arc<ManagedSession>> {
        let spec = SpawnSpec {
            shell: "/bin/sh".to_owned(),
            cols: 80,
            rows: 24,
            working_dir: None,
            env: Vec::new(),
        };
        let process =
            Arc::new(PtyProcess::spawn(&spec, &EnvPolicy::default(), &[], &[], true)?);
        Ok(Arc::new(ManagedSession::new(
            "s-test".to_owned(),
            1,
            crate::pty::backend::BackendKind::Pty,
            "conn-1".to_owned(),
            process,
            OutputRing::default(),
        )))
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn detach_timestamps_and_reattach_clear() -> anyhow::Result<()> {
        let session = session()?;
        assert_eq!(session.state(), SessionState::Starting);
        assert!(session.transition(SessionState::Active).is_ok());
        assert_eq!(session.detached_at_ms(), None);

        assert!(session.transition(SessionState::Detached).is_ok());
        assert!(session.detached_at_ms().is_some());

        assert!(session.transition(SessionState::Active).is_ok());
        assert_eq!(session.detached_at_ms(), None);

        session.process.terminate().await;
        Ok(())
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn illegal_transition_reports_current_state() -> anyhow::Result<()> {
        let session = session()?;
        assert!(session.transition(SessionState::Active).is_ok());
        assert!(session.transition(SessionState::Terminated).is_ok());

        assert_eq!(session.transition(SessionState::Active), Err(SessionState::Terminated));
        session.process.terminate().await;
        Ok(())
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn client_attachment_counting() -> anyhow::Result<()> {
        let session = session()?;
        session.attach_client("c1");
        session.attach_client("c2");
        assert_eq!(session.attached_client_count(), 2);

        assert_eq!(session.detach_client("c1"), 1);
        assert_eq!(session.detach_client("c2"), 0);
        assert_eq!(session.detach_client("c-unknown"), 0);

        session.process.terminate().await;
        Ok(())
    }

    // The reader stamps output into the ring and fans it out; a session
    // whose shell exits emits Exited and lands in TERMINATED.
    #[tokio::test]
    #[serial_test::serial]
    async fn reader_streams_output_then_exits() -> anyhow::Result<()> {
        let session = session()?;
        let mut events = session.events.subscribe();
        session.spawn_reader();
        assert!(session.transition(SessionState::Active).is_ok());

        session.process.write(b"echo reader-probe\nexit\n").await?;

        let mut saw_output = false;
        let mut exit_status = None;
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(std::time::Duration::from_secs(1), events.recv()).await {
                Ok(Ok(SessionEvent::Output { sequence, data, .. })) => {
                    assert!(sequence >= 1);
                    if String::from_utf8_lossy(&data).contains("reader-probe") {
                        saw_output = true;
                    }
                }
                Ok(Ok(SessionEvent::Exited { status })) => {
                    exit_status = Some(status);
                    break;
                }
                Ok(Ok(SessionEvent::Resized { .. })) => {}
                Ok(Err(_)) | Err(_) => continue,
            }
        }

        assert!(saw_output, "echoed output never arrived");
        assert_eq!(exit_status.map(|s| s.code), Some(Some(0)));
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(session.ring.lock().map(|r| r.current_sequence() >= 1).unwrap_or(false));
        Ok(())
    }
}
