// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use nix::sys::signal::Signal;

use super::*;
use crate::pty::policy::EnvPolicy;
use crate::pty::{ProcessState, PtyError, SpawnSpec};

fn sh_spec() -> SpawnSpec {
    SpawnSpec {
        shell: "/bin/sh".to_owned(),
        cols: 80,
        rows: 24,
        working_dir: None,
        env: Vec::new(),
    }
}

fn spawn_sh() -> Result<PtyProcess, PtyError> {
    PtyProcess::spawn(&sh_spec(), &EnvPolicy::default(), &[], &[], true)
}

async fn drain_to_eof(pty: &PtyProcess) {
    let mut buf = vec![0u8; 4096];
    loop {
        match tokio::time::timeout(Duration::from_secs(10), pty.read_output(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(_)) => continue,
        }
    }
}

// Spawn /bin/sh at 80x24, ask it to exit, and confirm the termination
// path reports a clean exit within the grace budget.
#[tokio::test]
#[serial_test::serial]
async fn clean_exit_through_graceful_terminate() -> anyhow::Result<()> {
    let pty = spawn_sh()?;
    assert_eq!(pty.state(), ProcessState::Running);
    assert_eq!(pty.dimensions(), (80, 24));

    pty.write(b"exit\n").await?;
    drain_to_eof(&pty).await;

    let status = pty.graceful_terminate(5000).await;
    assert_eq!(pty.state(), ProcessState::Terminated);
    assert_eq!(status.code, Some(0));
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn sigterm_escalation_stops_live_shell() -> anyhow::Result<()> {
    let pty = spawn_sh()?;

    let status = pty.graceful_terminate(5000).await;
    assert_eq!(pty.state(), ProcessState::Terminated);
    // sh exits on SIGTERM, either by dying to the signal or by trapping it.
    assert!(status.signal == Some(Signal::SIGTERM as i32) || status.code.is_some());
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn zero_grace_goes_straight_to_sigkill() -> anyhow::Result<()> {
    let pty = spawn_sh()?;

    let status = pty.terminate().await;
    assert_eq!(pty.state(), ProcessState::Terminated);
    assert_eq!(status.signal, Some(Signal::SIGKILL as i32));
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn terminate_is_idempotent() -> anyhow::Result<()> {
    let pty = spawn_sh()?;

    let first = pty.graceful_terminate(1000).await;
    let second = pty.graceful_terminate(1000).await;
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn write_after_termination_fails() -> anyhow::Result<()> {
    let pty = spawn_sh()?;
    pty.terminate().await;

    assert_eq!(pty.write(b"ls\n").await, Err(PtyError::ProcessNotRunning));
    assert_eq!(pty.resize(100, 30), Err(PtyError::ProcessNotRunning));
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn resize_updates_dimensions() -> anyhow::Result<()> {
    let pty = spawn_sh()?;

    pty.resize(120, 40)?;
    assert_eq!(pty.dimensions(), (120, 40));

    assert_eq!(
        pty.resize(0, 40),
        Err(PtyError::DimensionsInvalid { cols: 0, rows: 40 })
    );

    pty.terminate().await;
    Ok(())
}

#[tokio::test]
#[serial_test::serial]
async fn shell_output_is_readable() -> anyhow::Result<()> {
    let pty = spawn_sh()?;
    pty.write(b"echo terminox-marker\n").await?;

    let mut collected = Vec::new();
    let mut buf = vec![0u8; 4096];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(500), pty.read_output(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                collected.extend_from_slice(&buf[..n]);
                if String::from_utf8_lossy(&collected).contains("terminox-marker") {
                    break;
                }
            }
            Ok(Err(_)) => break,
            Err(_) => continue,
        }
    }

    assert!(String::from_utf8_lossy(&collected).contains("terminox-marker"));
    pty.terminate().await;
    Ok(())
}

#[yare::parameterized(
    sigint  = { "SIGINT", Some(Signal::SIGINT) },
    sigterm = { "SIGTERM", Some(Signal::SIGTERM) },
    sigkill = { "SIGKILL", Some(Signal::SIGKILL) },
    sighup  = { "SIGHUP", Some(Signal::SIGHUP) },
    sigwinch = { "SIGWINCH", Some(Signal::SIGWINCH) },
    sigstop = { "SIGSTOP", Some(Signal::SIGSTOP) },
    sigcont = { "SIGCONT", Some(Signal::SIGCONT) },
    sigusr1 = { "SIGUSR1", None },
    garbage = { "CTRL_C", None },
)]
fn signal_name_parsing(name: &str, expected: Option<Signal>) {
    assert_eq!(parse_signal(name), expected);
}

#[tokio::test]
#[serial_test::serial]
async fn sigint_is_written_to_the_pty() -> anyhow::Result<()> {
    let pty = spawn_sh()?;

    // ^C reaches the line discipline, not the process directly; the shell
    // stays alive.
    let outcome = pty.signal(Signal::SIGINT).await?;
    assert_eq!(outcome, crate::pty::SignalOutcome::Delivered);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pty.state(), ProcessState::Running);

    pty.terminate().await;
    Ok(())
}
