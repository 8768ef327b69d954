// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native PTY process handle: `forkpty` spawn, async I/O, signals, and
//! SIGTERM-then-SIGKILL termination.

use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execve, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::nbio::{read_chunk, set_nonblocking, write_all, MasterFd};
use super::policy::{self, EnvPolicy};
use super::{ExitStatus, ProcessState, PtyError, SignalOutcome, SpawnSpec};
use crate::ring::now_ms;

/// Graceful-termination poll: 50 ms doubling-ish (x1.5) up to 500 ms.
const TERM_POLL_INITIAL: Duration = Duration::from_millis(50);
const TERM_POLL_FACTOR: f64 = 1.5;
const TERM_POLL_CAP: Duration = Duration::from_millis(500);

/// Hard-kill confirmation and exit-code collection budgets.
const KILL_CONFIRM_BUDGET: Duration = Duration::from_secs(2);
const EXIT_COLLECT_BUDGET: Duration = Duration::from_secs(5);

/// A shell process attached to a pseudo-terminal.
///
/// Shared as `Arc<PtyProcess>`; every operation takes `&self`. Destructive
/// operations require both the termination mutex and the atomic flag.
pub struct PtyProcess {
    master: AsyncFd<MasterFd>,
    child: Pid,
    cols: AtomicU16,
    rows: AtomicU16,
    state: AtomicU8,
    /// Set once by whichever path initiates termination.
    terminating: AtomicBool,
    /// Serializes SIGTERM/SIGKILL escalation against concurrent calls.
    term_lock: tokio::sync::Mutex<()>,
    /// Serializes `waitpid` so the status is reaped exactly once.
    reap_lock: Mutex<()>,
    exit: OnceLock<ExitStatus>,
    exit_notify: Notify,
    last_io_ms: AtomicU64,
    started: Instant,
    graceful_enabled: bool,
}

impl PtyProcess {
    /// Validate the spec against policy and spawn the shell on a fresh PTY.
    // forkpty and the post-fork exec path require unsafe
    #[allow(unsafe_code)]
    pub fn spawn(
        spec: &SpawnSpec,
        env_policy: &EnvPolicy,
        allowed_shells: &[PathBuf],
        allowed_working_dirs: &[PathBuf],
        graceful_enabled: bool,
    ) -> Result<Self, PtyError> {
        policy::validate_dimensions(spec.cols, spec.rows)?;

        let shell = if spec.shell.is_empty() {
            policy::detect_shell(allowed_shells)?
        } else {
            policy::validate_shell(&spec.shell, allowed_shells)?
        };

        let working_dir = match &spec.working_dir {
            Some(dir) => Some(policy::validate_working_dir(dir, allowed_working_dirs)?),
            None => None,
        };

        let env = env_policy.build_env(&spec.env)?;

        // Prepare all C strings before forking; the child only execs.
        let c_shell = CString::new(shell.as_os_str().as_encoded_bytes())
            .map_err(|_| PtyError::ShellNotAllowed("NUL in shell path".to_owned()))?;
        let c_args = vec![c_shell.clone()];
        let mut c_env = Vec::with_capacity(env.len());
        for (k, v) in &env {
            let entry = CString::new(format!("{k}={v}"))
                .map_err(|_| PtyError::EnvLimitExceeded(format!("NUL in env var {k}")))?;
            c_env.push(entry);
        }

        let winsize = Winsize {
            ws_col: spec.cols,
            ws_row: spec.rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. The child only chdirs
        // and execs, using pre-allocated C strings.
        let result = unsafe { forkpty(&winsize, None) }
            .map_err(|e| PtyError::ProcessStartFailed(format!("forkpty: {e}")))?;

        match result {
            ForkptyResult::Child => {
                if let Some(dir) = &working_dir {
                    let _ = nix::unistd::chdir(dir.as_path());
                }
                let _ = execve(&c_shell, &c_args, &c_env);
                // exec failed; exit without running any Rust destructors
                unsafe { libc::_exit(127) }
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)
                    .map_err(|e| PtyError::ProcessStartFailed(format!("set_nonblocking: {e}")))?;
                let afd = AsyncFd::new(MasterFd(master))
                    .map_err(|e| PtyError::ProcessStartFailed(format!("AsyncFd: {e}")))?;
                debug!(pid = child.as_raw(), shell = %shell.display(), "spawned pty process");
                Ok(Self {
                    master: afd,
                    child,
                    cols: AtomicU16::new(spec.cols),
                    rows: AtomicU16::new(spec.rows),
                    state: AtomicU8::new(ProcessState::Running as u8),
                    terminating: AtomicBool::new(false),
                    term_lock: tokio::sync::Mutex::new(()),
                    reap_lock: Mutex::new(()),
                    exit: OnceLock::new(),
                    exit_notify: Notify::new(),
                    last_io_ms: AtomicU64::new(now_ms()),
                    started: Instant::now(),
                    graceful_enabled,
                })
            }
        }
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn child_pid(&self) -> i32 {
        self.child.as_raw()
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.cols.load(Ordering::Relaxed), self.rows.load(Ordering::Relaxed))
    }

    /// Milliseconds since the last PTY read or write.
    pub fn idle_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_io_ms.load(Ordering::Relaxed))
    }

    pub fn runtime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Read one output chunk. `Ok(0)` means EOF (process side closed).
    pub async fn read_output(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let result = read_chunk(&self.master, buf).await;
        match &result {
            // EIO from the master after the child exits is EOF in disguise.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(0),
            Ok(n) if *n > 0 => {
                self.last_io_ms.store(now_ms(), Ordering::Relaxed);
            }
            _ => {}
        }
        result
    }

    /// Write input bytes to the PTY.
    pub async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if self.state() == ProcessState::Terminated {
            return Err(PtyError::ProcessNotRunning);
        }
        write_all(&self.master, data)
            .await
            .map_err(|_| PtyError::ProcessNotRunning)?;
        self.last_io_ms.store(now_ms(), Ordering::Relaxed);
        Ok(())
    }

    /// Resize the terminal window.
    // TIOCSWINSZ requires a raw ioctl
    #[allow(unsafe_code)]
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        if self.state() == ProcessState::Terminated {
            return Err(PtyError::ProcessNotRunning);
        }
        policy::validate_dimensions(cols, rows)?;

        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ sets the window size on the PTY master fd;
        // the Winsize struct is fully initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            return Err(PtyError::ProcessNotRunning);
        }
        self.cols.store(cols, Ordering::Relaxed);
        self.rows.store(rows, Ordering::Relaxed);
        Ok(())
    }

    /// Deliver a signal. SIGINT goes through the PTY as ^C so the line
    /// discipline handles it; SIGSTOP/SIGCONT are best-effort.
    pub async fn signal(&self, sig: Signal) -> Result<SignalOutcome, PtyError> {
        if self.state() == ProcessState::Terminated {
            return Err(PtyError::ProcessNotRunning);
        }
        match sig {
            Signal::SIGINT => {
                self.write(&[0x03]).await?;
                Ok(SignalOutcome::Delivered)
            }
            Signal::SIGSTOP | Signal::SIGCONT => match kill(self.child, sig) {
                Ok(()) => Ok(SignalOutcome::Delivered),
                Err(nix::errno::Errno::ESRCH) => Err(PtyError::ProcessNotRunning),
                Err(_) => Ok(SignalOutcome::Unsupported),
            },
            _ => match kill(self.child, sig) {
                Ok(()) => Ok(SignalOutcome::Delivered),
                Err(nix::errno::Errno::ESRCH) => Err(PtyError::ProcessNotRunning),
                Err(e) => Err(PtyError::ProcessStartFailed(format!("kill: {e}"))),
            },
        }
    }

    /// `terminate` is `graceful_terminate(0)`: straight to SIGKILL.
    pub async fn terminate(&self) -> ExitStatus {
        self.graceful_terminate(0).await
    }

    /// Escalating shutdown: SIGTERM with backoff polling inside the grace
    /// budget, then SIGKILL. Idempotent; concurrent callers converge on
    /// the same exit status.
    pub async fn graceful_terminate(&self, grace_ms: u64) -> ExitStatus {
        let _guard = self.term_lock.lock().await;

        if self.terminating.swap(true, Ordering::AcqRel) {
            // Another caller already ran the escalation to completion
            // (we hold the term lock, so it is done, not in progress).
            if let Some(status) = self.exit.get() {
                return *status;
            }
        }

        // Already exited on its own.
        if let Some(status) = self.try_reap() {
            self.finish(status);
            return status;
        }

        if grace_ms > 0 && self.graceful_enabled {
            let _ = kill(self.child, Signal::SIGTERM);
            let deadline = Instant::now() + Duration::from_millis(grace_ms);
            let mut poll = TERM_POLL_INITIAL;
            while Instant::now() < deadline {
                if let Some(status) = self.try_reap() {
                    self.finish(status);
                    return status;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                tokio::time::sleep(poll.min(remaining)).await;
                poll = Duration::from_secs_f64(poll.as_secs_f64() * TERM_POLL_FACTOR)
                    .min(TERM_POLL_CAP);
            }
        }

        if let Some(status) = self.try_reap() {
            self.finish(status);
            return status;
        }

        let _ = kill(self.child, Signal::SIGKILL);
        let kill_deadline = Instant::now() + KILL_CONFIRM_BUDGET;
        while Instant::now() < kill_deadline {
            if let Some(status) = self.try_reap() {
                self.finish(status);
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        // SIGKILL confirmation timed out; keep collecting within the
        // larger exit budget before giving up.
        let collect_deadline = Instant::now() + EXIT_COLLECT_BUDGET;
        while Instant::now() < collect_deadline {
            if let Some(status) = self.try_reap() {
                self.finish(status);
                return status;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        warn!(pid = self.child.as_raw(), "exit status collection timed out after SIGKILL");
        let status = ExitStatus { code: None, signal: Some(Signal::SIGKILL as i32) };
        self.finish(status);
        status
    }

    /// Wait for the process to exit without initiating termination.
    pub async fn wait_for(&self) -> ExitStatus {
        loop {
            if let Some(status) = self.exit.get() {
                return *status;
            }
            if let Some(status) = self.try_reap() {
                self.finish(status);
                return status;
            }
            tokio::select! {
                _ = self.exit_notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
    }

    /// Detach without terminating. The native backend cannot reattach, so
    /// this is always unsupported.
    pub fn detach(&self) -> SignalOutcome {
        SignalOutcome::Unsupported
    }

    /// Nonblocking reap. Returns the exit status once, then keeps
    /// returning the cached copy.
    fn try_reap(&self) -> Option<ExitStatus> {
        if let Some(status) = self.exit.get() {
            return Some(*status);
        }
        let _guard = match self.reap_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(status) = self.exit.get() {
            return Some(*status);
        }
        match waitpid(self.child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                Some(ExitStatus { code: Some(code), signal: None })
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                Some(ExitStatus { code: None, signal: Some(sig as i32) })
            }
            Ok(_) => None,
            // ECHILD after someone else reaped: status arrives via `exit`.
            Err(_) => self.exit.get().copied(),
        }
    }

    fn finish(&self, status: ExitStatus) {
        let _ = self.exit.set(status);
        self.state.store(ProcessState::Terminated as u8, Ordering::Release);
        self.exit_notify.notify_waiters();
    }

    /// Record an exit observed by the reader loop (EOF path).
    pub fn mark_exited(&self, status: ExitStatus) {
        self.finish(status);
    }

    /// Blocking reap for the reader loop after EOF, run on the blocking
    /// pool.
    pub fn reap_blocking(&self) -> ExitStatus {
        if let Some(status) = self.exit.get() {
            return *status;
        }
        loop {
            match waitpid(self.child, None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    return ExitStatus { code: Some(code), signal: None };
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    return ExitStatus { code: None, signal: Some(sig as i32) };
                }
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => {
                    // Reaped elsewhere; wait for the cached status.
                    if let Some(status) = self.exit.get() {
                        return *status;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.exit.get().is_none() {
            // Last-resort cleanup; the supervisor path is SIGTERM-first.
            let _ = kill(self.child, Signal::SIGHUP);
            let _ = kill(self.child, Signal::SIGKILL);
            let _ = waitpid(self.child, Some(WaitPidFlag::WNOHANG));
        }
    }
}

/// Parse a wire signal name. Only the signals the protocol allows.
pub fn parse_signal(name: &str) -> Option<Signal> {
    match name {
        "SIGINT" => Some(Signal::SIGINT),
        "SIGTERM" => Some(Signal::SIGTERM),
        "SIGKILL" => Some(Signal::SIGKILL),
        "SIGHUP" => Some(Signal::SIGHUP),
        "SIGWINCH" => Some(Signal::SIGWINCH),
        "SIGSTOP" => Some(Signal::SIGSTOP),
        "SIGCONT" => Some(Signal::SIGCONT),
        _ => None,
    }
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
