// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background supervision of spawned PTY processes: terminated-entry
//! cleanup, max-runtime enforcement, and idle detection.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::spawn::PtyProcess;
use super::ProcessState;

/// Supervision tunables. Zero disables the corresponding check.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub sweep_interval: Duration,
    /// Sessions running longer than this are gracefully terminated.
    pub max_session_duration_ms: u64,
    /// Idle threshold for the advisory idle event. Never terminates.
    pub idle_timeout_ms: u64,
    /// Grace budget used when terminating an over-duration process.
    pub termination_grace_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            max_session_duration_ms: 0,
            idle_timeout_ms: 0,
            termination_grace_ms: 5000,
        }
    }
}

/// Events emitted by the sweep task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A terminated process was removed from the table.
    Removed { session_id: String },
    /// A process exceeded the max session duration and was terminated.
    Expired { session_id: String },
    /// A process crossed the idle threshold. Advisory only.
    Idle { session_id: String, idle_ms: u64 },
}

/// Process table plus the periodic sweep.
pub struct PtySupervisor {
    config: SupervisorConfig,
    processes: Mutex<HashMap<String, Arc<PtyProcess>>>,
    /// Sessions already reported idle, so the event fires once per
    /// idle period.
    idle_reported: Mutex<HashSet<String>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl PtySupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            processes: Mutex::new(HashMap::new()),
            idle_reported: Mutex::new(HashSet::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn register(&self, session_id: &str, process: Arc<PtyProcess>) {
        self.lock_table().insert(session_id.to_owned(), process);
    }

    pub fn unregister(&self, session_id: &str) -> Option<Arc<PtyProcess>> {
        self.lock_idle().remove(session_id);
        self.lock_table().remove(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<PtyProcess>> {
        self.lock_table().get(session_id).cloned()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.lock_table().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_table().is_empty()
    }

    /// One supervision pass: drop terminated entries, terminate
    /// over-duration processes, report idle crossings.
    pub async fn sweep(&self) {
        let snapshot: Vec<(String, Arc<PtyProcess>)> = self
            .lock_table()
            .iter()
            .map(|(id, p)| (id.clone(), Arc::clone(p)))
            .collect();

        for (id, process) in snapshot {
            if process.state() == ProcessState::Terminated {
                self.lock_table().remove(&id);
                self.lock_idle().remove(&id);
                debug!(session = %id, "removed terminated process");
                let _ = self.events.send(SupervisorEvent::Removed { session_id: id });
                continue;
            }

            if self.config.max_session_duration_ms > 0
                && process.runtime().as_millis() as u64 > self.config.max_session_duration_ms
            {
                info!(session = %id, "max session duration exceeded, terminating");
                process.graceful_terminate(self.config.termination_grace_ms).await;
                let _ = self.events.send(SupervisorEvent::Expired { session_id: id });
                continue;
            }

            if self.config.idle_timeout_ms > 0 {
                let idle_ms = process.idle_ms();
                if idle_ms > self.config.idle_timeout_ms {
                    if self.lock_idle().insert(id.clone()) {
                        let _ = self
                            .events
                            .send(SupervisorEvent::Idle { session_id: id, idle_ms });
                    }
                } else {
                    self.lock_idle().remove(&id);
                }
            }
        }
    }

    /// Run the sweep on its interval until cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep().await,
                _ = shutdown.cancelled() => break,
            }
        }
        debug!("supervisor sweep stopped");
    }

    /// Terminate every process, used on agent shutdown.
    pub async fn terminate_all(&self, grace_ms: u64) {
        let snapshot: Vec<Arc<PtyProcess>> =
            self.lock_table().values().cloned().collect();
        for process in snapshot {
            process.graceful_terminate(grace_ms).await;
        }
        self.lock_table().clear();
        self.lock_idle().clear();
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<PtyProcess>>> {
        match self.processes.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.idle_reported.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
