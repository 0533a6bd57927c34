use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mcsm_protocol::management::instance::{InstanceProcessMetrics, InstanceStatus};
use mcsm_protocol::management::minecraft::LatencySupport;
use mcsm_protocol::utils::Encoding;
use parking_lot::{Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::management::console::ConsoleBuffer;
use crate::management::polling::PollingState;
use crate::management::roster::Roster;

/// Per-instance lock. Its guard is `!Send`, so it can never be held across an `.await`.
pub struct InstanceLock(Mutex<RuntimeState>);

impl InstanceLock {
    pub fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.0.lock()
    }
}

/// Volatile state of one managed instance. Lives until the instance is deleted.
pub struct Instance {
    pub id: Uuid,
    state: InstanceLock,
    /// fired when a launch either attaches its process or gives up
    pub launch_settled: Notify,
}

impl Instance {
    pub fn new(id: Uuid, state: RuntimeState) -> Self {
        Self {
            id,
            state: InstanceLock(Mutex::new(state)),
            launch_settled: Notify::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock()
    }

    pub fn status(&self) -> InstanceStatus {
        self.lock().status
    }
}

pub struct RuntimeState {
    pub status: InstanceStatus,
    /// cause of the last `Error` / `Crashed` transition
    pub error: Option<String>,
    /// bumped on every start so stale exit watchers can tell they are stale
    pub launch_id: u64,
    /// an operator stop is in progress
    pub stopping: bool,
    /// removed from the registry; every further operation fails
    pub deleted: bool,
    pub process: Option<ProcessHandle>,
    pub metrics: InstanceProcessMetrics,
    pub console: ConsoleBuffer,
    pub roster: Roster,
    pub polling: PollingState,
    pub disabled_dirs: Vec<DisabledDir>,
    pub restart: Option<RestartTimer>,
}

impl RuntimeState {
    pub fn new(status: InstanceStatus, supervisor: &SupervisorConfig, latency: LatencySupport) -> Self {
        Self {
            status,
            error: None,
            launch_id: 0,
            stopping: false,
            deleted: false,
            process: None,
            metrics: InstanceProcessMetrics::default(),
            console: ConsoleBuffer::new(
                supervisor.console_buffer_size,
                supervisor.console_trim_batch,
                supervisor.subscriber_capacity,
            ),
            roster: Roster::default(),
            polling: PollingState::new(latency),
            disabled_dirs: vec![],
            restart: None,
        }
    }

    /// Drops everything tied to a process lifetime.
    pub fn clear_live_state(&mut self) {
        self.metrics = InstanceProcessMetrics::default();
        self.roster.clear();
        let latency = self.polling.latency.clone();
        self.polling = PollingState::new(latency);
    }

    pub fn abort_restart(&mut self) -> bool {
        match self.restart.take() {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn restart_at(&self) -> Option<DateTime<Utc>> {
        self.restart.as_ref().map(|timer| timer.at)
    }
}

/// Handles of a running child process. The child itself is owned by its exit watcher.
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    pub input_encoding: Encoding,
    /// asks the exit watcher to terminate the process tree
    pub kill: Arc<Notify>,
    /// flips to `true` once, after exit reconciliation
    pub exited: watch::Receiver<bool>,
    /// wakes the monitor loop early
    pub wakeup: Arc<Notify>,
}

impl ProcessHandle {
    pub fn sink(&self) -> CommandSink {
        CommandSink {
            stdin: self.stdin.clone(),
            encoding: self.input_encoding,
        }
    }
}

#[derive(Clone)]
pub struct CommandSink {
    stdin: Arc<tokio::sync::Mutex<ChildStdin>>,
    encoding: Encoding,
}

impl CommandSink {
    /// Writes `text` plus a line terminator to the process.
    pub async fn send(&self, text: &str) -> std::io::Result<()> {
        let mut bytes = self.encoding.encode(text);
        bytes.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&bytes).await?;
        stdin.flush().await
    }
}

/// A plugin/mod directory renamed away for a safe-mode start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisabledDir {
    pub original: PathBuf,
    pub disabled: PathBuf,
}

pub struct RestartTimer {
    pub token: u64,
    pub at: DateTime<Utc>,
    pub task: JoinHandle<()>,
}
