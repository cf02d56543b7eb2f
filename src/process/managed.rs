use super::logs::{self, LogLine, LogSink, OutputStream};
use super::signal;
use crate::error::{DevstackError, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle of a worker owned by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Terminating,
    Stopped,
}

/// How a worker process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(ExitStatus),
    WaitFailed(String),
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Exited(status) => write!(f, "{}", status),
            ProcessExit::WaitFailed(reason) => write!(f, "wait failed: {}", reason),
        }
    }
}

/// A running worker process.
///
/// The child itself is owned by a reaper task which publishes the exit status.
/// Both output pipes are drained from the moment of spawn; lines are buffered
/// until [`ManagedProcess::stream_logs`] attaches a sink. Dropping the
/// `ManagedProcess` aborts the reaper, which kills the child, and kills the
/// rest of its process group if it has not exited yet.
pub struct ManagedProcess {
    role: String,
    pid: u32,
    port: Option<u16>,
    started_at: DateTime<Utc>,
    state: ProcessState,
    output: Option<mpsc::UnboundedReceiver<LogLine>>,
    readers: Vec<JoinHandle<()>>,
    exit: watch::Receiver<Option<ProcessExit>>,
    reaper: JoinHandle<()>,
}

impl ManagedProcess {
    /// Spawn `command` as the leader of a new process group with both output
    /// streams captured.
    ///
    /// Missing either stream is a start failure; the half-started child is
    /// killed when it goes out of scope.
    pub fn spawn(role: &str, mut command: Command, port: Option<u16>) -> Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Keeps terminal Ctrl+C away from workers and lets shutdown signal the whole tree
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| DevstackError::process_start(role, format!("spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DevstackError::process_start(role, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DevstackError::process_start(role, "stderr not captured"))?;
        let pid = child
            .id()
            .ok_or_else(|| DevstackError::process_start(role, "process exited before it was registered"))?;

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let readers = vec![
            tokio::spawn(logs::read_lines(
                stdout,
                role.to_string(),
                OutputStream::Stdout,
                line_tx.clone(),
            )),
            tokio::spawn(logs::read_lines(
                stderr,
                role.to_string(),
                OutputStream::Stderr,
                line_tx,
            )),
        ];

        let (exit_tx, exit_rx) = watch::channel(None);
        let reaper_role = role.to_string();
        let reaper = tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit::Exited(status),
                Err(e) => ProcessExit::WaitFailed(e.to_string()),
            };
            debug!("{} worker (pid {}) exited: {}", reaper_role, pid, exit);
            exit_tx.send_replace(Some(exit));
        });

        Ok(Self {
            role: role.to_string(),
            pid,
            port,
            started_at: Utc::now(),
            state: ProcessState::Running,
            output: Some(line_rx),
            readers,
            exit: exit_rx,
            reaper,
        })
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn set_state(&mut self, state: ProcessState) {
        debug!("{} worker state: {:?} -> {:?}", self.role, self.state, state);
        self.state = state;
    }

    /// Exit status, if the process has already ended
    pub fn exit_status(&self) -> Option<ProcessExit> {
        self.exit.borrow().clone()
    }

    /// Read-only handle for shutdown and exit watching
    pub fn handle(&self) -> ProcessHandle {
        ProcessHandle {
            role: self.role.clone(),
            pid: Some(self.pid),
            port: self.port,
            exit: Some(self.exit.clone()),
        }
    }

    /// Forward buffered and future output lines of both streams to `sink`.
    ///
    /// Output can be attached once; later calls return `None`.
    pub fn stream_logs(&mut self, sink: LogSink) -> Option<JoinHandle<()>> {
        match self.output.take() {
            Some(lines) => Some(tokio::spawn(logs::forward_lines(lines, sink))),
            None => {
                warn!("{} worker output is already being streamed", self.role);
                None
            }
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.exit.borrow().is_none() {
            if let Err(e) = signal::force_kill_group(self.pid) {
                if !signal::is_no_such_process(&e) {
                    debug!("Could not kill process group {}: {}", self.pid, e);
                }
            }
        }
        self.reaper.abort();
        for reader in &self.readers {
            reader.abort();
        }
    }
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("role", &self.role)
            .field("pid", &self.pid)
            .field("port", &self.port)
            .field("started_at", &self.started_at)
            .field("state", &self.state)
            .finish()
    }
}

/// Cloneable, read-only view of a worker: what the shutdown ladder needs
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub role: String,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    exit: Option<watch::Receiver<Option<ProcessExit>>>,
}

impl ProcessHandle {
    /// A handle for a worker whose process handle was lost; only its port is known
    pub fn detached(role: &str, port: Option<u16>) -> Self {
        Self {
            role: role.to_string(),
            pid: None,
            port,
            exit: None,
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exit
            .as_ref()
            .map(|exit| exit.borrow().is_some())
            .unwrap_or(false)
    }

    /// Resolve once the supervisor reports the process has exited.
    ///
    /// Without an exit channel this never resolves; callers race it against a timer.
    pub async fn wait_for_exit(&mut self) -> Option<ProcessExit> {
        match self.exit.as_mut() {
            Some(exit) => match exit.wait_for(|status| status.is_some()).await {
                Ok(status) => status.clone(),
                Err(_) => None,
            },
            None => std::future::pending().await,
        }
    }

    /// Zero-cost existence probe on the pid
    pub fn is_alive(&self) -> bool {
        self.pid.map(signal::is_process_running).unwrap_or(false)
    }
}
