use crate::error::DevstackError;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-resource state of the escalation ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderState {
    Running,
    GracefulPending,
    ForceKillPending,
    Stopped,
    TimedOut,
}

impl LadderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LadderState::Stopped | LadderState::TimedOut)
    }
}

/// Result of shutting down one resource. Emitted once, never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownOutcome {
    pub role: String,
    pub succeeded: bool,
    pub elapsed: Duration,
    pub note: String,
    pub state: LadderState,
}

impl ShutdownOutcome {
    pub(super) fn stopped<N: Into<String>>(role: &str, elapsed: Duration, note: N) -> Self {
        Self {
            role: role.to_string(),
            succeeded: true,
            elapsed,
            note: note.into(),
            state: LadderState::Stopped,
        }
    }

    pub(crate) fn failed<N: Into<String>>(role: &str, elapsed: Duration, note: N) -> Self {
        Self {
            role: role.to_string(),
            succeeded: false,
            elapsed,
            note: note.into(),
            state: LadderState::TimedOut,
        }
    }

    pub(super) fn timed_out(role: &str, elapsed: Duration) -> Self {
        Self::failed(
            role,
            elapsed,
            "timed out waiting for termination, may still be running",
        )
    }

    /// The teardown error this outcome stands for, if it failed
    pub fn error(&self) -> Option<DevstackError> {
        (!self.succeeded).then(|| DevstackError::ShutdownTimeout {
            role: self.role.clone(),
            waited: self.elapsed,
            detail: self.note.clone(),
        })
    }

    /// One operator-facing line per resource
    pub fn log(&self) {
        match self.error() {
            None => info!("{}", self),
            Some(err) if err.is_fatal() => error!("{}", err),
            Some(err) => warn!("{}", err),
        }
    }
}

impl fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.succeeded { "stopped" } else { "FAILED" };
        write!(
            f,
            "{}: {} after {:.1}s ({})",
            self.role,
            verdict,
            self.elapsed.as_secs_f64(),
            self.note
        )
    }
}
