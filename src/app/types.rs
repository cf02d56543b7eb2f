use crate::shutdown::ShutdownOutcome;
use std::fmt;

/// Orchestrator lifecycle. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Init,
    InfraReady,
    Provisioned,
    GatewaysStarted,
    Verified,
    Running,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::InfraReady => "infra-ready",
            Phase::Provisioned => "provisioned",
            Phase::GatewaysStarted => "gateways-started",
            Phase::Verified => "verified",
            Phase::Running => "running",
            Phase::ShuttingDown => "shutting-down",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why the orchestrator entered shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM
    Signal(String),
    /// Programmatic stop request
    UserRequest,
    /// Startup failure or a worker that exited on its own
    Error(String),
}

impl ShutdownReason {
    pub fn is_error(&self) -> bool {
        matches!(self, ShutdownReason::Error(_))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_error() {
            1
        } else {
            0
        }
    }
}

/// What a completed shutdown did
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    pub outcomes: Vec<ShutdownOutcome>,
}

impl ShutdownReport {
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }

    /// Resources that could not be confirmed stopped
    pub fn failed(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.succeeded)
            .map(|outcome| outcome.role.clone())
            .collect()
    }
}
