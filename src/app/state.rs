use super::types::Phase;
use super::DevstackOrchestrator;
use crate::process::{ManagedProcess, ProcessHandle, ProcessState, WorkerRole};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Everything the orchestrator started and therefore has to stop.
///
/// A role owns at most one process. Only the orchestrator writes here; the
/// shutdown coordinator works from read-only handles.
#[derive(Default)]
pub struct ResourceRegistry {
    processes: BTreeMap<WorkerRole, ManagedProcess>,
    infra_started: bool,
}

impl ResourceRegistry {
    /// Register a started worker, handing back any process the role already had
    pub fn insert(&mut self, role: WorkerRole, process: ManagedProcess) -> Option<ManagedProcess> {
        self.processes.insert(role, process)
    }

    pub fn remove(&mut self, role: WorkerRole) -> Option<ManagedProcess> {
        self.processes.remove(&role)
    }

    pub fn get(&self, role: WorkerRole) -> Option<&ManagedProcess> {
        self.processes.get(&role)
    }

    pub fn roles(&self) -> Vec<WorkerRole> {
        self.processes.keys().copied().collect()
    }

    pub fn processes_mut(&mut self) -> impl Iterator<Item = &mut ManagedProcess> {
        self.processes.values_mut()
    }

    pub fn handles(&self) -> Vec<ProcessHandle> {
        self.processes.values().map(ManagedProcess::handle).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty() && !self.infra_started
    }

    pub fn infra_started(&self) -> bool {
        self.infra_started
    }

    pub fn set_infra_started(&mut self, started: bool) {
        self.infra_started = started;
    }
}

impl DevstackOrchestrator {
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub(super) fn set_phase(&self, phase: Phase) {
        let previous = self.phase();
        if phase < previous {
            warn!("Ignoring phase change from {} back to {}", previous, phase);
            return;
        }
        if phase != previous {
            info!("Phase: {} -> {}", previous, phase);
            self.phase.send_replace(phase);
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Record a started worker
    pub(super) fn register(&mut self, role: WorkerRole, process: ManagedProcess) {
        debug!(
            "Registered {} worker (pid {}, started {})",
            role,
            process.pid(),
            process.started_at().to_rfc3339()
        );
        if let Some(previous) = self.registry.insert(role, process) {
            // Dropping the old handle kills the process it owned
            warn!(
                "Replaced existing {} worker (pid {}) in registry",
                role,
                previous.pid()
            );
        }
    }

    /// Mark every registered worker as being torn down
    pub(super) fn mark_terminating(&mut self) {
        for process in self.registry.processes_mut() {
            process.set_state(ProcessState::Terminating);
        }
    }
}
