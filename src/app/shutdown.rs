use super::types::{Phase, ShutdownReason, ShutdownReport};
use super::DevstackOrchestrator;
use crate::error::DevstackError;
use crate::process::{signal, ProcessState, WorkerRole};
use crate::shutdown::{ShutdownOutcome, ShutdownResource, INFRASTRUCTURE_LABEL};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

impl DevstackOrchestrator {
    /// Stop every started resource concurrently within the overall budget.
    ///
    /// Works from whatever partial state the registry holds. Infrastructure is
    /// stopped only when this orchestrator started it. Failures are reported,
    /// never raised. A force quit abandons the ladders and kills what is left.
    pub async fn shutdown(&mut self, reason: ShutdownReason) -> ShutdownReport {
        self.set_phase(Phase::ShuttingDown);
        match &reason {
            ShutdownReason::Error(message) => error!("Shutting down after error: {}", message),
            other => info!("Shutdown initiated: {:?}", other),
        }

        self.cancellation_token.cancel();
        // Startup may have been interrupted after infrastructure came up
        self.registry
            .set_infra_started(self.infra.started_infrastructure());

        let started = Instant::now();
        let force_quit = self.force_quit.clone();
        let stopped = tokio::select! {
            outcomes = self.stop_resources(true) => Some(outcomes),
            _ = force_quit.cancelled() => None,
        };
        let outcomes = match stopped {
            Some(outcomes) => outcomes,
            None => self.force_quit_resources(started.elapsed()),
        };

        let report = ShutdownReport { reason, outcomes };
        let failed = report.failed();
        if failed.is_empty() {
            info!("Shutdown complete");
        } else {
            let err = DevstackError::PartialShutdownFailure { failed };
            if err.is_fatal() {
                error!("{}", err);
            } else {
                warn!("{}", err);
            }
        }

        self.set_phase(Phase::Terminated);
        info!("Exiting with code {}", report.exit_code());
        report
    }

    /// Stop registered workers only, leaving infrastructure up
    pub(super) async fn stop_workers(&mut self) -> Vec<ShutdownOutcome> {
        self.stop_resources(false).await
    }

    async fn stop_resources(&mut self, include_infra: bool) -> Vec<ShutdownOutcome> {
        self.mark_terminating();

        let mut resources: Vec<ShutdownResource> = self
            .registry
            .handles()
            .into_iter()
            .map(ShutdownResource::Process)
            .collect();
        if include_infra && self.registry.infra_started() {
            resources.push(ShutdownResource::Infrastructure(self.infra.lifecycle()));
        }

        if resources.is_empty() {
            info!("Nothing to shut down");
            return Vec::new();
        }

        let outcomes = self.coordinator.shutdown_all(resources).await;
        for outcome in &outcomes {
            outcome.log();
            if outcome.succeeded {
                self.forget(&outcome.role);
            }
        }
        outcomes
    }

    /// SIGKILL every registered worker group and report nothing as confirmed
    fn force_quit_resources(&mut self, elapsed: Duration) -> Vec<ShutdownOutcome> {
        let mut outcomes = Vec::new();
        for process in self.registry.processes_mut() {
            let pid = process.pid();
            if let Err(e) = signal::force_kill_group(pid) {
                if !signal::is_no_such_process(&e) {
                    warn!("Failed to kill {} worker group {}: {}", process.role(), pid, e);
                }
            }
            outcomes.push(ShutdownOutcome::failed(
                process.role(),
                elapsed,
                "killed by force quit, exit not confirmed",
            ));
        }
        if self.registry.infra_started() {
            outcomes.push(ShutdownOutcome::failed(
                INFRASTRUCTURE_LABEL,
                elapsed,
                "force quit before infrastructure was stopped",
            ));
        }

        for outcome in &outcomes {
            outcome.log();
        }
        outcomes
    }

    /// Drop a resource from the registry once it is confirmed stopped
    fn forget(&mut self, label: &str) {
        if label == INFRASTRUCTURE_LABEL {
            self.registry.set_infra_started(false);
            self.infra.mark_stopped();
        } else if let Some(role) = WorkerRole::from_label(label) {
            if let Some(mut process) = self.registry.remove(role) {
                process.set_state(ProcessState::Stopped);
            }
        }
    }
}
