use super::types::Phase;
use super::DevstackOrchestrator;
use crate::error::{DevstackError, Result};
use crate::process::{HealthVerdict, ProcessExit, ProcessSupervisor, WorkerRole};
use tracing::{error, info, warn};

impl DevstackOrchestrator {
    /// Bring the stack from `Init` to `Verified`.
    ///
    /// Anything started before a failure stays in the registry so the
    /// following shutdown can stop it.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting development stack (run {})", self.run_id);

        self.infra.ensure_running().await?;
        self.registry
            .set_infra_started(self.infra.started_infrastructure());
        self.set_phase(Phase::InfraReady);

        self.provisioner.provision(&self.endpoints).await?;
        self.set_phase(Phase::Provisioned);

        self.start_gateways().await?;
        self.set_phase(Phase::GatewaysStarted);

        self.verify_gateways().await?;
        self.set_phase(Phase::Verified);

        Ok(())
    }

    /// Start workers in order. A worker that fails to start takes its
    /// already running siblings down with it before the error propagates.
    async fn start_gateways(&mut self) -> Result<()> {
        for role in WorkerRole::ALL {
            let worker = role.config(&self.config.workers).clone();
            match self.supervisor.start(role, &worker, &self.endpoints) {
                Ok(process) => self.register(role, process),
                Err(e) => {
                    error!("{}", e);
                    if !self.registry.roles().is_empty() {
                        warn!("Stopping workers started before the failure");
                        self.stop_workers().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn verify_gateways(&self) -> Result<()> {
        let attempts = self.config.budget.health_max_attempts;

        for role in WorkerRole::ALL {
            if let Some(exit) = self.registry.get(role).and_then(|p| p.exit_status()) {
                let message = match exit {
                    ProcessExit::Exited(status) => format!("exited during startup with {}", status),
                    ProcessExit::WaitFailed(reason) => reason,
                };
                return Err(DevstackError::process_start(role.as_str(), message));
            }

            let url = ProcessSupervisor::health_url(role.config(&self.config.workers));
            match self
                .health
                .verify_healthy_with_retries(role.as_str(), &url, attempts)
                .await
            {
                Ok(HealthVerdict::Healthy(report)) => {
                    info!("{} worker verified: {} check(s) ok", role, report.checks.len())
                }
                Ok(HealthVerdict::Legacy) => info!("{} worker verified", role),
                Err(e) => {
                    if let DevstackError::HealthCheckFailure { failing_checks, .. } = &e {
                        for check in failing_checks {
                            error!("{} worker check failing: {}", role, check);
                        }
                    }
                    return Err(e);
                }
            }
        }

        Ok(())
    }
}
