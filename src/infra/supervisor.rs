use super::compose::InfraLifecycle;
use super::prompt::Confirm;
use crate::config::TimeBudget;
use crate::endpoint::{Endpoints, ServiceEndpoint};
use crate::error::{DevstackError, Result};
use crate::readiness::{Readiness, ReadinessCheck};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Makes sure the database and broker are up, starting them if needed.
///
/// Remembers whether it started the stack itself, in which case it is the one
/// responsible for stopping it again.
pub struct InfrastructureSupervisor {
    endpoints: Endpoints,
    probe: Arc<dyn ReadinessCheck>,
    lifecycle: Arc<dyn InfraLifecycle>,
    confirm: Arc<dyn Confirm>,
    budget: TimeBudget,
    started: bool,
}

impl InfrastructureSupervisor {
    pub fn new(
        endpoints: Endpoints,
        probe: Arc<dyn ReadinessCheck>,
        lifecycle: Arc<dyn InfraLifecycle>,
        confirm: Arc<dyn Confirm>,
        budget: TimeBudget,
    ) -> Self {
        Self {
            endpoints,
            probe,
            lifecycle,
            confirm,
            budget,
            started: false,
        }
    }

    /// True when this supervisor started the stack
    pub fn started_infrastructure(&self) -> bool {
        self.started
    }

    pub fn lifecycle(&self) -> Arc<dyn InfraLifecycle> {
        Arc::clone(&self.lifecycle)
    }

    pub async fn ensure_running(&mut self) -> Result<()> {
        if self.all_ready().await {
            info!("Infrastructure already running");
            return Ok(());
        }

        if !self.lifecycle.is_available() {
            return Err(DevstackError::infrastructure(format!(
                "{} and {} are not reachable and no {} was found to start them",
                self.endpoints.database,
                self.endpoints.broker,
                self.lifecycle.describe()
            )));
        }

        let question = format!(
            "Infrastructure is not running. Start {}?",
            self.lifecycle.describe()
        );
        if !self.confirm.confirm(&question).await {
            return Err(DevstackError::infrastructure(
                "starting infrastructure was declined",
            ));
        }

        // Set before the command runs: an interrupted start still needs a stop
        self.started = true;
        if let Err(e) = self.lifecycle.start().await {
            error!("Failed to start infrastructure: {}", e);
            self.revert().await;
            return Err(e);
        }

        match self.wait_until_ready().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("{}", e);
                self.revert().await;
                Err(e)
            }
        }
    }

    /// Stop the stack if this supervisor started it
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            debug!("Infrastructure was not started here, leaving it running");
            return Ok(());
        }

        self.lifecycle.stop().await?;
        self.started = false;
        Ok(())
    }

    /// Record that the stack was stopped by someone holding the lifecycle handle
    pub fn mark_stopped(&mut self) {
        self.started = false;
    }

    async fn revert(&mut self) {
        warn!("Reverting infrastructure start");
        match self.lifecycle.stop().await {
            Ok(()) => self.started = false,
            Err(e) => error!("Failed to stop infrastructure: {}", e),
        }
    }

    async fn all_ready(&self) -> bool {
        for endpoint in self.endpoints.iter() {
            let readiness = self.probe.check(endpoint).await;
            if !readiness.is_ready() {
                debug!("{} {}", endpoint, readiness);
                return false;
            }
        }
        true
    }

    async fn wait_until_ready(&self) -> Result<()> {
        let started = Instant::now();
        let limit = self.budget.infra_readiness();
        let mut pending: Vec<String> = self.endpoints.iter().map(|e| e.to_string()).collect();

        let polled = timeout(limit, self.poll(&mut pending, started)).await;

        match polled {
            Ok(()) => {
                info!("Infrastructure ready after {:.1}s", started.elapsed().as_secs_f64());
                Ok(())
            }
            Err(_) => Err(DevstackError::ReadinessTimeout {
                waited: limit,
                message: pending.join("; "),
            }),
        }
    }

    async fn poll(&self, pending: &mut Vec<String>, started: Instant) {
        let mut ready = [false; 2];
        let endpoints: [&ServiceEndpoint; 2] = [&self.endpoints.database, &self.endpoints.broker];
        let mut iteration: u32 = 0;

        loop {
            iteration += 1;
            let mut reasons = Vec::new();

            for (index, endpoint) in endpoints.iter().enumerate() {
                if ready[index] {
                    continue;
                }

                // Cheap TCP check first; the probe opens real client connections
                if !endpoint.is_reachable(self.budget.tcp_connect_timeout()).await {
                    reasons.push(format!("{}: not listening", endpoint));
                    continue;
                }

                match self.probe.check(endpoint).await {
                    Readiness::Ready => {
                        info!("{} is ready", endpoint);
                        ready[index] = true;
                    }
                    Readiness::NotReady(reason) => reasons.push(format!("{}: {}", endpoint, reason)),
                }
            }

            if reasons.is_empty() {
                pending.clear();
                return;
            }

            if is_progress_iteration(iteration, self.budget.infra_progress_every) {
                info!(
                    "Waiting for infrastructure ({:.0}s elapsed): {}",
                    started.elapsed().as_secs_f64(),
                    reasons.join("; ")
                );
            }
            *pending = reasons;

            sleep(self.budget.infra_poll_interval()).await;
        }
    }
}

/// Progress is reported on every `every`-th poll, not each one
pub(super) fn is_progress_iteration(iteration: u32, every: u32) -> bool {
    iteration % every.max(1) == 0
}
