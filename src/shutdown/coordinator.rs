use super::ladder::{run_infra_ladder, run_process_ladder};
use super::outcome::ShutdownOutcome;
use super::sweep::sweep_ports;
use crate::config::TimeBudget;
use crate::infra::InfraLifecycle;
use crate::process::ProcessHandle;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::timeout_at;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const INFRASTRUCTURE_LABEL: &str = "infrastructure";

/// Something the coordinator has to bring down
pub enum ShutdownResource {
    Process(ProcessHandle),
    Infrastructure(Arc<dyn InfraLifecycle>),
}

impl ShutdownResource {
    pub fn label(&self) -> String {
        match self {
            ShutdownResource::Process(handle) => handle.role.clone(),
            ShutdownResource::Infrastructure(_) => INFRASTRUCTURE_LABEL.to_string(),
        }
    }
}

/// Concurrent, deadline-bounded shutdown of every started resource.
///
/// Each resource runs its own ladder task; outcomes come back over a channel.
/// The coordinator never writes to the caller's registry; it only reports.
pub struct ShutdownCoordinator {
    budget: TimeBudget,
    port_sweep: bool,
}

impl ShutdownCoordinator {
    pub fn new(budget: TimeBudget) -> Self {
        Self {
            budget,
            port_sweep: false,
        }
    }

    pub fn with_port_sweep(mut self, enabled: bool) -> Self {
        self.port_sweep = enabled;
        self
    }

    /// Shut everything down and return one outcome per resource, in input order.
    ///
    /// Returns within the overall shutdown deadline no matter how many
    /// resources hang; unfinished ones are reported as timed out.
    pub async fn shutdown_all(&self, resources: Vec<ShutdownResource>) -> Vec<ShutdownOutcome> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.budget.overall_shutdown();
        let cancel = CancellationToken::new();
        let labels: Vec<String> = resources.iter().map(ShutdownResource::label).collect();

        info!(
            "Shutting down {} resource(s) within {:?}",
            labels.len(),
            self.budget.overall_shutdown()
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sweep_targets = Vec::new();

        for resource in resources {
            let tx = tx.clone();
            let token = cancel.child_token();
            match resource {
                ShutdownResource::Process(handle) => {
                    if handle.port.is_some() {
                        sweep_targets.push(handle.clone());
                    }
                    let budget = self.budget.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(run_process_ladder(handle, budget, token).await);
                    });
                }
                ShutdownResource::Infrastructure(infra) => {
                    tokio::spawn(async move {
                        let outcome =
                            run_infra_ladder(INFRASTRUCTURE_LABEL.to_string(), infra, token).await;
                        let _ = tx.send(outcome);
                    });
                }
            }
        }
        drop(tx);

        let sweep = if self.port_sweep && !sweep_targets.is_empty() {
            Some(tokio::spawn(sweep_ports(
                sweep_targets,
                self.budget.clone(),
                cancel.child_token(),
            )))
        } else {
            None
        };

        let mut outcomes = Vec::with_capacity(labels.len());
        let collected = timeout_at(deadline, async {
            while let Some(outcome) = rx.recv().await {
                debug!("Shutdown outcome received for {}", outcome.role);
                outcomes.push(outcome);
            }
            if let Some(sweep) = sweep {
                if let Err(e) = sweep.await {
                    warn!("Port sweep task failed: {}", e);
                }
            }
        })
        .await;

        if collected.is_err() {
            warn!(
                "Shutdown deadline of {:?} reached, abandoning remaining resources",
                self.budget.overall_shutdown()
            );
        }

        cancel.cancel();
        while let Ok(outcome) = rx.try_recv() {
            outcomes.push(outcome);
        }

        let elapsed = started.elapsed();
        labels
            .iter()
            .map(|label| {
                outcomes
                    .iter()
                    .position(|outcome| &outcome.role == label)
                    .map(|index| outcomes.swap_remove(index))
                    .unwrap_or_else(|| ShutdownOutcome::timed_out(label, elapsed))
            })
            .collect()
    }
}
