use crate::config::{InfraConfig, TimeBudget};
use crate::error::{DevstackError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

/// External start/stop commands for the infrastructure stack.
///
/// Both operations are idempotent: stopping a stopped stack is not an error.
#[async_trait]
pub trait InfraLifecycle: Send + Sync {
    fn describe(&self) -> String;

    /// Whether the lifecycle descriptor exists at all
    fn is_available(&self) -> bool {
        true
    }

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// `docker compose` project in a directory
#[derive(Debug, Clone)]
pub struct ComposeLifecycle {
    command: String,
    project_dir: PathBuf,
    compose_file: String,
    project_name: String,
    command_timeout: Duration,
}

impl ComposeLifecycle {
    pub fn from_config(infra: &InfraConfig, budget: &TimeBudget) -> Self {
        Self {
            command: infra.compose_command.clone(),
            project_dir: infra.compose_dir.clone(),
            compose_file: infra.compose_file.clone(),
            project_name: infra.project_name.clone(),
            command_timeout: budget.compose_command_timeout(),
        }
    }

    pub fn compose_path(&self) -> PathBuf {
        self.project_dir.join(&self.compose_file)
    }

    async fn run(&self, action: &[&str]) -> Result<()> {
        let compose_path = self.compose_path();
        debug!(
            "Running {} compose {} for {}",
            self.command,
            action.join(" "),
            compose_path.display()
        );

        let output = timeout(
            self.command_timeout,
            Command::new(&self.command)
                .arg("compose")
                .arg("-f")
                .arg(&compose_path)
                .arg("-p")
                .arg(&self.project_name)
                .args(action)
                .current_dir(&self.project_dir)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            DevstackError::infrastructure(format!(
                "'{} compose {}' did not finish within {:?}",
                self.command,
                action.join(" "),
                self.command_timeout
            ))
        })??;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DevstackError::infrastructure(format!(
                "'{} compose {}' failed ({}): {}",
                self.command,
                action.join(" "),
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl InfraLifecycle for ComposeLifecycle {
    fn describe(&self) -> String {
        format!(
            "compose project '{}' ({})",
            self.project_name,
            self.compose_path().display()
        )
    }

    fn is_available(&self) -> bool {
        self.compose_path().is_file()
    }

    async fn start(&self) -> Result<()> {
        info!("Starting {}", self.describe());
        self.run(&["up", "-d"]).await
    }

    async fn stop(&self) -> Result<()> {
        info!("Stopping {}", self.describe());
        self.run(&["down"]).await
    }
}
