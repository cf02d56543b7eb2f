use crate::config::{ProvisioningConfig, TimeBudget};
use crate::endpoint::Endpoints;
use crate::error::{DevstackError, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

/// Migrations and other one-shot setup run once infrastructure is ready
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, endpoints: &Endpoints) -> Result<()>;
}

/// Ensures the schema exists, then runs the configured commands in order
pub struct CommandProvisioner {
    ensure_schema: Option<String>,
    commands: Vec<String>,
    step_timeout: Duration,
}

impl CommandProvisioner {
    pub fn new(config: &ProvisioningConfig, schema: &str, budget: &TimeBudget) -> Self {
        Self {
            ensure_schema: config.ensure_schema.then(|| schema.to_string()),
            commands: config.commands.clone(),
            step_timeout: budget.provisioning_timeout(),
        }
    }

    async fn create_schema(&self, endpoints: &Endpoints, schema: &str) -> Result<()> {
        let statement = format!(
            "CREATE SCHEMA IF NOT EXISTS \"{}\"",
            schema.replace('"', "\"\"")
        );

        let create = async {
            let mut conn = PgConnection::connect(endpoints.database.connection_string()).await?;
            sqlx::query(&statement).execute(&mut conn).await?;
            conn.close().await?;
            Ok::<_, DevstackError>(())
        };

        timeout(self.step_timeout, create).await.map_err(|_| {
            DevstackError::provisioning(format!("creating schema '{}' timed out", schema))
        })??;

        info!("Schema '{}' is in place", schema);
        Ok(())
    }

    async fn run_command(&self, line: &str, endpoints: &Endpoints) -> Result<()> {
        let mut parts = line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| DevstackError::provisioning("empty provisioning command"))?;

        info!("Provisioning: {}", line);
        let output = timeout(
            self.step_timeout,
            Command::new(program)
                .args(parts)
                .env("DATABASE_URL", endpoints.database.connection_string())
                .env("KAFKA_BROKERS", endpoints.broker.connection_string())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            DevstackError::provisioning(format!(
                "'{}' did not finish within {:?}",
                line, self.step_timeout
            ))
        })?
        .map_err(|e| DevstackError::provisioning(format!("'{}' could not be started: {}", line, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for out_line in stdout.lines() {
            debug!("[{}] {}", program, out_line);
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(DevstackError::provisioning(format!(
                "'{}' exited with {}: {}",
                line,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn provision(&self, endpoints: &Endpoints) -> Result<()> {
        if let Some(schema) = &self.ensure_schema {
            self.create_schema(endpoints, schema).await?;
        }

        for line in &self.commands {
            self.run_command(line, endpoints).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DevstackConfig;

    fn provisioner(commands: &[&str]) -> (CommandProvisioner, Endpoints) {
        let config = DevstackConfig::default();
        let provisioning = ProvisioningConfig {
            ensure_schema: false,
            commands: commands.iter().map(|c| c.to_string()).collect(),
        };
        (
            CommandProvisioner::new(&provisioning, &config.database.schema, &config.budget),
            Endpoints::from_config(&config.database, &config.broker),
        )
    }

    #[tokio::test]
    async fn test_commands_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("steps.log");
        let script = dir.path().join("step.sh");
        std::fs::write(&script, format!("echo \"$1 $DATABASE_URL\" >> {}\n", log.display())).unwrap();

        let migrate = format!("sh {} migrate", script.display());
        let seed = format!("sh {} seed", script.display());
        let (provisioner, endpoints) = provisioner(&[&migrate, &seed]);

        provisioner.provision(&endpoints).await.unwrap();

        let written = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!("migrate {}", endpoints.database.connection_string()),
                format!("seed {}", endpoints.database.connection_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_command_stops_provisioning() {
        let (provisioner, endpoints) = provisioner(&["sh -c false", "sh -c true"]);

        match provisioner.provision(&endpoints).await {
            Err(DevstackError::Provisioning { message }) => assert!(message.contains("sh -c false")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_provisioning_error() {
        let (provisioner, endpoints) = provisioner(&["/nonexistent/migrate up"]);

        assert!(matches!(
            provisioner.provision(&endpoints).await,
            Err(DevstackError::Provisioning { .. })
        ));
    }
}
