use super::managed::ManagedProcess;
use crate::config::{WorkerConfig, WorkersConfig};
use crate::endpoint::Endpoints;
use crate::error::Result;
use std::fmt;
use tokio::process::Command;
use tracing::info;

/// The two gateway roles the orchestrator runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerRole {
    Ingest,
    Streaming,
}

impl WorkerRole {
    /// Start order
    pub const ALL: [WorkerRole; 2] = [WorkerRole::Ingest, WorkerRole::Streaming];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Ingest => "ingest",
            WorkerRole::Streaming => "streaming",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        WorkerRole::ALL.into_iter().find(|role| role.as_str() == label)
    }

    pub fn config<'a>(&self, workers: &'a WorkersConfig) -> &'a WorkerConfig {
        match self {
            WorkerRole::Ingest => &workers.ingest,
            WorkerRole::Streaming => &workers.streaming,
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Launches gateway workers with their port and endpoint contract
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Start a worker listening on `worker.port`.
    ///
    /// Port and connection strings are passed both as environment variables
    /// and as flags; workers may read either.
    pub fn start(
        &self,
        role: WorkerRole,
        worker: &WorkerConfig,
        endpoints: &Endpoints,
    ) -> Result<ManagedProcess> {
        let command = Self::worker_command(worker, endpoints);
        let process = ManagedProcess::spawn(role.as_str(), command, Some(worker.port))?;

        info!(
            "Started {} worker (pid {}) on port {}",
            role,
            process.pid(),
            worker.port
        );
        Ok(process)
    }

    pub fn worker_command(worker: &WorkerConfig, endpoints: &Endpoints) -> Command {
        let port = worker.port.to_string();
        let database_url = endpoints.database.connection_string();
        let brokers = endpoints.broker.connection_string();

        let mut command = Command::new(&worker.program);
        command
            .args(&worker.args)
            .arg("--port")
            .arg(&port)
            .arg("--database-url")
            .arg(database_url)
            .arg("--kafka-brokers")
            .arg(brokers)
            .env("PORT", &port)
            .env("HTTP_PORT", &port)
            .env("DATABASE_URL", database_url)
            .env("KAFKA_BROKERS", brokers);
        command
    }

    /// URL of a worker's health endpoint
    pub fn health_url(worker: &WorkerConfig) -> String {
        let path = if worker.health_path.starts_with('/') {
            worker.health_path.clone()
        } else {
            format!("/{}", worker.health_path)
        };
        format!("http://{}:{}{}", worker.host, worker.port, path)
    }
}
