use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DevstackError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Infrastructure not ready within {waited:?}: {message}")]
    ReadinessTimeout { waited: Duration, message: String },

    #[error("Failed to start {role} worker: {message}")]
    ProcessStartFailure { role: String, message: String },

    #[error("{role} worker failed health verification: {message}")]
    HealthCheckFailure {
        role: String,
        message: String,
        failing_checks: Vec<String>,
    },

    #[error("{role} did not confirm termination after {waited:?}: {detail}")]
    ShutdownTimeout {
        role: String,
        waited: Duration,
        detail: String,
    },

    #[error("Shutdown incomplete for: {}", failed.join(", "))]
    PartialShutdownFailure { failed: Vec<String> },

    #[error("Infrastructure error: {message}")]
    Infrastructure { message: String },

    #[error("Provisioning error: {message}")]
    Provisioning { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] rdkafka::error::KafkaError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("System error: {message}")]
    System { message: String },
}

impl DevstackError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn infrastructure<S: Into<String>>(message: S) -> Self {
        Self::Infrastructure {
            message: message.into(),
        }
    }

    pub fn provisioning<S: Into<String>>(message: S) -> Self {
        Self::Provisioning {
            message: message.into(),
        }
    }

    pub fn process_start<R: Into<String>, S: Into<String>>(role: R, message: S) -> Self {
        Self::ProcessStartFailure {
            role: role.into(),
            message: message.into(),
        }
    }

    /// Errors raised during teardown are recorded per resource and never abort
    /// the cleanup of siblings.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ShutdownTimeout { .. } | Self::PartialShutdownFailure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DevstackError>;
