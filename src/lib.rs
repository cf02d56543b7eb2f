pub mod app;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod infra;
pub mod process;
pub mod provision;
pub mod readiness;
pub mod shutdown;

#[cfg(test)]
mod test_support;

pub use app::{Components, DevstackOrchestrator, Phase, ShutdownReason, ShutdownReport};
pub use config::{DevstackConfig, TimeBudget};
pub use endpoint::{EndpointKind, Endpoints, ServiceEndpoint};
pub use error::{DevstackError, Result};
pub use infra::{ComposeLifecycle, InfraLifecycle, InfrastructureSupervisor};
pub use process::{HealthChecker, ManagedProcess, ProcessHandle, ProcessSupervisor, WorkerRole};
pub use readiness::{Readiness, ReadinessCheck, ServiceProbe};
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownResource};
