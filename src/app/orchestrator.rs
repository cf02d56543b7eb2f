use super::state::ResourceRegistry;
use super::types::{Phase, ShutdownReason};
use crate::config::DevstackConfig;
use crate::endpoint::Endpoints;
use crate::error::Result;
use crate::infra::{
    AutoConfirm, ComposeLifecycle, Confirm, InfraLifecycle, InfrastructureSupervisor,
    TerminalPrompt,
};
use crate::process::{HealthChecker, LogSink, ProcessSupervisor};
use crate::provision::{CommandProvisioner, Provisioner};
use crate::readiness::{ReadinessCheck, ServiceProbe};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Pluggable collaborators of the orchestrator
pub struct Components {
    pub probe: Arc<dyn ReadinessCheck>,
    pub lifecycle: Arc<dyn InfraLifecycle>,
    pub confirm: Arc<dyn Confirm>,
    pub provisioner: Arc<dyn Provisioner>,
    pub log_sink: LogSink,
}

impl Components {
    /// Real probe, compose lifecycle and command provisioner built from configuration
    pub fn from_config(config: &DevstackConfig, assume_yes: bool) -> Self {
        let confirm: Arc<dyn Confirm> = if assume_yes || config.infra.auto_confirm {
            Arc::new(AutoConfirm)
        } else {
            Arc::new(TerminalPrompt::new(config.budget.prompt_timeout()))
        };

        Self {
            probe: Arc::new(ServiceProbe::new(config.budget.clone())),
            lifecycle: Arc::new(ComposeLifecycle::from_config(&config.infra, &config.budget)),
            confirm,
            provisioner: Arc::new(CommandProvisioner::new(
                &config.provisioning,
                &config.database.schema,
                &config.budget,
            )),
            log_sink: LogSink::Tracing,
        }
    }
}

/// Brings up infrastructure and both gateway workers, keeps them running and
/// tears everything down on a signal or a failure.
pub struct DevstackOrchestrator {
    pub(super) config: DevstackConfig,
    pub(super) endpoints: Endpoints,
    pub(super) run_id: Uuid,

    // Collaborators
    pub(super) infra: InfrastructureSupervisor,
    pub(super) provisioner: Arc<dyn Provisioner>,
    pub(super) supervisor: ProcessSupervisor,
    pub(super) health: HealthChecker,
    pub(super) coordinator: ShutdownCoordinator,
    pub(super) log_sink: LogSink,

    // Lifecycle management
    pub(super) registry: ResourceRegistry,
    pub(super) phase: watch::Sender<Phase>,
    pub(super) shutdown_sender: mpsc::Sender<ShutdownReason>,
    pub(super) shutdown_receiver: Option<mpsc::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,

    // OS signals, by name, and the escape hatch a repeated signal pulls
    pub(super) signal_sender: mpsc::UnboundedSender<&'static str>,
    pub(super) signal_receiver: Option<mpsc::UnboundedReceiver<&'static str>>,
    pub(super) force_quit: CancellationToken,
}

impl DevstackOrchestrator {
    /// Create an orchestrator wired to the real infrastructure clients
    pub fn new(config: DevstackConfig, assume_yes: bool) -> Result<Self> {
        let components = Components::from_config(&config, assume_yes);
        Self::with_components(config, components)
    }

    pub fn with_components(config: DevstackConfig, components: Components) -> Result<Self> {
        let endpoints = Endpoints::from_config(&config.database, &config.broker);
        let (shutdown_sender, shutdown_receiver) = mpsc::channel(8);
        let (signal_sender, signal_receiver) = mpsc::unbounded_channel();
        let (phase, _) = watch::channel(Phase::Init);

        let infra = InfrastructureSupervisor::new(
            endpoints.clone(),
            components.probe,
            components.lifecycle,
            components.confirm,
            config.budget.clone(),
        );
        let health = HealthChecker::new(&config.budget)?;
        let coordinator =
            ShutdownCoordinator::new(config.budget.clone()).with_port_sweep(config.shutdown.port_sweep);

        Ok(Self {
            endpoints,
            run_id: Uuid::new_v4(),
            infra,
            provisioner: components.provisioner,
            supervisor: ProcessSupervisor::new(),
            health,
            coordinator,
            log_sink: components.log_sink,
            registry: ResourceRegistry::default(),
            phase,
            shutdown_sender,
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
            signal_sender,
            signal_receiver: Some(signal_receiver),
            force_quit: CancellationToken::new(),
            config,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Sender that stops a running orchestrator, e.g. from a test or an embedding binary
    pub fn shutdown_trigger(&self) -> mpsc::Sender<ShutdownReason> {
        self.shutdown_sender.clone()
    }

    /// Follow phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }
}
