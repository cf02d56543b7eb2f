use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DevstackConfig {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub infra: InfraConfig,
    pub workers: WorkersConfig,
    pub provisioning: ProvisioningConfig,
    pub shutdown: ShutdownConfig,
    pub budget: TimeBudget,
}

#[derive(Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_host")]
    pub host: String,

    #[serde(default = "default_database_port")]
    pub port: u16,

    #[serde(default = "default_database_user")]
    pub user: String,

    #[serde(default = "default_database_password")]
    pub password: String,

    /// Database the workers connect to; created on first use if missing
    #[serde(default = "default_database_name")]
    pub name: String,

    /// Administrative database used to issue CREATE DATABASE
    #[serde(default = "default_admin_database")]
    pub admin_database: String,

    /// Schema ensured during provisioning
    #[serde(default = "default_database_schema")]
    pub schema: String,
}

// Keeps the password out of debug logs
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("admin_database", &self.admin_database)
            .field("schema", &self.schema)
            .finish()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InfraConfig {
    /// Directory holding the compose project
    #[serde(default = "default_compose_dir")]
    pub compose_dir: PathBuf,

    #[serde(default = "default_compose_file")]
    pub compose_file: String,

    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Container CLI invoked as `<command> compose ...`
    #[serde(default = "default_compose_command")]
    pub compose_command: String,

    /// Start infrastructure without asking
    #[serde(default)]
    pub auto_confirm: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkersConfig {
    pub ingest: WorkerConfig,
    pub streaming: WorkerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkerConfig {
    /// Executable to launch
    pub program: String,

    /// Arguments placed before the generated port/endpoint flags
    #[serde(default)]
    pub args: Vec<String>,

    /// HTTP listen port handed to the worker
    pub port: u16,

    /// Host used to reach the worker's health endpoint
    #[serde(default = "default_worker_host")]
    pub host: String,

    #[serde(default = "default_health_path")]
    pub health_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvisioningConfig {
    /// Ensure the configured schema exists before running commands
    #[serde(default)]
    pub ensure_schema: bool,

    /// Migration/provisioning command lines, run in order
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ShutdownConfig {
    /// Kill whatever still listens on worker ports once the graceful window passed
    #[serde(default = "default_port_sweep")]
    pub port_sweep: bool,
}

/// Named bounds for every wait the orchestrator performs.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TimeBudget {
    #[serde(default = "default_graceful_shutdown_ms")]
    pub graceful_shutdown_ms: u64,

    #[serde(default = "default_kill_retry_interval_ms")]
    pub kill_retry_interval_ms: u64,

    #[serde(default = "default_max_kill_retries")]
    pub max_kill_retries: u32,

    #[serde(default = "default_overall_shutdown_ms")]
    pub overall_shutdown_ms: u64,

    #[serde(default = "default_infra_readiness_ms")]
    pub infra_readiness_ms: u64,

    #[serde(default = "default_infra_poll_interval_ms")]
    pub infra_poll_interval_ms: u64,

    /// Progress is logged once every this many polling iterations
    #[serde(default = "default_infra_progress_every")]
    pub infra_progress_every: u32,

    #[serde(default = "default_tcp_connect_timeout_ms")]
    pub tcp_connect_timeout_ms: u64,

    #[serde(default = "default_db_connect_timeout_ms")]
    pub db_connect_timeout_ms: u64,

    #[serde(default = "default_db_create_retries")]
    pub db_create_retries: u32,

    #[serde(default = "default_db_create_wait_ms")]
    pub db_create_wait_ms: u64,

    #[serde(default = "default_broker_metadata_timeout_ms")]
    pub broker_metadata_timeout_ms: u64,

    #[serde(default = "default_health_request_timeout_ms")]
    pub health_request_timeout_ms: u64,

    #[serde(default = "default_health_retry_delay_ms")]
    pub health_retry_delay_ms: u64,

    #[serde(default = "default_health_max_attempts")]
    pub health_max_attempts: u32,

    #[serde(default = "default_compose_command_timeout_ms")]
    pub compose_command_timeout_ms: u64,

    #[serde(default = "default_provisioning_timeout_ms")]
    pub provisioning_timeout_ms: u64,

    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,

    #[serde(default = "default_port_sweep_timeout_ms")]
    pub port_sweep_timeout_ms: u64,
}

impl TimeBudget {
    pub fn graceful_shutdown(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_ms)
    }

    pub fn kill_retry_interval(&self) -> Duration {
        Duration::from_millis(self.kill_retry_interval_ms)
    }

    pub fn overall_shutdown(&self) -> Duration {
        Duration::from_millis(self.overall_shutdown_ms)
    }

    pub fn infra_readiness(&self) -> Duration {
        Duration::from_millis(self.infra_readiness_ms)
    }

    pub fn infra_poll_interval(&self) -> Duration {
        Duration::from_millis(self.infra_poll_interval_ms)
    }

    pub fn tcp_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_connect_timeout_ms)
    }

    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.db_connect_timeout_ms)
    }

    pub fn db_create_wait(&self) -> Duration {
        Duration::from_millis(self.db_create_wait_ms)
    }

    pub fn broker_metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_metadata_timeout_ms)
    }

    pub fn health_request_timeout(&self) -> Duration {
        Duration::from_millis(self.health_request_timeout_ms)
    }

    pub fn health_retry_delay(&self) -> Duration {
        Duration::from_millis(self.health_retry_delay_ms)
    }

    pub fn compose_command_timeout(&self) -> Duration {
        Duration::from_millis(self.compose_command_timeout_ms)
    }

    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_millis(self.provisioning_timeout_ms)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    pub fn port_sweep_timeout(&self) -> Duration {
        Duration::from_millis(self.port_sweep_timeout_ms)
    }

    /// Upper bound for one escalation ladder: graceful wait plus every kill retry
    pub fn escalation_bound(&self) -> Duration {
        self.graceful_shutdown() + self.kill_retry_interval() * self.max_kill_retries
    }
}

impl Default for TimeBudget {
    fn default() -> Self {
        Self {
            graceful_shutdown_ms: default_graceful_shutdown_ms(),
            kill_retry_interval_ms: default_kill_retry_interval_ms(),
            max_kill_retries: default_max_kill_retries(),
            overall_shutdown_ms: default_overall_shutdown_ms(),
            infra_readiness_ms: default_infra_readiness_ms(),
            infra_poll_interval_ms: default_infra_poll_interval_ms(),
            infra_progress_every: default_infra_progress_every(),
            tcp_connect_timeout_ms: default_tcp_connect_timeout_ms(),
            db_connect_timeout_ms: default_db_connect_timeout_ms(),
            db_create_retries: default_db_create_retries(),
            db_create_wait_ms: default_db_create_wait_ms(),
            broker_metadata_timeout_ms: default_broker_metadata_timeout_ms(),
            health_request_timeout_ms: default_health_request_timeout_ms(),
            health_retry_delay_ms: default_health_retry_delay_ms(),
            health_max_attempts: default_health_max_attempts(),
            compose_command_timeout_ms: default_compose_command_timeout_ms(),
            provisioning_timeout_ms: default_provisioning_timeout_ms(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
            port_sweep_timeout_ms: default_port_sweep_timeout_ms(),
        }
    }
}

impl DevstackConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("devstack.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let defaults = Self::default();
        let budget = &defaults.budget;

        let settings = Config::builder()
            .set_default("database.host", default_database_host())?
            .set_default("database.port", default_database_port())?
            .set_default("database.user", default_database_user())?
            .set_default("database.password", default_database_password())?
            .set_default("database.name", default_database_name())?
            .set_default("database.admin_database", default_admin_database())?
            .set_default("database.schema", default_database_schema())?
            .set_default("broker.host", default_broker_host())?
            .set_default("broker.port", default_broker_port())?
            .set_default(
                "infra.compose_dir",
                default_compose_dir().to_string_lossy().to_string(),
            )?
            .set_default("infra.compose_file", default_compose_file())?
            .set_default("infra.project_name", default_project_name())?
            .set_default("infra.compose_command", default_compose_command())?
            .set_default("infra.auto_confirm", false)?
            .set_default("workers.ingest.program", defaults.workers.ingest.program.clone())?
            .set_default("workers.ingest.port", defaults.workers.ingest.port)?
            .set_default(
                "workers.streaming.program",
                defaults.workers.streaming.program.clone(),
            )?
            .set_default("workers.streaming.port", defaults.workers.streaming.port)?
            .set_default("provisioning.ensure_schema", false)?
            .set_default("shutdown.port_sweep", default_port_sweep())?
            .set_default("budget.graceful_shutdown_ms", budget.graceful_shutdown_ms)?
            .set_default("budget.kill_retry_interval_ms", budget.kill_retry_interval_ms)?
            .set_default("budget.max_kill_retries", budget.max_kill_retries)?
            .set_default("budget.overall_shutdown_ms", budget.overall_shutdown_ms)?
            .set_default("budget.infra_readiness_ms", budget.infra_readiness_ms)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables with DEVSTACK_ prefix, e.g. DEVSTACK_BUDGET__MAX_KILL_RETRIES
            .add_source(
                Environment::with_prefix("DEVSTACK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: DevstackConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.port == 0 || self.broker.port == 0 {
            return Err(ConfigError::Message(
                "Database and broker ports must be greater than 0".to_string(),
            ));
        }

        if self.database.name.is_empty() {
            return Err(ConfigError::Message(
                "Database name must not be empty".to_string(),
            ));
        }

        for (role, worker) in [
            ("ingest", &self.workers.ingest),
            ("streaming", &self.workers.streaming),
        ] {
            if worker.program.trim().is_empty() {
                return Err(ConfigError::Message(format!(
                    "Worker '{}' program must not be empty",
                    role
                )));
            }
            if worker.port == 0 {
                return Err(ConfigError::Message(format!(
                    "Worker '{}' port must be greater than 0",
                    role
                )));
            }
        }

        if self.workers.ingest.port == self.workers.streaming.port {
            return Err(ConfigError::Message(
                "Ingest and streaming workers must listen on different ports".to_string(),
            ));
        }

        if self.budget.max_kill_retries == 0 || self.budget.health_max_attempts == 0 {
            return Err(ConfigError::Message(
                "Kill retries and health attempts must be greater than 0".to_string(),
            ));
        }

        if self.budget.infra_progress_every == 0 {
            return Err(ConfigError::Message(
                "infra_progress_every must be greater than 0".to_string(),
            ));
        }

        if self.budget.overall_shutdown() < self.budget.graceful_shutdown() {
            return Err(ConfigError::Message(
                "Overall shutdown deadline must not be shorter than the graceful shutdown wait"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Render as a TOML document, e.g. to seed a `devstack.toml`
    pub fn to_toml(&self) -> crate::error::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for DevstackConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                host: default_database_host(),
                port: default_database_port(),
                user: default_database_user(),
                password: default_database_password(),
                name: default_database_name(),
                admin_database: default_admin_database(),
                schema: default_database_schema(),
            },
            broker: BrokerConfig {
                host: default_broker_host(),
                port: default_broker_port(),
            },
            infra: InfraConfig {
                compose_dir: default_compose_dir(),
                compose_file: default_compose_file(),
                project_name: default_project_name(),
                compose_command: default_compose_command(),
                auto_confirm: false,
            },
            workers: WorkersConfig {
                ingest: WorkerConfig {
                    program: "ingest-gateway".to_string(),
                    args: Vec::new(),
                    port: 8081,
                    host: default_worker_host(),
                    health_path: default_health_path(),
                },
                streaming: WorkerConfig {
                    program: "streaming-gateway".to_string(),
                    args: Vec::new(),
                    port: 8082,
                    host: default_worker_host(),
                    health_path: default_health_path(),
                },
            },
            provisioning: ProvisioningConfig::default(),
            shutdown: ShutdownConfig {
                port_sweep: default_port_sweep(),
            },
            budget: TimeBudget::default(),
        }
    }
}

// Default value functions
fn default_database_host() -> String {
    "127.0.0.1".to_string()
}
fn default_database_port() -> u16 {
    5432
}
fn default_database_user() -> String {
    "postgres".to_string()
}
fn default_database_password() -> String {
    "postgres".to_string()
}
fn default_database_name() -> String {
    "devstack".to_string()
}
fn default_admin_database() -> String {
    "postgres".to_string()
}
fn default_database_schema() -> String {
    "public".to_string()
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}
fn default_broker_port() -> u16 {
    9092
}

fn default_compose_dir() -> PathBuf {
    PathBuf::from("./deploy/local")
}
fn default_compose_file() -> String {
    "docker-compose.yml".to_string()
}
fn default_project_name() -> String {
    "devstack".to_string()
}
fn default_compose_command() -> String {
    "docker".to_string()
}

fn default_worker_host() -> String {
    "127.0.0.1".to_string()
}
fn default_health_path() -> String {
    "/health".to_string()
}

fn default_port_sweep() -> bool {
    true
}

fn default_graceful_shutdown_ms() -> u64 {
    5_000
}
fn default_kill_retry_interval_ms() -> u64 {
    500
}
fn default_max_kill_retries() -> u32 {
    3
}
fn default_overall_shutdown_ms() -> u64 {
    30_000
}
fn default_infra_readiness_ms() -> u64 {
    60_000
}
fn default_infra_poll_interval_ms() -> u64 {
    1_000
}
fn default_infra_progress_every() -> u32 {
    10
}
fn default_tcp_connect_timeout_ms() -> u64 {
    1_000
}
fn default_db_connect_timeout_ms() -> u64 {
    10_000
}
fn default_db_create_retries() -> u32 {
    3
}
fn default_db_create_wait_ms() -> u64 {
    1_000
}
fn default_broker_metadata_timeout_ms() -> u64 {
    5_000
}
fn default_health_request_timeout_ms() -> u64 {
    5_000
}
fn default_health_retry_delay_ms() -> u64 {
    2_000
}
fn default_health_max_attempts() -> u32 {
    5
}
fn default_compose_command_timeout_ms() -> u64 {
    120_000
}
fn default_provisioning_timeout_ms() -> u64 {
    300_000
}
fn default_prompt_timeout_ms() -> u64 {
    60_000
}
fn default_port_sweep_timeout_ms() -> u64 {
    2_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DevstackConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.budget.max_kill_retries, 3);
        assert_eq!(config.budget.graceful_shutdown(), Duration::from_secs(5));
        assert_eq!(
            config.budget.escalation_bound(),
            Duration::from_millis(6_500)
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = DevstackConfig::default();
        config.workers.streaming.port = config.workers.ingest.port;

        // Should fail validation due to the shared port
        assert!(config.validate().is_err());

        config.workers.streaming.port = 8090;
        assert!(config.validate().is_ok());

        config.budget.overall_shutdown_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
name = "analytics"

[workers.ingest]
program = "/opt/bin/ingest"
port = 9101
args = ["serve"]

[budget]
max_kill_retries = 5
"#
        )
        .unwrap();

        let config = DevstackConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.database.name, "analytics");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.workers.ingest.program, "/opt/bin/ingest");
        assert_eq!(config.workers.ingest.args, vec!["serve".to_string()]);
        assert_eq!(config.workers.ingest.health_path, "/health");
        assert_eq!(config.workers.streaming.port, 8082);
        assert_eq!(config.budget.max_kill_retries, 5);
        assert_eq!(config.budget.health_max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rendered_defaults_load_back() {
        let rendered = DevstackConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[workers.ingest]"));

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(rendered.as_bytes()).unwrap();
        let config = DevstackConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.workers.streaming.program, "streaming-gateway");
        assert_eq!(config.budget.overall_shutdown_ms, 30_000);
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("DEVSTACK_BUDGET__PROMPT_TIMEOUT_MS", "1234");
        std::env::set_var("DEVSTACK_INFRA__PROJECT_NAME", "from-env");

        let loaded = DevstackConfig::load_from_file(dir.path().join("absent.toml"));

        std::env::remove_var("DEVSTACK_BUDGET__PROMPT_TIMEOUT_MS");
        std::env::remove_var("DEVSTACK_INFRA__PROJECT_NAME");

        let config = loaded.unwrap();
        assert_eq!(config.budget.prompt_timeout_ms, 1234);
        assert_eq!(config.infra.project_name, "from-env");
    }

    #[test]
    fn test_debug_output_hides_database_password() {
        let mut config = DevstackConfig::default();
        config.database.password = "s3cr#t/pw".to_string();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("s3cr#t/pw"));
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains("admin_database"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DevstackConfig::load_from_file(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.broker.port, 9092);
        assert!(config.shutdown.port_sweep);
    }
}
