use anyhow::Result;
use clap::Parser;
use devstack::{DevstackConfig, DevstackOrchestrator, Endpoints, ReadinessCheck, ServiceProbe};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "devstack")]
#[command(about = "Run the local development stack: infrastructure plus gateway workers")]
#[command(version)]
#[command(long_about = "Brings up the local database and message broker (starting them through \
docker compose when they are not running), runs migrations, starts the ingest and streaming \
gateways, verifies their health and keeps them running until interrupted. On Ctrl+C, SIGTERM \
or any failure every started resource is stopped within a bounded time.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "devstack.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Start infrastructure without asking
    #[arg(short, long, help = "Start infrastructure without asking for confirmation")]
    yes: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting anything")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Report infrastructure readiness without starting anything
    #[arg(long, help = "Check database and broker readiness, then exit")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting devstack v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match DevstackConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    if args.dry_run {
        let ready = report_readiness(&config).await;
        std::process::exit(if ready { 0 } else { 1 });
    }

    let mut orchestrator = DevstackOrchestrator::new(config, args.yes).map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("Orchestrator error: {}", e);
        e
    })?;

    info!("devstack exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

/// Probe both endpoints once and print the result
async fn report_readiness(config: &DevstackConfig) -> bool {
    let endpoints = Endpoints::from_config(&config.database, &config.broker);
    let probe = ServiceProbe::new(config.budget.clone());
    let mut all_ready = true;

    for endpoint in endpoints.iter() {
        let readiness = probe.check(endpoint).await;
        let mark = if readiness.is_ready() { "✓" } else { "✗" };
        println!("{} {} ({}): {}", mark, endpoint, endpoint.connection_string(), readiness);
        all_ready &= readiness.is_ready();
    }

    all_ready
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("devstack={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some("compact") | None => fmt::layer()
            .compact()
            .with_target(args.debug)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().compact().with_target(args.debug).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# devstack configuration");
    println!("# Every value below is the built-in default. Environment variables override");
    println!("# file values, e.g. DEVSTACK_DATABASE__PORT=5433 or DEVSTACK_BUDGET__MAX_KILL_RETRIES=5.");
    println!("# All [budget] values are milliseconds unless named as a count.");
    println!();
    println!("{}", DevstackConfig::default().to_toml()?);
    Ok(())
}
