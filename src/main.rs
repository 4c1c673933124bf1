//! Server Exporter binary.
//!
//! Every flag can also be set through an `SE_` prefixed environment
//! variable, e.g. `SE_COLLECTOR_SSHAUTH_PATH=/var/log/auth.log`.

use anyhow::Context;
use clap::{ArgAction, Parser};
use server_exporter::config::{
    CollectorsConfig, ContainerConfig, HardwareConfig, NetConfig, SensorConfig, UserConfig,
    DEFAULT_CONTAINER_POLL_INTERVAL_SECS, DEFAULT_SSHAUTH_PATH, DEFAULT_SSHAUTH_POLL_INTERVAL_MS,
};
use server_exporter::{
    start_web_server, CollectorRegistry, ExporterConfig, SshAuthConfig, WebConfig,
    DEFAULT_LISTEN_ADDRESS, DEFAULT_MAX_REQUESTS, DEFAULT_NAMESPACE, DEFAULT_TELEMETRY_PATH,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "server_exporter")]
#[command(about = "Server Exporter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Prometheus exporter for hardware, users, sensors, containers, connections and SSH sessions")]
struct Cli {
    /// Address on which to expose metrics and web interface
    #[arg(long = "web.listen-address", env = "SE_WEB_LISTEN_ADDRESS", default_value = DEFAULT_LISTEN_ADDRESS)]
    listen_address: String,

    /// Path under which to expose metrics
    #[arg(long = "web.telemetry-path", env = "SE_WEB_TELEMETRY_PATH", default_value = DEFAULT_TELEMETRY_PATH)]
    telemetry_path: String,

    /// Maximum number of parallel scrape requests, 0 disables the limit
    #[arg(long = "web.max-requests", env = "SE_WEB_MAX_REQUESTS", default_value_t = DEFAULT_MAX_REQUESTS)]
    max_requests: usize,

    /// Metric namespace
    #[arg(long, env = "SE_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Log level: ERROR, WARN, INFO, DEBUG or TRACE
    #[arg(long = "log", env = "SE_LOG", default_value = "INFO")]
    log_level: String,

    /// Enable the SSH auth session collector
    #[arg(long = "collector.sshauth", env = "SE_COLLECTOR_SSHAUTH", default_value_t = true, action = ArgAction::Set)]
    sshauth: bool,

    /// SSH auth log path
    #[arg(long = "collector.sshauth.path", env = "SE_COLLECTOR_SSHAUTH_PATH", default_value = DEFAULT_SSHAUTH_PATH)]
    sshauth_path: PathBuf,

    /// How often to check the SSH auth log for new lines, in milliseconds
    #[arg(long = "collector.sshauth.poll-interval-ms", env = "SE_COLLECTOR_SSHAUTH_POLL_INTERVAL_MS", default_value_t = DEFAULT_SSHAUTH_POLL_INTERVAL_MS)]
    sshauth_poll_interval_ms: u64,

    /// Enable the hardware inventory collector
    #[arg(long = "collector.hardware", env = "SE_COLLECTOR_HARDWARE", default_value_t = true, action = ArgAction::Set)]
    hardware: bool,

    /// Enable the user collector
    #[arg(long = "collector.user", env = "SE_COLLECTOR_USER", default_value_t = true, action = ArgAction::Set)]
    user: bool,

    /// Enable the sensor state collector
    #[arg(long = "collector.sensor", env = "SE_COLLECTOR_SENSOR", default_value_t = true, action = ArgAction::Set)]
    sensor: bool,

    /// Sensor state table path
    #[arg(long = "collector.sensor.state.path", env = "SE_COLLECTOR_SENSOR_STATE_PATH")]
    sensor_state_path: Option<PathBuf>,

    /// Whether the sensor state table starts with a header line
    #[arg(long = "collector.sensor.state.head", env = "SE_COLLECTOR_SENSOR_STATE_HEAD", default_value_t = true, action = ArgAction::Set)]
    sensor_state_head: bool,

    /// Enable the Docker container state collector
    #[arg(long = "collector.container", env = "SE_COLLECTOR_CONTAINER", default_value_t = true, action = ArgAction::Set)]
    container: bool,

    /// How often to list Docker containers, in seconds
    #[arg(long = "collector.container.poll-interval-secs", env = "SE_COLLECTOR_CONTAINER_POLL_INTERVAL_SECS", default_value_t = DEFAULT_CONTAINER_POLL_INTERVAL_SECS)]
    container_poll_interval_secs: u64,

    /// Enable the open connection collector
    #[arg(long = "collector.net", env = "SE_COLLECTOR_NET", default_value_t = true, action = ArgAction::Set)]
    net: bool,
}

impl Cli {
    fn exporter_config(&self) -> ExporterConfig {
        let web = WebConfig::new(&self.listen_address)
            .with_telemetry_path(&self.telemetry_path)
            .with_max_requests(self.max_requests);

        let collectors = CollectorsConfig {
            sshauth: SshAuthConfig::new(&self.sshauth_path)
                .with_enabled(self.sshauth)
                .with_poll_interval(Duration::from_millis(self.sshauth_poll_interval_ms)),
            hardware: HardwareConfig {
                enabled: self.hardware,
                ..Default::default()
            },
            user: UserConfig {
                enabled: self.user,
                ..Default::default()
            },
            sensor: SensorConfig {
                enabled: self.sensor,
                path: self.sensor_state_path.clone().filter(|p| !p.as_os_str().is_empty()),
                has_header: self.sensor_state_head,
            },
            container: ContainerConfig {
                enabled: self.container,
                poll_interval: Duration::from_secs(self.container_poll_interval_secs),
                ..Default::default()
            },
            net: NetConfig { enabled: self.net },
        };

        ExporterConfig::default()
            .with_namespace(&self.namespace)
            .with_web(web)
            .with_collectors(collectors)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    let config = cli.exporter_config();
    let registry = Arc::new(
        CollectorRegistry::from_config(&config).context("Failed to build collector registry")?,
    );

    let shutdown = CancellationToken::new();
    let mut tasks = registry.start(&shutdown);
    tokio::spawn(wait_for_signal(shutdown.clone()));

    info!(
        namespace = %config.namespace,
        collectors = ?registry.collector_names(),
        "Starting server exporter"
    );
    let served = start_web_server(config.web.clone(), registry, shutdown.clone()).await;

    // Stop background collectors whether the server ended cleanly or not.
    shutdown.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Collector task panicked: {}", e);
        }
    }

    served.context("Web server failed")?;
    info!("Server exporter stopped");
    Ok(())
}

fn parse_level(level: &str) -> Level {
    match level.to_ascii_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    // RUST_LOG directives refine the level chosen on the command line.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(parse_level(&cli.log_level)).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    match shutdown_signal().await {
        Ok(name) => {
            info!(signal = name, "Shutdown signal received");
            shutdown.cancel();
        }
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

/// Wait for ctrl-c or SIGTERM and return the name of the one that arrived.
async fn shutdown_signal() -> std::io::Result<&'static str> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}
