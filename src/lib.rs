//! # Server Exporter
//!
//! A Prometheus exporter for machine-level facts: hardware inventory, local
//! accounts and logins, sensor state tables, Docker containers, open sockets,
//! and live SSH sessions reconstructed from the sshd auth log.
//!
//! ## Collectors
//!
//! - **hardware**: host, OS, kernel, DMI, CPU, memory, disks and network interfaces
//! - **user**: accounts from `/etc/passwd` and logins from utmp
//! - **sensor**: rows of a `|`-separated sensor state table
//! - **container**: Docker containers counted by state
//! - **net**: open TCP and UDP sockets with their owning process
//! - **sshauth**: follows the auth log and tracks SSH session lifecycles
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use server_exporter::{start_web_server, CollectorRegistry, ExporterConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExporterConfig::default();
//!     let registry = Arc::new(CollectorRegistry::from_config(&config)?);
//!
//!     let shutdown = CancellationToken::new();
//!     let _tasks = registry.start(&shutdown);
//!     start_web_server(config.web, registry, shutdown).await?;
//!     Ok(())
//! }
//! ```

pub mod collector;
pub mod config;
pub mod error;
pub mod web;

// Re-export public API
pub use collector::{
    sshauth::{SessionTracker, SshAuthCollector},
    AsyncCollector, Collector, CollectorRegistry,
};
pub use config::{CollectorsConfig, ExporterConfig, SshAuthConfig};
pub use error::{ExporterError, Result};
pub use web::{start_web_server, WebConfig};

/// The default metric namespace
pub const DEFAULT_NAMESPACE: &str = "server";

/// The default listen address
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9900";

/// The default path serving metrics
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";

/// The default limit on parallel scrapes
pub const DEFAULT_MAX_REQUESTS: usize = 40;
