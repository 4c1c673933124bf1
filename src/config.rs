//! Exporter configuration.
//!
//! Everything here is resolved once at startup and handed to the collectors
//! when they are built, so no collector reads process-wide flags on its own.

use crate::web::WebConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default auth log followed by the SSH session tracker.
pub const DEFAULT_SSHAUTH_PATH: &str = "/var/log/secure";

/// Default interval between checks for appended auth log content.
pub const DEFAULT_SSHAUTH_POLL_INTERVAL_MS: u64 = 250;

/// Default interval between container listings.
pub const DEFAULT_CONTAINER_POLL_INTERVAL_SECS: u64 = 15;

/// Default limit for a single container listing.
pub const DEFAULT_CONTAINER_TIMEOUT_SECS: u64 = 10;

/// Top-level configuration for the exporter process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Metric namespace prepended to every series
    pub namespace: String,
    /// HTTP surface configuration
    pub web: WebConfig,
    /// Per-collector configuration
    pub collectors: CollectorsConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            namespace: crate::DEFAULT_NAMESPACE.to_string(),
            web: WebConfig::default(),
            collectors: CollectorsConfig::default(),
        }
    }
}

impl ExporterConfig {
    /// Set the metric namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Replace the web configuration.
    pub fn with_web(mut self, web: WebConfig) -> Self {
        self.web = web;
        self
    }

    /// Replace the collector configuration.
    pub fn with_collectors(mut self, collectors: CollectorsConfig) -> Self {
        self.collectors = collectors;
        self
    }
}

/// Settings for every known collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorsConfig {
    pub sshauth: SshAuthConfig,
    pub hardware: HardwareConfig,
    pub user: UserConfig,
    pub sensor: SensorConfig,
    pub container: ContainerConfig,
    pub net: NetConfig,
}

/// SSH authentication session tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshAuthConfig {
    pub enabled: bool,
    /// Auth log to follow
    pub path: PathBuf,
    /// How long the follower sleeps when no new content is available
    pub poll_interval: Duration,
}

impl Default for SshAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(DEFAULT_SSHAUTH_PATH),
            poll_interval: Duration::from_millis(DEFAULT_SSHAUTH_POLL_INTERVAL_MS),
        }
    }
}

impl SshAuthConfig {
    /// Create an enabled configuration for the given log path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Enable or disable the collector.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Hardware inventory collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub enabled: bool,
    /// Mount point of sysfs, read for DMI, block and network devices
    pub sysfs_path: PathBuf,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sysfs_path: PathBuf::from("/sys"),
        }
    }
}

/// User listing collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub enabled: bool,
    pub passwd_path: PathBuf,
    pub utmp_path: PathBuf,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            passwd_path: PathBuf::from("/etc/passwd"),
            utmp_path: PathBuf::from("/var/run/utmp"),
        }
    }
}

/// Sensor state table collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub enabled: bool,
    /// State table file, `None` when not configured
    pub path: Option<PathBuf>,
    /// Whether the first line of the table is a header
    pub has_header: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            has_header: true,
        }
    }
}

/// Docker container state collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub enabled: bool,
    /// Time between two container listings
    pub poll_interval: Duration,
    /// Limit for a single listing
    pub timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(DEFAULT_CONTAINER_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_CONTAINER_TIMEOUT_SECS),
        }
    }
}

/// Open TCP/UDP connection collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    pub enabled: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExporterConfig::default();
        assert_eq!(config.namespace, "server");
        assert!(config.collectors.sshauth.enabled);
        assert_eq!(
            config.collectors.sshauth.path,
            PathBuf::from("/var/log/secure")
        );
        assert!(config.collectors.sensor.path.is_none());
        assert_eq!(config.collectors.hardware.sysfs_path, PathBuf::from("/sys"));
        assert!(config.collectors.container.enabled);
        assert_eq!(
            config.collectors.container.poll_interval,
            Duration::from_secs(15)
        );
        assert!(config.collectors.net.enabled);
    }

    #[test]
    fn test_builders() {
        let sshauth = SshAuthConfig::new("/tmp/auth.log")
            .with_enabled(false)
            .with_poll_interval(Duration::from_millis(10));
        let config = ExporterConfig::default()
            .with_namespace("edge")
            .with_collectors(CollectorsConfig {
                sshauth,
                ..Default::default()
            });

        assert_eq!(config.namespace, "edge");
        assert!(!config.collectors.sshauth.enabled);
        assert_eq!(
            config.collectors.sshauth.poll_interval,
            Duration::from_millis(10)
        );
    }
}
