//! Web server configuration.

use crate::error::{ExporterError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the web server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Address to bind the server to, `:port` binds every interface
    pub listen_address: String,
    /// Path under which metrics are exposed
    pub telemetry_path: String,
    /// Maximum number of parallel scrapes, 0 disables the limit
    pub max_requests: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_address: crate::DEFAULT_LISTEN_ADDRESS.to_string(),
            telemetry_path: crate::DEFAULT_TELEMETRY_PATH.to_string(),
            max_requests: crate::DEFAULT_MAX_REQUESTS,
        }
    }
}

impl WebConfig {
    /// Create a new web configuration with a custom listen address.
    pub fn new(listen_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            ..Default::default()
        }
    }

    /// Set the listen address for the web server.
    pub fn with_listen_address(mut self, listen_address: impl Into<String>) -> Self {
        self.listen_address = listen_address.into();
        self
    }

    /// Set the telemetry path.
    pub fn with_telemetry_path(mut self, path: impl Into<String>) -> Self {
        self.telemetry_path = path.into();
        self
    }

    /// Set the maximum number of parallel scrapes.
    pub fn with_max_requests(mut self, max: usize) -> Self {
        self.max_requests = max;
        self
    }

    /// Address handed to the listener, as `host:port`.
    ///
    /// The host may be an IP address or a name resolved at bind time. A bare
    /// `:port` binds every interface.
    pub fn bind_address(&self) -> Result<String> {
        let address = if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        };

        let invalid = |reason: &str| {
            ExporterError::config_error(format!(
                "Invalid listen address {}: {}",
                self.listen_address, reason
            ))
        };
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid("missing or malformed host"));
        }
        port.parse::<u16>().map_err(|e| invalid(&e.to_string()))?;

        Ok(address)
    }

    /// Telemetry path normalized to start with a slash.
    pub fn metrics_route(&self) -> String {
        if self.telemetry_path.starts_with('/') {
            self.telemetry_path.clone()
        } else {
            format!("/{}", self.telemetry_path)
        }
    }
}
