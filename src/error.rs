//! Error handling for the server exporter.

/// A specialized `Result` type for exporter operations.
pub type Result<T> = std::result::Result<T, ExporterError>;

/// The main error type for exporter operations.
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metric registration or encoding failed
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Source data could not be parsed
    #[error("Failed to parse {0}")]
    Parse(String),

    /// A collector failed to build or update
    #[error("Collector {name} failed: {message}")]
    Collector { name: &'static str, message: String },

    /// Web server error
    #[error("Web server error: {0}")]
    WebServer(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExporterError {
    /// Create a new parse error
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new collector error
    pub fn collector_error(name: &'static str, msg: impl Into<String>) -> Self {
        Self::Collector {
            name,
            message: msg.into(),
        }
    }

    /// Create a new web server error
    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_error_display() {
        let err = ExporterError::collector_error("sensor", "no state table read yet");
        assert_eq!(
            err.to_string(),
            "Collector sensor failed: no state table read yet"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ExporterError = io.into();
        assert!(matches!(err, ExporterError::Io(_)));
    }
}
