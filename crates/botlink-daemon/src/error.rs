//! Error types for the botlink daemon.

use std::path::PathBuf;

/// Errors that can occur in the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Config file does not exist
    #[error("Config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// No platform config directory could be determined
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON or has the wrong shape
    #[error("Invalid config {}: {source}", path.display())]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Config lists no connectors
    #[error("No connectors configured")]
    NoConnectors,

    /// Connector error
    #[error("Connector error: {0}")]
    Connector(#[from] botlink_connector::ConnectorError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
