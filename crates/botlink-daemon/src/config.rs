//! Daemon configuration file.
//!
//! ```json
//! {
//!   "bind": "127.0.0.1:8081",
//!   "connectors": [
//!     { "kind": "websocket_client", "account": 123456, "verifyKey": "secret" }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use botlink_connector::LauncherConfig;
use botlink_types::ConnectorConfig;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    #[serde(flatten)]
    pub launcher: LauncherConfig,
    pub connectors: Vec<ConnectorConfig>,
}

impl DaemonConfig {
    /// Default config location, `~/.config/botlink/config.json` on Linux.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::NoConfigDir` if no home directory is known.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "botlink").ok_or(DaemonError::NoConfigDir)?;
        Ok(dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load and validate the config at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, malformed, or
    /// lists no connectors.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DaemonError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&content).map_err(|source| DaemonError::InvalidConfig {
                path: path.to_path_buf(),
                source,
            })?;

        if config.connectors.is_empty() {
            return Err(DaemonError::NoConnectors);
        }
        Ok(config)
    }
}
