//! Settings file management
//!
//! An optional JSON file carrying defaults; command-line flags win over it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::inventory::DEFAULT_PORT;
use crate::logs::LogLevel;
use crate::transport::ssh::ApplyMode;

/// Tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Devices worked on at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-device time budget in seconds
    #[serde(default = "default_device_timeout")]
    pub device_timeout_secs: u64,

    /// Retry a failed connection once
    #[serde(default)]
    pub retry_connect: bool,

    /// Delay before the connection retry in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// How payloads are applied over SSH
    #[serde(default)]
    pub apply_mode: ApplyMode,

    /// Port for inventory rows without one
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Username for inventory rows without one
    #[serde(default)]
    pub default_username: Option<String>,
}

fn default_concurrency() -> usize {
    10
}

fn default_device_timeout() -> u64 {
    30
}

fn default_retry_delay() -> u64 {
    2
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            concurrency: default_concurrency(),
            device_timeout_secs: default_device_timeout(),
            retry_connect: false,
            retry_delay_secs: default_retry_delay(),
            apply_mode: ApplyMode::default(),
            default_port: default_port(),
            default_username: None,
        }
    }
}

impl Settings {
    /// Read settings from `path`, or defaults when no path is given
    pub async fn load(path: Option<&Path>) -> Result<Self, DeployError> {
        match path {
            Some(path) => File::new(path).read_json::<Settings>().await,
            None => Ok(Settings::default()),
        }
    }
}
