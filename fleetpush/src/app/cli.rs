//! Command line interface

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::errors::DeployError;
use crate::logs::LogLevel;
use crate::transport::ssh::ApplyMode;

/// Render a configuration template per device and push it over SSH
#[derive(Debug, Parser)]
#[command(name = "fleetpush", version, about)]
pub struct Cli {
    /// Inventory file (.csv, .yml or .yaml)
    #[arg(short = 'i', long = "inventory", value_name = "FILE")]
    pub inventory: Option<PathBuf>,

    /// Template file
    #[arg(short = 't', long = "template", value_name = "FILE")]
    pub template: Option<PathBuf>,

    /// PEM/OpenSSH private key; selects key authentication
    #[arg(short = 'k', long = "key", value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Passphrase for the private key
    #[arg(long, env = "FLEETPUSH_KEY_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Username for devices without one in the inventory
    #[arg(short = 'u', long, env = "FLEETPUSH_USERNAME")]
    pub username: Option<String>,

    /// Password for devices without one in the inventory
    #[arg(long, env = "FLEETPUSH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// JSON settings file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Devices worked on at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-device time budget in seconds
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Retry a failed connection once
    #[arg(long)]
    pub retry: bool,

    /// How payloads are applied on the device
    #[arg(long, value_enum)]
    pub apply_mode: Option<ApplyMode>,

    /// Render into ./rendered without contacting devices
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// trace, debug, info, warn or error
    #[arg(long)]
    pub log_level: Option<LogLevel>,
}

impl Cli {
    /// Inventory and template paths: both or neither
    pub fn deploy_paths(&self) -> Result<Option<(&Path, &Path)>, DeployError> {
        match (&self.inventory, &self.template) {
            (Some(inventory), Some(template)) => Ok(Some((inventory.as_path(), template.as_path()))),
            (None, None) => Ok(None),
            _ => Err(DeployError::Config(
                "-i and -t must be passed together; one flag was passed but not both".into(),
            )),
        }
    }
}
