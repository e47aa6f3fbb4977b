//! Run options assembled from the command line and the settings file

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::app::cli::Cli;
use crate::authn::FallbackCredentials;
use crate::deploy::DeployOptions;
use crate::errors::DeployError;
use crate::logs::LogOptions;
use crate::settings::Settings;
use crate::transport::ssh::SshOptions;

/// Everything a run needs
#[derive(Debug)]
pub struct RunOptions {
    pub inventory_path: PathBuf,
    pub template_path: PathBuf,

    /// Present for key authentication
    pub key_path: Option<PathBuf>,
    pub passphrase: Option<SecretString>,

    /// Global credentials for rows without their own
    pub fallback: FallbackCredentials,

    /// Port for rows without one
    pub default_port: u16,

    /// Directory the run was started from
    pub working_dir: PathBuf,

    pub deploy: DeployOptions,
    pub ssh: SshOptions,
}

impl RunOptions {
    /// `None` when neither inventory nor template was given
    pub fn from_cli(
        cli: &Cli,
        settings: &Settings,
        working_dir: PathBuf,
    ) -> Result<Option<Self>, DeployError> {
        let Some((inventory_path, template_path)) = cli.deploy_paths()? else {
            return Ok(None);
        };

        let device_timeout =
            Duration::from_secs(cli.timeout.unwrap_or(settings.device_timeout_secs));

        let deploy = DeployOptions {
            concurrency: cli.concurrency.unwrap_or(settings.concurrency),
            device_timeout,
            retry_connect: cli.retry || settings.retry_connect,
            retry_delay: Duration::from_secs(settings.retry_delay_secs),
            dry_run: cli.dry_run,
            ..Default::default()
        };

        let ssh = SshOptions {
            inactivity_timeout: Some(device_timeout),
            apply_mode: cli.apply_mode.unwrap_or(settings.apply_mode),
        };

        let username = cli
            .username
            .clone()
            .or_else(|| settings.default_username.clone());

        Ok(Some(Self {
            inventory_path: inventory_path.to_path_buf(),
            template_path: template_path.to_path_buf(),
            key_path: cli.key.clone(),
            passphrase: cli.passphrase.clone().map(SecretString::from),
            fallback: FallbackCredentials::new(username, cli.password.clone()),
            default_port: settings.default_port,
            working_dir,
            deploy,
            ssh,
        }))
    }
}

/// Logging options: command line first, then settings
pub fn log_options(cli: &Cli, settings: &Settings) -> LogOptions {
    LogOptions {
        log_level: cli.log_level.unwrap_or(settings.log_level),
        json_format: settings.log_json,
    }
}
