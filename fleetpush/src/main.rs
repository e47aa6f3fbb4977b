//! fleetpush - Entry Point
//!
//! Pushes a rendered configuration template to every device of an inventory.
//! Exit status: 0 when every device applied, 1 when any device failed, 2 when
//! the run stopped before contacting devices.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::Colorize;
use tracing::info;

use fleetpush::app::cli::Cli;
use fleetpush::app::options::{log_options, RunOptions};
use fleetpush::app::run::{conclude, run, EXIT_FATAL};
use fleetpush::logs::init_logging;
use fleetpush::settings::Settings;
use fleetpush::transport::ssh::SshTransport;
use fleetpush::utils::version_info;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_cli(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = Settings::load(cli.config.as_deref())
        .await
        .context("unable to load settings")?;

    init_logging(log_options(&cli, &settings)).context("unable to initialize logging")?;

    let working_dir = std::env::current_dir().context("unable to read working directory")?;
    let Some(options) = RunOptions::from_cli(&cli, &settings, working_dir)? else {
        // Nothing to deploy
        Cli::command().print_help()?;
        return Ok(ExitCode::SUCCESS);
    };

    let version = version_info();
    info!(version = %version.version, git_hash = %version.git_hash, "Starting fleetpush");

    let transport = Arc::new(SshTransport::new(options.ssh.clone()));
    let status = conclude(run(options, transport).await, cli.json)?;
    Ok(ExitCode::from(status))
}
