//! Error types for fleetpush
//!
//! Two families: [`DeployError`] covers everything that stops a run before any
//! device is contacted (plus the aggregate of per-device failures), and
//! [`DeviceError`] is captured inside a single device task.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deploy::report::DeploymentReport;

/// Run-level error
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Load error: {path}: {message}")]
    Load { path: String, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication config error: {0}")]
    AuthConfig(String),

    #[error(transparent)]
    Devices(#[from] AggregateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Whether this error was raised before any device task started
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DeployError::Devices(_))
    }

    pub(crate) fn load(path: impl AsRef<std::path::Path>, message: impl ToString) -> Self {
        DeployError::Load {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }
}

/// Error captured inside one device task
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum DeviceError {
    #[error("Render error: {0}")]
    Render(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Push error: {0}")]
    Push(String),

    /// A dry run could not store the rendered payload
    #[error("Save error: {0}")]
    Save(String),

    /// The task panicked while driving the device
    #[error("Device task aborted: {0}")]
    Aborted(String),
}

impl DeviceError {
    /// Only connection failures are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Connection(_))
    }
}

/// Every failed device of a run, with the full report attached
#[derive(Error, Debug)]
#[error("{}", describe_failures(.report))]
pub struct AggregateError {
    pub report: DeploymentReport,
}

impl AggregateError {
    pub fn new(report: DeploymentReport) -> Self {
        Self { report }
    }
}

fn describe_failures(report: &DeploymentReport) -> String {
    let failed: Vec<String> = report
        .failed()
        .map(|outcome| {
            let cause = outcome
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown failure".to_string());
            format!(
                "#{} {}:{} [{}] {}",
                outcome.index, outcome.host, outcome.port, outcome.phase, cause
            )
        })
        .collect();

    format!(
        "{} of {} devices failed:\n  {}",
        failed.len(),
        report.outcomes.len(),
        failed.join("\n  ")
    )
}
