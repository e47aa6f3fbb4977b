//! One deployment run: load, authenticate, deploy

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::app::options::RunOptions;
use crate::app::summary::print_report;
use crate::authn::Authentication;
use crate::deploy::{DeploymentReport, Deployment};
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::inventory::{self, LoadRules};
use crate::transport::Transport;

/// Every device applied
pub const EXIT_APPLIED: u8 = 0;

/// The run finished but at least one device failed
pub const EXIT_DEVICE_FAILURES: u8 = 1;

/// The run stopped before contacting devices
pub const EXIT_FATAL: u8 = 2;

/// Process exit status for a run result
pub fn exit_status(result: &Result<DeploymentReport, DeployError>) -> u8 {
    match result {
        Ok(_) => EXIT_APPLIED,
        Err(DeployError::Devices(_)) => EXIT_DEVICE_FAILURES,
        Err(_) => EXIT_FATAL,
    }
}

/// Print the report of a finished run and return its exit status.
///
/// Fatal errors are handed back to the caller. A report that cannot be
/// printed is logged and does not change the status.
pub fn conclude(
    result: Result<DeploymentReport, DeployError>,
    json: bool,
) -> Result<u8, DeployError> {
    let status = exit_status(&result);
    match result {
        Ok(report) => emit(&report, json),
        Err(DeployError::Devices(aggregate)) => {
            emit(&aggregate.report, json);
            error!("{}", aggregate);
        }
        Err(e) => return Err(e),
    }
    Ok(status)
}

fn emit(report: &DeploymentReport, json: bool) {
    if let Err(e) = print_report(report, json) {
        warn!(error = %e, "Unable to print deployment report");
    }
}

/// Run a deployment.
///
/// Inventory, template and credentials are all loaded and checked before the
/// first device is contacted through `transport`.
pub async fn run(
    options: RunOptions,
    transport: Arc<dyn Transport>,
) -> Result<DeploymentReport, DeployError> {
    let RunOptions {
        inventory_path,
        template_path,
        key_path,
        passphrase,
        fallback,
        default_port,
        working_dir,
        deploy,
        ..
    } = options;

    // Key authentication and a global password both make the column optional
    let rules = LoadRules {
        require_password: key_path.is_none() && fallback.password.is_none(),
        default_port,
    };
    let inventory = inventory::load(&inventory_path, &rules).await?;

    let template = File::new(&template_path).read_string().await?;
    info!(path = %template_path.display(), bytes = template.len(), "Template loaded");

    let auth = match key_path {
        Some(path) => {
            let auth = Authentication::key_from_file(&path, passphrase, fallback.username).await?;
            auth.check_inventory(&inventory)?;
            auth
        }
        None => Authentication::basic(&inventory, fallback)?,
    };
    info!(key = auth.is_key(), "Authentication ready");

    let deployment = Deployment::new(template, working_dir).with_options(deploy);
    deployment
        .deploy(Arc::new(inventory), Arc::new(auth), transport)
        .await
}
