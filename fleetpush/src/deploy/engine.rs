//! Deployment engine
//!
//! One task per device, bounded by a semaphore. Each task walks
//! render -> connect -> authenticate -> push and always releases its session.
//! A device failure is recorded in its own outcome and never reaches sibling
//! tasks; the report comes back in inventory order.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::authn::Authentication;
use crate::deploy::fsm::{DeviceEvent, DeviceFsm, DevicePhase};
use crate::deploy::report::{DeploymentReport, DeviceOutcome, OutcomeCollector};
use crate::errors::{AggregateError, DeployError, DeviceError};
use crate::filesys::file::File;
use crate::inventory::{DeviceRecord, Inventory};
use crate::render::{DeviceContext, TemplateRenderer};
use crate::transport::{CommitResult, Session, Transport};

/// Engine settings
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Maximum devices worked on at once
    pub concurrency: usize,

    /// Upper bound for one device task, from render to push
    pub device_timeout: Duration,

    /// Upper bound for releasing a session
    pub close_timeout: Duration,

    /// Allow one extra connection attempt after a connection error
    pub retry_connect: bool,

    /// Delay before that extra attempt
    pub retry_delay: Duration,

    /// Render and save payloads without contacting devices
    pub dry_run: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            device_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            retry_connect: false,
            retry_delay: Duration::from_secs(2),
            dry_run: false,
        }
    }
}

impl DeployOptions {
    fn max_attempts(&self) -> u32 {
        if self.retry_connect {
            2
        } else {
            1
        }
    }
}

/// One run's template and working context
#[derive(Debug, Clone)]
pub struct Deployment {
    raw_template: String,
    working_dir: PathBuf,
    options: DeployOptions,
}

impl Deployment {
    pub fn new(raw_template: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_template: raw_template.into(),
            working_dir: working_dir.into(),
            options: DeployOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DeployOptions) -> Self {
        self.options = options;
        self
    }

    /// Where dry runs write rendered payloads
    pub fn rendered_dir(&self) -> PathBuf {
        self.working_dir.join("rendered")
    }

    /// Checks that must pass before any device task starts
    fn preflight(
        &self,
        inventory: &Inventory,
        auth: &Authentication,
    ) -> Result<TemplateRenderer, DeployError> {
        if inventory.is_empty() {
            return Err(DeployError::Validation("inventory has no devices".into()));
        }
        if self.raw_template.trim().is_empty() {
            return Err(DeployError::Validation("template is empty".into()));
        }
        if self.options.concurrency == 0 {
            return Err(DeployError::Validation(
                "concurrency must be at least 1".into(),
            ));
        }
        let renderer = TemplateRenderer::compile(&self.raw_template)?;
        auth.check_inventory(inventory)?;
        Ok(renderer)
    }

    /// Push the rendered template to every device in `inventory`.
    ///
    /// Fatal problems return before any device is contacted. Otherwise every
    /// device gets exactly one outcome; if any failed the report is returned
    /// inside [`DeployError::Devices`].
    pub async fn deploy(
        &self,
        inventory: Arc<Inventory>,
        auth: Arc<Authentication>,
        transport: Arc<dyn Transport>,
    ) -> Result<DeploymentReport, DeployError> {
        let renderer = Arc::new(self.preflight(&inventory, &auth)?);

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            devices = inventory.len(),
            concurrency = self.options.concurrency,
            dry_run = self.options.dry_run,
            "Starting deployment"
        );

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let collector = Arc::new(OutcomeCollector::new());
        let mut handles = Vec::with_capacity(inventory.len());

        for index in 0..inventory.len() {
            let task = DeviceTask {
                run_id,
                index,
                inventory: Arc::clone(&inventory),
                auth: Arc::clone(&auth),
                transport: Arc::clone(&transport),
                renderer: Arc::clone(&renderer),
                options: self.options.clone(),
                rendered_dir: self.rendered_dir(),
            };
            let sem = Arc::clone(&semaphore);
            let collector = Arc::clone(&collector);

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                let outcome = task.run().await;
                collector.insert(outcome).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(%run_id, "Device task failed to complete: {}", e);
            }
        }

        // A task that died outside its step guards still owes an outcome
        for (index, device) in inventory.iter().enumerate() {
            if !collector.contains(index).await {
                collector
                    .insert(aborted_outcome(index, device, "device task did not complete"))
                    .await;
            }
        }

        let report = collector.take_report(run_id, started_at).await;
        info!(
            %run_id,
            applied = report.applied().count(),
            failed = report.failed_count(),
            "Deployment finished"
        );

        if report.success {
            Ok(report)
        } else {
            Err(AggregateError::new(report).into())
        }
    }
}

/// Everything one device task needs, shared read-only
struct DeviceTask {
    run_id: Uuid,
    index: usize,
    inventory: Arc<Inventory>,
    auth: Arc<Authentication>,
    transport: Arc<dyn Transport>,
    renderer: Arc<TemplateRenderer>,
    options: DeployOptions,
    rendered_dir: PathBuf,
}

impl DeviceTask {
    async fn run(self) -> DeviceOutcome {
        let Some(device) = self.inventory.get(self.index) else {
            return DeviceOutcome {
                index: self.index,
                host: String::new(),
                port: 0,
                phase: DevicePhase::Pending,
                success: false,
                error: Some(DeviceError::Aborted("device index out of range".into())),
                attempts: 0,
                duration_ms: 0,
                commit: None,
            };
        };

        let started = std::time::Instant::now();
        let deadline = Instant::now() + self.options.device_timeout;
        let mut fsm = DeviceFsm::new();

        let span = info_span!(
            "device",
            run_id = %self.run_id,
            index = self.index,
            host = %device.host,
            port = device.port
        );
        let commit = self
            .drive(device, &mut fsm, deadline)
            .instrument(span.clone())
            .await;

        let success = fsm.phase() == DevicePhase::Applied
            || (self.options.dry_run && fsm.error().is_none());
        let duration_ms = started.elapsed().as_millis() as u64;
        span.in_scope(|| {
            info!(
                phase = %fsm.reached(),
                success,
                attempts = fsm.attempts(),
                duration_ms,
                "Device finished"
            )
        });

        DeviceOutcome {
            index: self.index,
            host: device.host.clone(),
            port: device.port,
            phase: fsm.reached(),
            success,
            error: fsm.error().cloned(),
            attempts: fsm.attempts(),
            duration_ms,
            commit,
        }
    }

    async fn drive(
        &self,
        device: &DeviceRecord,
        fsm: &mut DeviceFsm,
        deadline: Instant,
    ) -> Option<CommitResult> {
        advance(fsm, DeviceEvent::Render);
        let context = DeviceContext::for_device(self.index, device);
        let payload = match guarded(deadline, fsm.phase(), async {
            self.renderer.render(&context)
        })
        .await
        {
            Ok(payload) => payload,
            Err(e) => return fail(fsm, e),
        };
        debug!(bytes = payload.len(), "Rendered device config");

        if self.options.dry_run {
            if let Err(e) = self.save_rendered(device, &payload).await {
                return fail(fsm, e);
            }
            return None;
        }

        advance(fsm, DeviceEvent::Connect);
        let mut session = loop {
            match guarded(deadline, fsm.phase(), self.transport.open(device)).await {
                Ok(session) => break session,
                Err(e)
                    if fsm.can_retry(&e, self.options.max_attempts())
                        && Instant::now() < deadline =>
                {
                    warn!(attempt = fsm.attempts(), error = %e, "Connection failed, retrying");
                    let wake = std::cmp::min(Instant::now() + self.options.retry_delay, deadline);
                    tokio::time::sleep_until(wake).await;
                    advance(fsm, DeviceEvent::Retry);
                }
                Err(e) => return fail(fsm, e),
            }
        };

        let commit = self
            .authenticate_and_push(device, session.as_mut(), &payload, fsm, deadline)
            .await;

        // Released on every path, including failed and panicked steps
        match tokio::time::timeout(
            self.options.close_timeout,
            AssertUnwindSafe(session.close()).catch_unwind(),
        )
        .await
        {
            Ok(Ok(Ok(()))) => debug!("Session released"),
            Ok(Ok(Err(e))) => warn!(error = %e, "Session close reported an error"),
            Ok(Err(_)) => warn!("Session close panicked"),
            Err(_) => warn!("Session close timed out"),
        }
        drop(session);

        commit
    }

    async fn authenticate_and_push(
        &self,
        device: &DeviceRecord,
        session: &mut dyn Session,
        payload: &str,
        fsm: &mut DeviceFsm,
        deadline: Instant,
    ) -> Option<CommitResult> {
        advance(fsm, DeviceEvent::Authenticate);
        if let Err(e) = guarded(
            deadline,
            fsm.phase(),
            self.auth.authenticate(&mut *session, device),
        )
        .await
        {
            return fail(fsm, e);
        }

        advance(fsm, DeviceEvent::Push);
        match guarded(deadline, fsm.phase(), session.push(payload)).await {
            Ok(commit) => {
                advance(fsm, DeviceEvent::Apply);
                info!(attempts = fsm.attempts(), "Config applied");
                Some(commit)
            }
            Err(e) => fail(fsm, e),
        }
    }

    async fn save_rendered(&self, device: &DeviceRecord, payload: &str) -> Result<(), DeviceError> {
        let file = File::new(self.rendered_dir.join(rendered_file_name(self.index, device)));
        file.write_string(payload).await.map_err(|e| {
            DeviceError::Save(format!(
                "unable to write {}: {e}",
                file.path().display()
            ))
        })?;
        info!(path = %file.path().display(), "Rendered config saved");
        Ok(())
    }
}

/// `003-core-1.ams.cfg`; anything outside `[A-Za-z0-9._-]` becomes `_`
pub fn rendered_file_name(index: usize, device: &DeviceRecord) -> String {
    let host: String = device
        .host
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{index:03}-{host}.cfg")
}

/// Run one step under the device deadline, turning panics into errors.
/// A step never starts once the deadline has passed.
async fn guarded<T, F>(deadline: Instant, phase: DevicePhase, step: F) -> Result<T, DeviceError>
where
    F: Future<Output = Result<T, DeviceError>>,
{
    if Instant::now() >= deadline {
        return Err(timed_out(phase));
    }
    match tokio::time::timeout_at(deadline, AssertUnwindSafe(step).catch_unwind()).await {
        Err(_) => Err(timed_out(phase)),
        Ok(Err(panic)) => Err(DeviceError::Aborted(panic_message(panic.as_ref()))),
        Ok(Ok(result)) => result,
    }
}

fn timed_out(phase: DevicePhase) -> DeviceError {
    DeviceError::Connection(format!("device timed out while {phase}"))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn advance(fsm: &mut DeviceFsm, event: DeviceEvent) {
    if let Err(e) = fsm.process(event) {
        error!("{}", e);
    }
}

fn fail<T>(fsm: &mut DeviceFsm, error: DeviceError) -> Option<T> {
    warn!(phase = %fsm.phase(), error = %error, "Device failed");
    advance(fsm, DeviceEvent::Fail(error));
    None
}

fn aborted_outcome(index: usize, device: &DeviceRecord, reason: &str) -> DeviceOutcome {
    DeviceOutcome {
        index,
        host: device.host.clone(),
        port: device.port,
        phase: DevicePhase::Pending,
        success: false,
        error: Some(DeviceError::Aborted(reason.to_string())),
        attempts: 0,
        duration_ms: 0,
        commit: None,
    }
}
