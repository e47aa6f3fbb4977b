//! SSH transport backed by russh
//!
//! Host keys are accepted without verification; the fingerprint is logged at
//! debug level so operators can audit what was contacted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::authn::Credentials;
use crate::errors::DeviceError;
use crate::inventory::DeviceRecord;
use crate::transport::{CommitResult, Session, Transport};

/// How a rendered payload is applied on the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    /// Stream the whole payload into an interactive shell, then `exit`
    #[default]
    Shell,

    /// One exec request per non-blank line, stop at the first failure
    Exec,
}

/// SSH transport options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Drop the connection after this long without traffic
    pub inactivity_timeout: Option<Duration>,

    pub apply_mode: ApplyMode,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            inactivity_timeout: Some(Duration::from_secs(30)),
            apply_mode: ApplyMode::Shell,
        }
    }
}

/// russh client callbacks for one device
pub struct DeviceHandler {
    address: String,
}

#[async_trait]
impl client::Handler for DeviceHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            device = %self.address,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting device host key"
        );
        Ok(true)
    }
}

/// Applies a payload over an authenticated SSH connection
#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(
        &self,
        handle: &Handle<DeviceHandler>,
        payload: &str,
    ) -> Result<CommitResult, DeviceError>;
}

/// Writes the payload into a login shell
pub struct ShellApplier {
    exit_command: String,
}

impl Default for ShellApplier {
    fn default() -> Self {
        Self {
            exit_command: "exit".to_string(),
        }
    }
}

#[async_trait]
impl Applier for ShellApplier {
    async fn apply(
        &self,
        handle: &Handle<DeviceHandler>,
        payload: &str,
    ) -> Result<CommitResult, DeviceError> {
        let mut channel = handle.channel_open_session().await.map_err(push_error)?;
        channel.request_shell(true).await.map_err(push_error)?;

        let mut input = payload.to_string();
        if !input.ends_with('\n') {
            input.push('\n');
        }
        input.push_str(&self.exit_command);
        input.push('\n');

        channel.data(input.as_bytes()).await.map_err(push_error)?;
        channel.eof().await.map_err(push_error)?;

        let (output, exit_status) = drain(&mut channel).await;
        check_status(exit_status, &output, "shell")?;

        Ok(CommitResult {
            output,
            exit_status,
            commands: 1,
        })
    }
}

/// Runs every non-blank line as its own exec request
#[derive(Default)]
pub struct ExecApplier;

#[async_trait]
impl Applier for ExecApplier {
    async fn apply(
        &self,
        handle: &Handle<DeviceHandler>,
        payload: &str,
    ) -> Result<CommitResult, DeviceError> {
        let mut result = CommitResult::default();

        for command in payload.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let mut channel = handle.channel_open_session().await.map_err(push_error)?;
            channel.exec(true, command).await.map_err(push_error)?;

            let (output, exit_status) = drain(&mut channel).await;
            result.output.push_str(&output);
            result.exit_status = exit_status;
            result.commands += 1;
            check_status(exit_status, &output, command)?;
        }

        Ok(result)
    }
}

/// Collect channel output until the device closes it
async fn drain(channel: &mut Channel<Msg>) -> (String, Option<u32>) {
    let mut output = Vec::new();
    let mut exit_status = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } | ChannelMsg::ExtendedData { ref data, .. } => {
                output.extend_from_slice(data)
            }
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            _ => {}
        }
    }

    (String::from_utf8_lossy(&output).into_owned(), exit_status)
}

fn check_status(exit_status: Option<u32>, output: &str, what: &str) -> Result<(), DeviceError> {
    match exit_status {
        Some(code) if code != 0 => {
            let tail: String = output.lines().last().unwrap_or_default().to_string();
            Err(DeviceError::Push(format!(
                "'{what}' exited with status {code}: {tail}"
            )))
        }
        _ => Ok(()),
    }
}

fn push_error(err: russh::Error) -> DeviceError {
    DeviceError::Push(err.to_string())
}

/// Opens russh client connections
pub struct SshTransport {
    config: Arc<client::Config>,
    applier: Arc<dyn Applier>,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        let applier: Arc<dyn Applier> = match options.apply_mode {
            ApplyMode::Shell => Arc::new(ShellApplier::default()),
            ApplyMode::Exec => Arc::new(ExecApplier),
        };
        Self::with_applier(options, applier)
    }

    /// Use a vendor-specific applier
    pub fn with_applier(options: SshOptions, applier: Arc<dyn Applier>) -> Self {
        let config = client::Config {
            inactivity_timeout: options.inactivity_timeout,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            applier,
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&self, device: &DeviceRecord) -> Result<Box<dyn Session>, DeviceError> {
        let address = device.address();
        let handler = DeviceHandler {
            address: address.clone(),
        };

        let handle = client::connect(
            Arc::clone(&self.config),
            (device.host.as_str(), device.port),
            handler,
        )
        .await
        .map_err(|e| DeviceError::Connection(format!("{address}: {e}")))?;

        debug!(device = %address, "SSH handshake complete");
        Ok(Box::new(SshSession {
            address,
            handle: Some(handle),
            applier: Arc::clone(&self.applier),
        }))
    }
}

/// One open SSH connection
pub struct SshSession {
    address: String,
    handle: Option<Handle<DeviceHandler>>,
    applier: Arc<dyn Applier>,
}

impl SshSession {
    fn handle_mut(&mut self) -> Result<&mut Handle<DeviceHandler>, DeviceError> {
        self.handle
            .as_mut()
            .ok_or_else(|| DeviceError::Connection(format!("{}: session already closed", self.address)))
    }
}

#[async_trait]
impl Session for SshSession {
    async fn authenticate(&mut self, credentials: Credentials<'_>) -> Result<(), DeviceError> {
        let address = self.address.clone();
        let handle = self.handle_mut()?;

        let accepted = match credentials {
            Credentials::Password { username, password } => {
                handle
                    .authenticate_password(username, password.expose_secret())
                    .await
            }
            Credentials::PublicKey { username, key } => {
                handle.authenticate_publickey(username, Arc::clone(key)).await
            }
        }
        .map_err(|e| DeviceError::Authentication(format!("{address}: {e}")))?;

        if !accepted {
            return Err(DeviceError::Authentication(format!(
                "{address} rejected credentials for user '{}'",
                credentials.username()
            )));
        }
        Ok(())
    }

    async fn push(&mut self, payload: &str) -> Result<CommitResult, DeviceError> {
        let applier = Arc::clone(&self.applier);
        let handle = self.handle_mut()?;
        applier.apply(handle, payload).await
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| DeviceError::Connection(format!("{}: {e}", self.address)))?;
            debug!(device = %self.address, "SSH session closed");
        }
        Ok(())
    }
}
