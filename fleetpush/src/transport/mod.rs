//! Device transport abstraction
//!
//! The engine only sees [`Transport`] and [`Session`]; the SSH implementation
//! lives in [`ssh`]. A session is owned by exactly one device task.

pub mod ssh;

use async_trait::async_trait;
use serde::Serialize;

use crate::authn::Credentials;
use crate::errors::DeviceError;
use crate::inventory::DeviceRecord;

/// What a device returned after applying a payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    /// Combined stdout/stderr captured from the device
    pub output: String,

    /// Last exit status reported by the device, if any
    pub exit_status: Option<u32>,

    /// Number of commands or shell payloads sent
    pub commands: usize,
}

/// Opens sessions to devices
#[async_trait]
pub trait Transport: Send + Sync {
    /// Network connect and protocol handshake, no authentication yet
    async fn open(&self, device: &DeviceRecord) -> Result<Box<dyn Session>, DeviceError>;
}

/// A connected, per-device session
#[async_trait]
pub trait Session: Send {
    async fn authenticate(&mut self, credentials: Credentials<'_>) -> Result<(), DeviceError>;

    /// Apply a rendered payload
    async fn push(&mut self, payload: &str) -> Result<CommitResult, DeviceError>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&mut self) -> Result<(), DeviceError>;
}
