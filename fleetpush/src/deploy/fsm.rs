//! Finite State Machine for a single device push

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DeviceError;

/// Device phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePhase {
    /// Dispatched, waiting for a worker slot
    Pending,

    /// Rendering the template for this device
    Rendering,

    /// Opening the network connection and handshake
    Connecting,

    /// Presenting credentials
    Authenticating,

    /// Applying the rendered payload
    Pushing,

    /// Payload applied
    Applied,

    /// Terminal failure, see the failed phase
    Failed,
}

impl DevicePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DevicePhase::Applied | DevicePhase::Failed)
    }
}

impl fmt::Display for DevicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DevicePhase::Pending => "pending",
            DevicePhase::Rendering => "rendering",
            DevicePhase::Connecting => "connecting",
            DevicePhase::Authenticating => "authenticating",
            DevicePhase::Pushing => "pushing",
            DevicePhase::Applied => "applied",
            DevicePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Device event
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Start rendering
    Render,

    /// Rendering done, start connecting
    Connect,

    /// Connected, start authenticating
    Authenticate,

    /// Authenticated, start pushing
    Push,

    /// Push completed successfully
    Apply,

    /// Current phase failed
    Fail(DeviceError),

    /// Connect again after a transient failure
    Retry,
}

/// Device FSM
#[derive(Debug, Clone)]
pub struct DeviceFsm {
    phase: DevicePhase,
    failed_at: Option<DevicePhase>,
    error: Option<DeviceError>,
    attempts: u32,
}

impl DeviceFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            phase: DevicePhase::Pending,
            failed_at: None,
            error: None,
            attempts: 0,
        }
    }

    /// Get current phase
    pub fn phase(&self) -> DevicePhase {
        self.phase
    }

    /// Phase the device got to: the failing phase for failures, else the current one
    pub fn reached(&self) -> DevicePhase {
        self.failed_at.unwrap_or(self.phase)
    }

    /// Get error if any
    pub fn error(&self) -> Option<&DeviceError> {
        self.error.as_ref()
    }

    /// Connection attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeviceEvent) -> Result<(), String> {
        let new_phase = match (self.phase, &event) {
            (DevicePhase::Pending, DeviceEvent::Render) => DevicePhase::Rendering,

            (DevicePhase::Rendering, DeviceEvent::Connect) => {
                self.attempts = 1;
                DevicePhase::Connecting
            }

            (DevicePhase::Connecting, DeviceEvent::Retry) => {
                self.attempts += 1;
                DevicePhase::Connecting
            }
            (DevicePhase::Connecting, DeviceEvent::Authenticate) => DevicePhase::Authenticating,

            (DevicePhase::Authenticating, DeviceEvent::Push) => DevicePhase::Pushing,

            (DevicePhase::Pushing, DeviceEvent::Apply) => DevicePhase::Applied,

            // Any live phase may fail; the failing phase is kept
            (phase, DeviceEvent::Fail(err)) if !phase.is_terminal() => {
                self.failed_at = Some(phase);
                self.error = Some(err.clone());
                DevicePhase::Failed
            }

            // Invalid transitions
            (phase, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", phase, event));
            }
        };

        self.phase = new_phase;
        Ok(())
    }

    /// Whether `error` allows another connection attempt
    pub fn can_retry(&self, error: &DeviceError, max_attempts: u32) -> bool {
        self.phase == DevicePhase::Connecting && error.is_transient() && self.attempts < max_attempts
    }
}

impl Default for DeviceFsm {
    fn default() -> Self {
        Self::new()
    }
}
