//! Per-device outcomes and their fleet-wide aggregation

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::deploy::fsm::DevicePhase;
use crate::errors::DeviceError;
use crate::transport::CommitResult;

/// Result for one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceOutcome {
    /// Position in the inventory
    pub index: usize,
    pub host: String,
    pub port: u16,

    /// `Applied` on success, otherwise the phase that failed
    pub phase: DevicePhase,
    pub success: bool,
    pub error: Option<DeviceError>,

    /// Connection attempts made
    pub attempts: u32,
    pub duration_ms: u64,

    /// Device response, present when the push completed
    pub commit: Option<CommitResult>,
}

/// Outcome of one `deploy` call, ordered by inventory index
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<DeviceOutcome>,

    /// True iff every outcome succeeded
    pub success: bool,
}

impl DeploymentReport {
    pub fn failed(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    pub fn applied(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| o.success)
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }
}

/// The only state shared between device tasks: one slot per inventory index
#[derive(Debug, Default)]
pub struct OutcomeCollector {
    outcomes: Mutex<BTreeMap<usize, DeviceOutcome>>,
}

impl OutcomeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a device outcome. A second write for the same index is ignored.
    pub async fn insert(&self, outcome: DeviceOutcome) -> bool {
        let mut outcomes = self.outcomes.lock().await;
        if outcomes.contains_key(&outcome.index) {
            return false;
        }
        outcomes.insert(outcome.index, outcome);
        true
    }

    pub async fn contains(&self, index: usize) -> bool {
        self.outcomes.lock().await.contains_key(&index)
    }

    /// Drain into a report in inventory order
    pub async fn take_report(&self, run_id: Uuid, started_at: DateTime<Utc>) -> DeploymentReport {
        let outcomes: Vec<DeviceOutcome> = std::mem::take(&mut *self.outcomes.lock().await)
            .into_values()
            .collect();
        let success = outcomes.iter().all(|o| o.success);
        DeploymentReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            success,
        }
    }
}
