//! Deployment module

pub mod engine;
pub mod fsm;
pub mod report;

pub use engine::{DeployOptions, Deployment};
pub use fsm::DevicePhase;
pub use report::{DeploymentReport, DeviceOutcome};
