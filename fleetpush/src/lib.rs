//! fleetpush library
//!
//! Renders a configuration template per device and pushes it to a fleet of
//! network devices over SSH, tolerating individual device failures.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod inventory;
pub mod logs;
pub mod render;
pub mod settings;
pub mod transport;
pub mod utils;
