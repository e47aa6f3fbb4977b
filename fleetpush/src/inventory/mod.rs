//! Inventory module
//!
//! Loads device records from CSV or YAML files into an [`Inventory`].

mod csv_file;
mod record;
mod yaml_file;

pub use csv_file::parse_csv;
pub use record::{DeviceRecord, Inventory, LoadRules, DEFAULT_PORT};
pub use yaml_file::parse_yaml;

use std::path::Path;

use tracing::info;

use crate::errors::DeployError;
use crate::filesys::file::File;

/// Supported inventory file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryFormat {
    Csv,
    Yaml,
}

impl InventoryFormat {
    /// Pick the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self, DeployError> {
        match File::new(path).extension().as_deref() {
            Some("csv") => Ok(InventoryFormat::Csv),
            Some("yml") | Some("yaml") => Ok(InventoryFormat::Yaml),
            _ => Err(DeployError::Config(format!(
                "inventory file {} is not of type CSV or YAML",
                path.display()
            ))),
        }
    }
}

/// Load an inventory file
pub async fn load(path: impl AsRef<Path>, rules: &LoadRules) -> Result<Inventory, DeployError> {
    let path = path.as_ref();
    let format = InventoryFormat::from_path(path)?;
    let contents = File::new(path).read_string().await?;
    let origin = path.display().to_string();

    let inventory = match format {
        InventoryFormat::Csv => parse_csv(&origin, &contents, rules)?,
        InventoryFormat::Yaml => parse_yaml(&origin, &contents, rules)?,
    };

    info!(path = %origin, devices = inventory.len(), "Inventory loaded");
    Ok(inventory)
}
