//! YAML inventory loader

use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::errors::DeployError;
use crate::inventory::record::{record_from_fields, Inventory, LoadRules};

/// Parse a YAML inventory: a sequence of device mappings with scalar values.
pub fn parse_yaml(origin: &str, contents: &str, rules: &LoadRules) -> Result<Inventory, DeployError> {
    if contents.trim().is_empty() {
        return Ok(Inventory::default());
    }

    let entries: Vec<BTreeMap<String, Value>> =
        serde_yaml::from_str(contents).map_err(|e| DeployError::load(origin, e))?;

    let mut devices = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let mut fields = BTreeMap::new();
        for (key, value) in entry {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                _ => {
                    return Err(DeployError::Validation(format!(
                        "{origin}: row {} field '{key}' must be a scalar",
                        index + 1
                    )))
                }
            };
            fields.insert(key, text);
        }
        devices.push(record_from_fields(origin, index + 1, fields, rules)?);
    }

    Ok(Inventory::new(devices))
}
