//! CSV inventory loader

use std::collections::BTreeMap;

use crate::errors::DeployError;
use crate::inventory::record::{record_from_fields, Inventory, LoadRules};

/// Parse a CSV inventory.
///
/// The header row must name a `host` column, and a `password` column when
/// `rules.require_password` is set. Remaining columns become attributes.
pub fn parse_csv(origin: &str, contents: &str, rules: &LoadRules) -> Result<Inventory, DeployError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DeployError::load(origin, e))?
        .iter()
        .map(str::to_string)
        .collect();

    let has_column = |name: &str| headers.iter().any(|h| h.eq_ignore_ascii_case(name));
    if !has_column("host") {
        return Err(DeployError::Validation(format!(
            "{origin}: header row has no 'host' column"
        )));
    }
    if rules.require_password && !has_column("password") {
        return Err(DeployError::Validation(format!(
            "{origin}: header row has no 'password' column and no other credential source is configured"
        )));
    }

    let mut devices = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|e| DeployError::load(origin, e))?;
        let fields: BTreeMap<String, String> = headers
            .iter()
            .cloned()
            .zip(row.iter().map(str::to_string))
            .collect();
        devices.push(record_from_fields(origin, index + 1, fields, rules)?);
    }

    Ok(Inventory::new(devices))
}
