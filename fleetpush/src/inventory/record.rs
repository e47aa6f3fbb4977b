//! Device records and the inventory they form

use std::collections::BTreeMap;
use std::fmt;

use secrecy::SecretString;
use serde::Serialize;

use crate::errors::DeployError;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// One device's connection and identity metadata
#[derive(Debug, Serialize)]
pub struct DeviceRecord {
    /// Hostname or address, never empty
    pub host: String,

    /// SSH port
    pub port: u16,

    /// Login user, falls back to the global username when absent
    pub username: Option<String>,

    /// Login password, falls back to the global password when absent
    #[serde(skip)]
    pub password: Option<SecretString>,

    /// Every other inventory column, exposed to templates
    pub attributes: BTreeMap<String, String>,
}

impl DeviceRecord {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// `host:port` as dialed
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Ordered, read-only collection of devices targeted by a deployment
#[derive(Debug, Default)]
pub struct Inventory {
    devices: Vec<DeviceRecord>,
}

impl Inventory {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn get(&self, index: usize) -> Option<&DeviceRecord> {
        self.devices.get(index)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.iter()
    }
}

/// Rules applied to every row while loading
#[derive(Debug, Clone, Copy)]
pub struct LoadRules {
    /// Reject rows (and CSV headers) without a password
    pub require_password: bool,

    /// Port used when a row has none
    pub default_port: u16,
}

impl Default for LoadRules {
    fn default() -> Self {
        Self {
            require_password: true,
            default_port: DEFAULT_PORT,
        }
    }
}

/// Build a record from one row of named string fields.
///
/// `position` is the 1-based row number used in error messages. Empty values
/// count as absent.
pub(crate) fn record_from_fields(
    origin: &str,
    position: usize,
    fields: BTreeMap<String, String>,
    rules: &LoadRules,
) -> Result<DeviceRecord, DeployError> {
    let mut host = None;
    let mut port = None;
    let mut username = None;
    let mut password = None;
    let mut attributes = BTreeMap::new();

    for (key, value) in fields {
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }
        match key.trim().to_ascii_lowercase().as_str() {
            "host" => host = Some(value),
            "port" => port = Some(value),
            "username" => username = Some(value),
            "password" => password = Some(value),
            _ => {
                attributes.insert(key.trim().to_string(), value);
            }
        }
    }

    let host = host.ok_or_else(|| {
        DeployError::Validation(format!("{origin}: row {position} has no host"))
    })?;

    let port = match port {
        Some(raw) => raw.parse::<u16>().map_err(|_| {
            DeployError::Validation(format!(
                "{origin}: row {position} ({host}) has invalid port '{raw}'"
            ))
        })?,
        None => rules.default_port,
    };

    if rules.require_password && password.is_none() {
        return Err(DeployError::Validation(format!(
            "{origin}: row {position} ({host}) has no password"
        )));
    }

    Ok(DeviceRecord {
        host,
        port,
        username,
        password: password.map(SecretString::from),
        attributes,
    })
}
