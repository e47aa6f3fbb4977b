//! Per-device template rendering
//!
//! Templates use Tera syntax. Every device sees `host`, `port`, `username`,
//! `index` and its custom inventory attributes; core fields shadow attributes
//! of the same name. Referencing anything else is a render error.

use std::collections::BTreeMap;

use tera::{Context, Tera, Value};

use crate::errors::{DeployError, DeviceError};
use crate::inventory::DeviceRecord;

const TEMPLATE_NAME: &str = "device-config";

/// Device-scoped values available to a template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceContext {
    values: BTreeMap<String, Value>,
}

impl DeviceContext {
    /// Context for the device at `index` in the inventory
    pub fn for_device(index: usize, device: &DeviceRecord) -> Self {
        let mut values: BTreeMap<String, Value> = device
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        values.insert("host".into(), Value::String(device.host.clone()));
        values.insert("port".into(), Value::from(device.port));
        values.insert("index".into(), Value::from(index));
        if let Some(username) = &device.username {
            values.insert("username".into(), Value::String(username.clone()));
        }
        Self { values }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    fn to_tera(&self) -> Context {
        let mut context = Context::new();
        for (key, value) in &self.values {
            context.insert(key.as_str(), value);
        }
        context
    }
}

/// A template compiled once and rendered for many devices
#[derive(Debug)]
pub struct TemplateRenderer {
    tera: Tera,
}

impl TemplateRenderer {
    /// Compile `raw`; syntax errors surface before any device is touched
    pub fn compile(raw: &str) -> Result<Self, DeployError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_template(TEMPLATE_NAME, raw).map_err(|e| {
            DeployError::Validation(format!("template does not compile: {}", error_chain(&e)))
        })?;
        Ok(Self { tera })
    }

    /// Render for one device. Pure: same context, same bytes.
    pub fn render(&self, context: &DeviceContext) -> Result<String, DeviceError> {
        self.tera
            .render(TEMPLATE_NAME, &context.to_tera())
            .map_err(|e| DeviceError::Render(error_chain(&e)))
    }
}

/// One-shot render of a raw template
pub fn render(raw: &str, context: &DeviceContext) -> Result<String, DeviceError> {
    Tera::one_off(raw, &context.to_tera(), false).map_err(|e| DeviceError::Render(error_chain(&e)))
}

/// Tera keeps the useful part of its messages in the source chain
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
