//! Authentication strategies
//!
//! An [`Authentication`] is built once per run and shared read-only by every
//! device task. Key material is decoded at construction so a bad key stops the
//! run before any device is contacted.

use std::path::Path;
use std::sync::Arc;

use russh_keys::key::KeyPair;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::errors::{DeployError, DeviceError};
use crate::filesys::file::File;
use crate::inventory::{DeviceRecord, Inventory};
use crate::transport::Session;

/// Credentials resolved for one device
#[derive(Clone, Copy)]
pub enum Credentials<'a> {
    Password {
        username: &'a str,
        password: &'a SecretString,
    },
    PublicKey {
        username: &'a str,
        key: &'a Arc<KeyPair>,
    },
}

impl Credentials<'_> {
    pub fn username(&self) -> &str {
        match self {
            Credentials::Password { username, .. } | Credentials::PublicKey { username, .. } => {
                *username
            }
        }
    }
}

impl std::fmt::Debug for Credentials<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Credentials::Password { .. } => "password",
            Credentials::PublicKey { .. } => "public-key",
        };
        f.debug_struct("Credentials")
            .field("kind", &kind)
            .field("username", &self.username())
            .finish()
    }
}

/// Global credentials used when an inventory row omits its own
#[derive(Debug, Default)]
pub struct FallbackCredentials {
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl FallbackCredentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self {
            username,
            password: password.map(SecretString::from),
        }
    }
}

/// Username/password resolved per device
#[derive(Debug)]
pub struct BasicAuth {
    fallback: FallbackCredentials,
}

/// A private key decoded once and reused for every device
pub struct KeyAuth {
    key: Arc<KeyPair>,
    fallback_username: Option<String>,
}

impl std::fmt::Debug for KeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAuth")
            .field("fallback_username", &self.fallback_username)
            .finish_non_exhaustive()
    }
}

/// Credential strategy shared by all device connections
#[derive(Debug)]
pub enum Authentication {
    Basic(BasicAuth),
    Key(KeyAuth),
}

impl Authentication {
    /// Basic authentication. Fails unless every device resolves both a
    /// username and a password from its record or `fallback`.
    pub fn basic(inventory: &Inventory, fallback: FallbackCredentials) -> Result<Self, DeployError> {
        let auth = Authentication::Basic(BasicAuth { fallback });
        auth.check_inventory(inventory)?;
        Ok(auth)
    }

    /// Key authentication from a PEM/OpenSSH private key file
    pub async fn key_from_file(
        path: impl AsRef<Path>,
        passphrase: Option<SecretString>,
        fallback_username: Option<String>,
    ) -> Result<Self, DeployError> {
        let path = path.as_ref();
        let pem = File::new(path).read_string().await.map_err(|e| {
            DeployError::AuthConfig(format!("unable to read key file {}: {e}", path.display()))
        })?;
        let auth = Self::key_from_pem(&pem, passphrase, fallback_username).map_err(|e| match e {
            DeployError::AuthConfig(message) => {
                DeployError::AuthConfig(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;
        info!(path = %path.display(), "Private key loaded");
        Ok(auth)
    }

    /// Key authentication from in-memory key material
    pub fn key_from_pem(
        pem: &str,
        passphrase: Option<SecretString>,
        fallback_username: Option<String>,
    ) -> Result<Self, DeployError> {
        let passphrase = passphrase.as_ref().map(|p| p.expose_secret());
        let key = russh_keys::decode_secret_key(pem, passphrase)
            .map_err(|e| DeployError::AuthConfig(format!("unable to decode private key: {e}")))?;

        Ok(Authentication::Key(KeyAuth {
            key: Arc::new(key),
            fallback_username,
        }))
    }

    pub fn is_key(&self) -> bool {
        matches!(self, Authentication::Key(_))
    }

    /// Resolve the credentials for one device
    pub fn credentials_for<'a>(
        &'a self,
        device: &'a DeviceRecord,
    ) -> Result<Credentials<'a>, DeviceError> {
        match self {
            Authentication::Basic(basic) => {
                let username = device
                    .username
                    .as_deref()
                    .or(basic.fallback.username.as_deref());
                let password = device.password.as_ref().or(basic.fallback.password.as_ref());
                match (username, password) {
                    (Some(username), Some(password)) => {
                        Ok(Credentials::Password { username, password })
                    }
                    _ => Err(DeviceError::Authentication(format!(
                        "no credentials available for {device}"
                    ))),
                }
            }
            Authentication::Key(key_auth) => {
                let username = device
                    .username
                    .as_deref()
                    .or(key_auth.fallback_username.as_deref())
                    .ok_or_else(|| {
                        DeviceError::Authentication(format!("no username available for {device}"))
                    })?;
                Ok(Credentials::PublicKey {
                    username,
                    key: &key_auth.key,
                })
            }
        }
    }

    /// Every device must resolve credentials before any of them is contacted
    pub fn check_inventory(&self, inventory: &Inventory) -> Result<(), DeployError> {
        let unresolved: Vec<String> = inventory
            .iter()
            .enumerate()
            .filter(|(_, device)| self.credentials_for(device).is_err())
            .map(|(index, device)| format!("#{index} {device}"))
            .collect();

        if unresolved.is_empty() {
            return Ok(());
        }

        let missing = match self {
            Authentication::Basic(_) => "username and password",
            Authentication::Key(_) => "username",
        };
        Err(DeployError::AuthConfig(format!(
            "no {missing} source for {}",
            unresolved.join(", ")
        )))
    }

    /// Authenticate an open session for `device`
    pub async fn authenticate(
        &self,
        session: &mut dyn Session,
        device: &DeviceRecord,
    ) -> Result<(), DeviceError> {
        let credentials = self.credentials_for(device)?;
        session.authenticate(credentials).await
    }
}
