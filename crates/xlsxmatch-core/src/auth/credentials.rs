use anyhow::{Context, Result};
use keyring::Entry;
use tracing::debug;

use crate::config::APP_NAME;

/// Login passwords remembered in the OS keychain, one entry per username.
///
/// Only used when the user asks for it; the session itself never depends on
/// a remembered password.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    service: String,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::with_service(APP_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, username: &str) -> Result<Entry> {
        let username = username.trim();
        if username.is_empty() {
            anyhow::bail!("A username is required to use the keychain");
        }
        Entry::new(&self.service, username).context("Failed to create keyring entry")
    }

    /// Remembered password for `username`, if there is one
    pub fn lookup(&self, username: &str) -> Result<Option<String>> {
        match self.entry(username)?.get_password() {
            Ok(password) => Ok(Some(password).filter(|p| !p.is_empty())),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve password from keychain"),
        }
    }

    pub fn remember(&self, username: &str, password: &str) -> Result<()> {
        self.entry(username)?
            .set_password(password)
            .context("Failed to store password in keychain")?;
        debug!(username = username, "Password remembered");
        Ok(())
    }

    /// Forget the password. Forgetting one that was never stored is fine.
    pub fn forget(&self, username: &str) -> Result<()> {
        match self.entry(username)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
