use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::storage::{MemoryStorage, TokenStorage};

/// Storage slot for the access token. Also read on its own by session verification.
pub const TOKEN_SLOT: &str = "token";
pub const API_KEY_SLOT: &str = "api_key";
pub const TOKEN_TYPE_SLOT: &str = "token_type";

/// Token type used when the server or the store does not provide one
pub const DEFAULT_TOKEN_TYPE: &str = "bearer";

/// Credentials of the logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSnapshot {
    pub access_token: String,
    pub token_type: String,
    pub api_key: Option<String>,
}

impl AuthSnapshot {
    pub fn new(
        access_token: impl Into<String>,
        token_type: Option<&str>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: normalize_token_type(token_type),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    /// Value of the `Authorization` header, e.g. `bearer abc123`
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

fn normalize_token_type(token_type: Option<&str>) -> String {
    token_type
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TOKEN_TYPE)
        .to_lowercase()
}

/// Single source of truth for the current session.
///
/// A store without a backend (`detached`) accepts every call and never
/// reports a session, so callers running where no storage exists do not
/// need to special-case it.
pub struct SessionStore {
    storage: Option<Box<dyn TokenStorage>>,
}

impl SessionStore {
    pub fn new(storage: impl TokenStorage + 'static) -> Self {
        Self {
            storage: Some(Box::new(storage)),
        }
    }

    pub fn detached() -> Self {
        Self { storage: None }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    pub fn is_detached(&self) -> bool {
        self.storage.is_none()
    }

    /// Persist a snapshot, replacing whatever was stored before.
    pub fn set_auth(&self, snapshot: &AuthSnapshot) -> Result<()> {
        let Some(storage) = self.storage.as_deref() else {
            return Ok(());
        };

        storage.set(TOKEN_SLOT, &snapshot.access_token)?;
        match snapshot.api_key.as_deref() {
            Some(key) if !key.is_empty() => storage.set(API_KEY_SLOT, key)?,
            _ => storage.remove(API_KEY_SLOT)?,
        }
        storage.set(
            TOKEN_TYPE_SLOT,
            &normalize_token_type(Some(&snapshot.token_type)),
        )?;

        debug!(has_api_key = snapshot.api_key.is_some(), "Session stored");
        Ok(())
    }

    /// Current snapshot, or `None` when no access token is stored.
    pub fn get_auth(&self) -> Option<AuthSnapshot> {
        let access_token = self.read(TOKEN_SLOT)?;
        let api_key = self.read(API_KEY_SLOT);
        let token_type = self.read(TOKEN_TYPE_SLOT);

        Some(AuthSnapshot {
            access_token,
            token_type: normalize_token_type(token_type.as_deref()),
            api_key,
        })
    }

    pub fn clear_auth(&self) -> Result<()> {
        let Some(storage) = self.storage.as_deref() else {
            return Ok(());
        };
        storage.remove(TOKEN_SLOT)?;
        storage.remove(API_KEY_SLOT)?;
        storage.remove(TOKEN_TYPE_SLOT)?;
        debug!("Session cleared");
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.get_auth().is_some()
    }

    /// The bare access token, without the rest of the snapshot
    pub fn token(&self) -> Option<String> {
        self.read(TOKEN_SLOT)
    }

    /// Drop only the access token; the API key and token type stay behind.
    pub fn clear_token(&self) -> Result<()> {
        match self.storage.as_deref() {
            Some(storage) => storage.remove(TOKEN_SLOT),
            None => Ok(()),
        }
    }

    /// When the backing store was last written, if known
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.storage.as_deref().and_then(|s| s.updated_at())
    }

    fn read(&self, slot: &str) -> Option<String> {
        let storage = self.storage.as_deref()?;
        match storage.get(slot) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(slot = slot, error = %e, "Failed to read session slot");
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("detached", &self.is_detached())
            .finish()
    }
}
