//! Durable key/value storage for the session slots.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::APP_NAME;

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

/// String slots backing the session store.
///
/// Implementations only move strings around; defaults and validation live in
/// `SessionStore`.
pub trait TokenStorage: Send + Sync {
    fn get(&self, slot: &str) -> Result<Option<String>>;

    fn set(&self, slot: &str, value: &str) -> Result<()>;

    /// Removing a slot that does not exist is not an error.
    fn remove(&self, slot: &str) -> Result<()>;

    /// When the storage was last written, if the backend tracks it
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl<T: TokenStorage + ?Sized> TokenStorage for Arc<T> {
    fn get(&self, slot: &str) -> Result<Option<String>> {
        (**self).get(slot)
    }

    fn set(&self, slot: &str, value: &str) -> Result<()> {
        (**self).set(slot, value)
    }

    fn remove(&self, slot: &str) -> Result<()> {
        (**self).remove(slot)
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        (**self).updated_at()
    }
}

// ============================================================================
// File storage
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    slots: BTreeMap<String, String>,
    updated_at: Option<DateTime<Utc>>,
}

/// Slots kept in a JSON document on disk.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            path: data_dir.join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read(&self) -> Result<SessionFile> {
        if !self.path.exists() {
            return Ok(SessionFile::default());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read session file")?;
        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    /// Current document, or an empty one if the file on disk is unusable
    fn read_or_reset(&self) -> SessionFile {
        self.read().unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Discarding unreadable session file");
            SessionFile::default()
        })
    }

    fn write(&self, mut file: SessionFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        file.updated_at = Some(Utc::now());
        let contents = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }
}

impl TokenStorage for FileStorage {
    fn get(&self, slot: &str) -> Result<Option<String>> {
        Ok(self.read()?.slots.get(slot).cloned())
    }

    fn set(&self, slot: &str, value: &str) -> Result<()> {
        let mut file = self.read_or_reset();
        file.slots.insert(slot.to_string(), value.to_string());
        self.write(file)
    }

    fn remove(&self, slot: &str) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let mut file = match self.read() {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Removing unreadable session file");
                std::fs::remove_file(&self.path).context("Failed to remove session file")?;
                return Ok(());
            }
        };
        if file.slots.remove(slot).is_none() {
            return Ok(());
        }
        if file.slots.is_empty() {
            std::fs::remove_file(&self.path).context("Failed to remove session file")?;
            return Ok(());
        }
        self.write(file)
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.read().ok().and_then(|f| f.updated_at)
    }
}

// ============================================================================
// Keyring storage
// ============================================================================

/// Slots kept as OS keychain entries, one entry per slot.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(format!("{}-session", APP_NAME))
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, slot: &str) -> Result<Entry> {
        Entry::new(&self.service, slot).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStorage for KeyringStorage {
    fn get(&self, slot: &str) -> Result<Option<String>> {
        match self.entry(slot)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read session slot from keychain"),
        }
    }

    fn set(&self, slot: &str, value: &str) -> Result<()> {
        self.entry(slot)?
            .set_password(value)
            .context("Failed to store session slot in keychain")
    }

    fn remove(&self, slot: &str) -> Result<()> {
        match self.entry(slot)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session slot from keychain"),
        }
    }
}

// ============================================================================
// Memory storage
// ============================================================================

/// In-process slots; nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.slots
            .lock()
            .map_err(|_| anyhow::anyhow!("Session memory storage lock poisoned"))
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, slot: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(slot).cloned())
    }

    fn set(&self, slot: &str, value: &str) -> Result<()> {
        self.lock()?.insert(slot.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, slot: &str) -> Result<()> {
        self.lock()?.remove(slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().to_path_buf());
        assert_eq!(storage.get("token").expect("get"), None);
        assert!(storage.updated_at().is_none());
        // Removing from a store that was never written is fine
        storage.remove("token").expect("remove");
        assert!(!storage.path().exists());
    }

    #[test]
    fn test_file_storage_set_get_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().join("nested"));

        storage.set("token", "abc").expect("set");
        storage.set("token_type", "bearer").expect("set");
        assert_eq!(storage.get("token").expect("get").as_deref(), Some("abc"));
        assert!(storage.updated_at().is_some());

        // A second handle on the same directory sees the same slots
        let reopened = FileStorage::new(dir.path().join("nested"));
        assert_eq!(reopened.get("token_type").expect("get").as_deref(), Some("bearer"));

        storage.remove("token").expect("remove");
        assert_eq!(storage.get("token").expect("get"), None);
        assert!(storage.path().exists());

        storage.remove("token_type").expect("remove");
        assert!(!storage.path().exists());
    }

    #[test]
    fn test_file_storage_rejects_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().to_path_buf());
        std::fs::write(storage.path(), "not json").expect("write");
        assert!(storage.get("token").is_err());
    }

    #[test]
    fn test_file_storage_recovers_from_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().to_path_buf());

        std::fs::write(storage.path(), "{ broken").expect("write");
        storage.set("token", "fresh").expect("set over corrupt file");
        assert_eq!(storage.get("token").expect("get").as_deref(), Some("fresh"));

        std::fs::write(storage.path(), "{ broken").expect("write");
        storage.remove("token").expect("remove over corrupt file");
        assert!(!storage.path().exists());
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.set("api_key", "k").expect("set");
        assert_eq!(storage.get("api_key").expect("get").as_deref(), Some("k"));
        storage.remove("api_key").expect("remove");
        storage.remove("api_key").expect("remove twice");
        assert_eq!(storage.get("api_key").expect("get"), None);
    }
}
