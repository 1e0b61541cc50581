//! Opaque key-value credential store boundary.
//!
//! Durable persistence is an external collaborator: the host hands the
//! client any string key-value store (config file, database, plugin KV)
//! behind [`CredentialStore`]. This module only defines the seam, the
//! in-process [`MemoryStore`], and the load/save helpers with their
//! "no active session" semantics: a missing, unreadable, or token-less
//! credential document loads as `None` so callers can prompt for a fresh
//! login instead of handling errors.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::credentials::Credentials;

/// Store key under which the credential document is kept.
pub const CREDENTIALS_STORE_KEY: &str = "meiju_credentials";

/// Error type for credential store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("credential store error: {0}")]
pub struct StoreError(pub String);

/// Opaque string key-value store for credential persistence.
///
/// Implementations are supplied by the host. Only three operations are
/// required; the client never enumerates keys or assumes durability
/// semantics beyond read-your-writes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes the value stored under `key`, if any.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process credential store backed by a `HashMap`.
///
/// Useful for tests and for embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Loads the persisted credential set, treating anything unusable as
/// "no active session".
///
/// Returns `Ok(None)` for a missing document, unparseable JSON, or an
/// empty access token; `Err` is reserved for store transport failures.
pub async fn load_credentials(
    store: &dyn CredentialStore,
) -> Result<Option<Credentials>, StoreError> {
    let Some(json) = store.get(CREDENTIALS_STORE_KEY).await? else {
        return Ok(None);
    };

    let creds = match Credentials::from_json(&json) {
        Ok(creds) => creds,
        Err(err) => {
            warn!("stored credentials are unreadable: {err}");
            return Ok(None);
        }
    };

    if creds.access_token.is_empty() {
        warn!("stored credentials have no access token");
        return Ok(None);
    }

    Ok(Some(creds))
}

/// Persists the credential set as one atomic document.
pub async fn save_credentials(
    store: &dyn CredentialStore,
    creds: &Credentials,
) -> Result<(), StoreError> {
    store.set(CREDENTIALS_STORE_KEY, &creds.to_json()).await
}

/// Removes any persisted credentials.
pub async fn clear_credentials(store: &dyn CredentialStore) -> Result<(), StoreError> {
    store.delete(CREDENTIALS_STORE_KEY).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_missing_is_no_session() {
        let store = MemoryStore::new();
        assert_eq!(load_credentials(&store).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_unparseable_is_no_session() {
        let store = MemoryStore::new();
        store.set(CREDENTIALS_STORE_KEY, "not json").await.unwrap();
        assert_eq!(load_credentials(&store).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_without_token_is_no_session() {
        let store = MemoryStore::new();
        let creds = Credentials::new("user", "", "key");
        save_credentials(&store, &creds).await.unwrap();
        assert_eq!(load_credentials(&store).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_load_clear() {
        let store = MemoryStore::new();
        let creds = Credentials::new("user", "TOK1", "key").with_password("pw");
        save_credentials(&store, &creds).await.unwrap();

        let loaded = load_credentials(&store).await.unwrap().unwrap();
        assert_eq!(loaded, creds);

        clear_credentials(&store).await.unwrap();
        assert_eq!(load_credentials(&store).await.unwrap(), None);
    }
}
