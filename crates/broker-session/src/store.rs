//! Broker-origin credential store
//!
//! A JSON file mapping credential names to string values with optional
//! expiry, standing in for the broker origin's cookie jar. Client frames
//! run on other origins and can never read it — the broker is the only
//! privileged holder of raw tokens. All writes use atomic temp-file +
//! rename to prevent corruption on crash, and a tokio Mutex serializes
//! concurrent writers from in-flight messages.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::{Error, Result};

/// Store key for the session's access token
pub const ACCESS_TOKEN_KEY: &str = "sso.access_token";
/// Store key for the session's id token
pub const ID_TOKEN_KEY: &str = "sso.id_token";
/// Store key for the session's refresh token
pub const REFRESH_TOKEN_KEY: &str = "sso.refresh_token";

/// A stored credential value.
///
/// `expires` is an absolute unix timestamp in milliseconds. `None` means
/// the value lives until removed (a session cookie).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
}

/// File-backed credential store with expiry semantics.
///
/// Reads acquire the lock briefly; expired entries are pruned at read time
/// so a lapsed value is indistinguishable from an absent one.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<String, StoredValue>>,
}

impl CredentialStore {
    /// Load the store from the given file path.
    ///
    /// A missing file is a cold start: the store begins empty and the file
    /// is created so future loads skip this path.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path).await?;
            let values: HashMap<String, StoredValue> = serde_json::from_str(&contents)
                .map_err(|e| Error::Config(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), entries = values.len(), "loaded credential store");
            values
        } else {
            info!(path = %path.display(), "credential file not found, starting empty");
            let values = HashMap::new();
            write_atomic(&path, &values).await?;
            values
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a value. Absent and expired entries both return `None`; an
    /// expired entry is pruned on the way out.
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let expired = match state.get(key) {
            Some(entry) => entry.expires.is_some_and(|at| at <= now_millis()),
            None => return None,
        };
        if expired {
            state.remove(key);
            if let Err(e) = write_atomic(&self.path, &state).await {
                warn!(key, error = %e, "failed to persist expired-entry prune");
            }
            return None;
        }
        state.get(key).map(|entry| entry.value.clone())
    }

    /// Add or replace a value, with an optional TTL in seconds.
    pub async fn set(&self, key: &str, value: String, ttl_secs: Option<u64>) -> Result<()> {
        let mut state = self.state.lock().await;
        let expires = ttl_secs.map(|ttl| now_millis() + ttl * 1000);
        state.insert(key.to_owned(), StoredValue { value, expires });
        debug!(key, "stored credential value");
        write_atomic(&self.path, &state).await
    }

    /// Remove a value. Idempotent: removing an absent key is not an error
    /// and skips the disk write.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.remove(key).is_some() {
            debug!(key, "removed credential value");
            write_atomic(&self.path, &state).await?;
        }
        Ok(())
    }

    /// Number of stored values, expired entries included.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    /// Whether the store holds no values.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Write the store to its file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 since the file holds session tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, StoredValue>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Config(format!("serializing credential store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Config("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes()).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms).await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;

    debug!(path = %path.display(), "persisted credential store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store
            .set(ACCESS_TOKEN_KEY, "at_1".into(), None)
            .await
            .unwrap();
        store
            .set(REFRESH_TOKEN_KEY, "rt_1".into(), None)
            .await
            .unwrap();

        let store2 = CredentialStore::load(path).await.unwrap();
        assert_eq!(store2.get(ACCESS_TOKEN_KEY).await.as_deref(), Some("at_1"));
        assert_eq!(store2.get(REFRESH_TOKEN_KEY).await.as_deref(), Some("rt_1"));
        assert!(store2.get(ID_TOKEN_KEY).await.is_none());
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        assert!(!path.exists());
        let store = CredentialStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, StoredValue> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();

        store.set("k", "v".into(), None).await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.is_none());

        // absent key: still Ok
        store.remove("k").await.unwrap();
        store.remove("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();

        // ttl of zero expires immediately
        store.set("ephemeral", "v".into(), Some(0)).await.unwrap();
        assert!(store.get("ephemeral").await.is_none());
        // and the prune removed the entry entirely
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn unexpired_ttl_entries_are_returned() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();

        store.set("cached", "v".into(), Some(3600)).await.unwrap();
        assert_eq!(store.get("cached").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn set_replaces_existing_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();

        store.set("k", "old".into(), None).await.unwrap();
        store.set("k", "new".into(), None).await.unwrap();
        assert_eq!(store.get("k").await.as_deref(), Some("new"));
        assert_eq!(store.len().await, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.set("k", "v".into(), None).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = std::sync::Arc::new(CredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set(&format!("key-{i}"), format!("value-{i}"), None)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.len().await, 10);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, StoredValue> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
    }

    #[tokio::test]
    async fn corrupt_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        assert!(CredentialStore::load(path).await.is_err());
    }
}
