use crate::api::Error;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    TokenId,
    SerialNumber,
    AutoRefresh,
    RefreshInterval,
    BiometricEnabled,
}

impl StorageKey {
    /// Name under which the value is persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::TokenId => "solax_token_id",
            StorageKey::SerialNumber => "solax_sn",
            StorageKey::AutoRefresh => "autoRefresh",
            StorageKey::RefreshInterval => "refreshInterval",
            StorageKey::BiometricEnabled => "biometricEnabled",
        }
    }
}

/// Key-value persistence for credentials and preferences.
///
/// Absence of a key is never an error: `get` returns `Ok(None)`. Writes of several keys are
/// independent, a crash between two `set` calls may leave them half-applied.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: StorageKey) -> Result<Option<String>, Error>;
    async fn set(&self, key: StorageKey, value: &str) -> Result<(), Error>;
    async fn remove(&self, key: StorageKey) -> Result<(), Error>;
}

/// Volatile store, lost with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<StorageKey, String>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: StorageKey) -> Result<Option<String>, Error> {
        Ok(self.values.read().await.get(&key).cloned())
    }

    async fn set(&self, key: StorageKey, value: &str) -> Result<(), Error> {
        self.values.write().await.insert(key, value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: StorageKey) -> Result<(), Error> {
        self.values.write().await.remove(&key);
        Ok(())
    }
}

/// Store persisted as a flat JSON object, rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<FileStore, Error> {
        let path = path.as_ref().to_path_buf();

        let values = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                Error::StorageError(format!("{} is corrupt: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("{} does not exist yet, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                return Err(Error::StorageError(format!(
                    "Error reading {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(FileStore {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), Error> {
        let text = serde_json::to_string_pretty(values)
            .map_err(|e| Error::StorageError(e.to_string()))?;

        /* write-then-rename so a crash never leaves a truncated file behind */
        let tmp = self.path.with_extension("tmp");
        let write_err =
            |e: std::io::Error| Error::StorageError(format!("Error writing {}: {}", tmp.display(), e));

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        /* the token is a secret: owner-only */
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await.map_err(write_err)?;
        file.write_all(text.as_bytes()).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::StorageError(format!("Error replacing {}: {}", self.path.display(), e))
        })
    }

    /// Apply `change` to a copy of the values and keep it only once it is on disk.
    async fn update<F>(&self, change: F) -> Result<(), Error>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool + Send,
    {
        let mut values = self.values.lock().await;
        let mut next = values.clone();
        if !change(&mut next) {
            return Ok(());
        }

        self.persist(&next).await?;
        *values = next;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: StorageKey) -> Result<Option<String>, Error> {
        Ok(self.values.lock().await.get(key.as_str()).cloned())
    }

    async fn set(&self, key: StorageKey, value: &str) -> Result<(), Error> {
        self.update(|values| {
            values.insert(key.as_str().to_owned(), value.to_owned());
            true
        })
        .await
    }

    async fn remove(&self, key: StorageKey) -> Result<(), Error> {
        self.update(|values| values.remove(key.as_str()).is_some())
            .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn memory_store_absent_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(None, store.get(StorageKey::TokenId).await.unwrap());
        store.remove(StorageKey::TokenId).await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_set_get_remove() {
        let store = MemoryStore::new();
        store.set(StorageKey::SerialNumber, "SN123").await.unwrap();
        assert_eq!(
            Some("SN123".to_string()),
            store.get(StorageKey::SerialNumber).await.unwrap()
        );
        assert_eq!(None, store.get(StorageKey::TokenId).await.unwrap());

        store.remove(StorageKey::SerialNumber).await.unwrap();
        assert_eq!(None, store.get(StorageKey::SerialNumber).await.unwrap());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(None, store.get(StorageKey::TokenId).await.unwrap());
        store.set(StorageKey::TokenId, "token").await.unwrap();
        store.set(StorageKey::RefreshInterval, "5").await.unwrap();
        drop(store);

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(
            Some("token".to_string()),
            store.get(StorageKey::TokenId).await.unwrap()
        );
        assert_eq!(
            Some("5".to_string()),
            store.get(StorageKey::RefreshInterval).await.unwrap()
        );

        store.remove(StorageKey::TokenId).await.unwrap();
        drop(store);

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(None, store.get(StorageKey::TokenId).await.unwrap());
    }

    #[tokio::test]
    async fn file_store_uses_persisted_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).await.unwrap();
        store.set(StorageKey::SerialNumber, "SN123").await.unwrap();
        store.set(StorageKey::BiometricEnabled, "true").await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!("SN123", value["solax_sn"]);
        assert_eq!("true", value["biometricEnabled"]);
    }

    #[tokio::test]
    async fn file_store_keeps_values_when_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        std::fs::create_dir(&state_dir).unwrap();

        let store = FileStore::open(state_dir.join("store.json")).await.unwrap();
        store.set(StorageKey::TokenId, "old").await.unwrap();
        std::fs::remove_dir_all(&state_dir).unwrap();

        match store.set(StorageKey::TokenId, "new").await {
            Err(Error::StorageError(_)) => (),
            other => panic!("expected StorageError, got {:?}", other),
        }
        assert_eq!(
            Some("old".to_string()),
            store.get(StorageKey::TokenId).await.unwrap()
        );

        assert!(store.remove(StorageKey::TokenId).await.is_err());
        assert_eq!(
            Some("old".to_string()),
            store.get(StorageKey::TokenId).await.unwrap()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).await.unwrap();
        store.set(StorageKey::TokenId, "token").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(0o600, mode & 0o777);
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        match FileStore::open(&path).await {
            Err(Error::StorageError(_)) => (),
            other => panic!("expected StorageError, got {:?}", other.map(|_| ())),
        }
    }
}
