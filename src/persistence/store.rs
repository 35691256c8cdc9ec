//! Local key-value storage
//!
//! String keys to string values, the shape of browser local storage.
//! In-memory for tests and embedding, one-file-per-key for the console.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::EngineError;
use crate::Result;

#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

//
// ================= In-memory =================
//

#[derive(Clone)]
pub struct InMemoryKeyValueStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

//
// ================= Directory-backed =================
//

/// One file per key under `root`. Writes go to a temp file first and are
/// renamed into place, so a crash never leaves a half-written value.
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(EngineError::StorageError(format!("invalid storage key: {:?}", key)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = self.root.join(format!(".{}.tmp", key));
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryKeyValueStore::new();
        store.set("run_id", "abc").await.unwrap();
        assert_eq!(store.get("run_id").await.unwrap().as_deref(), Some("abc"));

        store.remove("run_id").await.unwrap();
        store.remove("run_id").await.unwrap();
        assert_eq!(store.get("run_id").await.unwrap(), None);
        assert_eq!(store.len().await, 0);
    }

    #[test]
    fn test_default_store_starts_empty() {
        let store = InMemoryKeyValueStore::default();
        assert_eq!(tokio_test::block_on(store.len()), 0);
        assert_eq!(tokio_test::block_on(store.get("run_id")).unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileKeyValueStore::open(dir.path()).await.unwrap();
            store.set("itau_consignado_run_id", "run1").await.unwrap();
        }

        let store = FileKeyValueStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get("itau_consignado_run_id").await.unwrap().as_deref(), Some("run1"));
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.remove("itau_consignado_run_id").await.unwrap();
        store.remove("itau_consignado_run_id").await.unwrap();
        assert_eq!(store.get("itau_consignado_run_id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::open(dir.path().join("nested")).await.unwrap();
        assert!(store.root().is_dir());
        assert!(store.set("../escape", "x").await.is_err());
        assert!(store.get("").await.is_err());
    }
}
