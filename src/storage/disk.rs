use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use super::engine::{StorageEngine, StorageError};

/// Simple file-backed storage implementing the `StorageEngine` trait.
///
/// The whole map is mirrored to a single JSON file rewritten atomically
/// (temp file + rename) on every write. Intended for local persistence of a
/// modest outbox, not for high-volume workloads.
pub struct OnDiskStorage {
    data_file: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl OnDiskStorage {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(to_storage_error)?;
        let data_file = dir.join("outbox.json");
        let entries = if data_file.exists() {
            let bytes = fs::read(&data_file).map_err(to_storage_error)?;
            serde_json::from_slice(&bytes)
                .map_err(|err| StorageError::Corrupted(err.to_string()))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            data_file,
            entries: RwLock::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let serialized = serde_json::to_vec(entries).map_err(to_storage_error)?;
        let tmp = self.data_file.with_extension("tmp");
        fs::write(&tmp, serialized).map_err(to_storage_error)?;
        fs::rename(tmp, &self.data_file).map_err(to_storage_error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageEngine for OnDiskStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        entries.clear();
        self.persist(&entries)
    }
}

fn to_storage_error(err: impl ToString) -> StorageError {
    StorageError::Io(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = OnDiskStorage::open(dir.path()).unwrap();
            storage.set("tx:1", "payload".to_string()).await.unwrap();
        }

        let reopened = OnDiskStorage::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("tx:1").await.unwrap().as_deref(),
            Some("payload")
        );
    }

    #[tokio::test]
    async fn delete_and_clear_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = OnDiskStorage::open(dir.path()).unwrap();
        storage.set("tx:1", "a".to_string()).await.unwrap();
        storage.set("tx:2", "b".to_string()).await.unwrap();
        storage.delete("tx:1").await.unwrap();

        let reopened = OnDiskStorage::open(dir.path()).unwrap();
        assert!(reopened.get("tx:1").await.unwrap().is_none());
        assert!(reopened.get("tx:2").await.unwrap().is_some());

        reopened.clear().await.unwrap();
        let after_clear = OnDiskStorage::open(dir.path()).unwrap();
        assert!(after_clear.keys().await.unwrap().is_empty());
    }
}
