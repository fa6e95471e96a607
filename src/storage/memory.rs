use std::collections::HashMap;

use tokio::sync::RwLock;

use super::engine::{StorageEngine, StorageError};

/// In-memory implementation of the `StorageEngine` trait. Not durable;
/// used by tests and by hosts that only want same-process queueing.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageEngine for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_cycle() {
        let storage = InMemoryStorage::new();
        storage.set("tx:a", "one".to_string()).await.unwrap();
        assert_eq!(storage.get("tx:a").await.unwrap().as_deref(), Some("one"));

        storage.set("tx:a", "two".to_string()).await.unwrap();
        assert_eq!(storage.get("tx:a").await.unwrap().as_deref(), Some("two"));

        storage.delete("tx:a").await.unwrap();
        assert!(storage.get("tx:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_lists_all_entries() {
        let storage = InMemoryStorage::new();
        storage.set("tx:a", "1".to_string()).await.unwrap();
        storage.set("meta", "2".to_string()).await.unwrap();

        let mut keys = storage.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["meta".to_string(), "tx:a".to_string()]);

        storage.clear().await.unwrap();
        assert!(storage.keys().await.unwrap().is_empty());
    }
}
