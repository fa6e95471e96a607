use std::path::Path;

use crate::storage::{InMemoryStorage, OnDiskStorage, StorageEngine, StorageError};

/// Runtime-selectable storage wrapper so binaries can switch between memory
/// and disk without generics.
pub enum StorageAdapter {
    Memory(InMemoryStorage),
    Disk(OnDiskStorage),
}

impl StorageAdapter {
    pub fn memory() -> Self {
        Self::Memory(InMemoryStorage::new())
    }

    pub fn disk(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self::Disk(OnDiskStorage::open(path)?))
    }
}

#[async_trait::async_trait]
impl StorageEngine for StorageAdapter {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self {
            StorageAdapter::Memory(inner) => inner.get(key).await,
            StorageAdapter::Disk(inner) => inner.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        match self {
            StorageAdapter::Memory(inner) => inner.set(key, value).await,
            StorageAdapter::Disk(inner) => inner.set(key, value).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self {
            StorageAdapter::Memory(inner) => inner.delete(key).await,
            StorageAdapter::Disk(inner) => inner.delete(key).await,
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        match self {
            StorageAdapter::Memory(inner) => inner.keys().await,
            StorageAdapter::Disk(inner) => inner.keys().await,
        }
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match self {
            StorageAdapter::Memory(inner) => inner.clear().await,
            StorageAdapter::Disk(inner) => inner.clear().await,
        }
    }
}
