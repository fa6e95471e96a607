use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by storage implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failure: {0}")]
    Io(String),
    #[error("storage state is corrupted: {0}")]
    Corrupted(String),
}

/// Abstract durable key/value blob store backing the outbox.
///
/// Implementations serialize their own operations internally; the only
/// ordering guarantee the executor relies on is that a `set` observed after
/// a `delete` reflects the later write. Durability across process restarts
/// is what makes the outbox's persistence semantics hold.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    async fn clear(&self) -> Result<(), StorageError>;
}
