use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::storage::{StorageAdapter, StorageError};

/// Backend selection for the durable store behind the outbox.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Disk,
}

/// Declarative storage choice resolvable to a [`StorageAdapter`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the disk backend; ignored by the memory backend.
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
        }
    }

    pub fn disk(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Disk,
            path: Some(path.into()),
        }
    }

    pub fn build(&self) -> Result<StorageAdapter, StorageError> {
        match self.backend {
            StorageBackend::Memory => Ok(StorageAdapter::memory()),
            StorageBackend::Disk => {
                let path = self.path.clone().ok_or_else(|| {
                    StorageError::Io("disk storage requires a path".to_string())
                })?;
                StorageAdapter::disk(path)
            }
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::memory()
    }
}

/// Tunables for one coordinator instance.
///
/// Registries, hooks, and trait-object overrides travel separately (see the
/// coordinator's start options); everything here is plain data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkiffConfig {
    /// Attempts after the first before a transaction is failed permanently.
    pub max_retries: u32,
    /// Randomize retry delays by a factor in `[0.5, 1.5]`.
    pub jitter: bool,
    /// Reserved. The executor currently runs one transaction at a time to
    /// preserve per-row causal order.
    pub max_concurrency: usize,
    pub storage: StorageConfig,
    /// Leader-election group shared by sibling instances. `None` degrades
    /// to single-instance mode where leadership is always granted.
    pub election_group: Option<String>,
}

impl SkiffConfig {
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn with_election_group(mut self, group: impl Into<String>) -> Self {
        self.election_group = Some(group.into());
        self
    }
}

impl Default for SkiffConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            jitter: true,
            max_concurrency: 1,
            storage: StorageConfig::default(),
            election_group: None,
        }
    }
}
