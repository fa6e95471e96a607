use std::path::PathBuf;
use std::sync::Arc;

use skiff::StorageConfig;
use skiff::storage::StorageAdapter;
use tempfile::TempDir;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Disk,
}

pub fn all_backends() -> [BackendKind; 2] {
    [BackendKind::Memory, BackendKind::Disk]
}

/// Holds storage state and keeps tempdirs alive for disk-backed runs.
#[allow(dead_code)]
pub struct TestStorage {
    backend: BackendKind,
    storage_path: Option<PathBuf>,
    shared: Arc<StorageAdapter>,
    _guard: Option<TempDir>,
}

#[allow(dead_code)]
impl TestStorage {
    pub fn new(backend: BackendKind) -> Self {
        match backend {
            BackendKind::Memory => Self {
                backend,
                storage_path: None,
                shared: Arc::new(StorageAdapter::memory()),
                _guard: None,
            },
            BackendKind::Disk => {
                let dir = TempDir::new().expect("create temp dir for disk storage");
                let storage_path = dir.path().join("outbox");
                let shared = Arc::new(
                    StorageAdapter::disk(&storage_path).expect("open disk storage"),
                );
                Self {
                    backend,
                    storage_path: Some(storage_path),
                    shared,
                    _guard: Some(dir),
                }
            }
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// The adapter instance shared by everything in this test. Memory
    /// backends must hand out the same instance or state would not be
    /// visible across components.
    pub fn storage(&self) -> Arc<StorageAdapter> {
        self.shared.clone()
    }

    pub fn storage_config(&self) -> StorageConfig {
        match self.backend {
            BackendKind::Memory => StorageConfig::memory(),
            BackendKind::Disk => {
                StorageConfig::disk(self.storage_path.as_ref().expect("storage path"))
            }
        }
    }

    /// Reopen storage from the same path, simulating a process restart.
    /// Only meaningful for disk backends.
    pub fn reopen(&self) -> Arc<StorageAdapter> {
        match self.backend {
            BackendKind::Memory => self.shared.clone(),
            BackendKind::Disk => Arc::new(
                StorageAdapter::disk(self.storage_path.as_ref().expect("storage path"))
                    .expect("reopen disk storage"),
            ),
        }
    }
}
