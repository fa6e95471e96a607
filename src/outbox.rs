use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::collection::CollectionRegistry;
use crate::envelope;
use crate::storage::{StorageEngine, StorageError};
use crate::transaction::{ErrorInfo, Transaction};
use crate::types::{EpochMillis, GlobalKey, TransactionId};

/// Storage keys claimed by the outbox. Nothing else is written under this
/// prefix.
pub const KEY_PREFIX: &str = "tx:";

fn storage_key(id: &TransactionId) -> String {
    format!("{KEY_PREFIX}{id}")
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("transaction {0} is not in the outbox")]
    NotFound(TransactionId),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to encode transaction envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Retry bookkeeping applied by [`Outbox::update`]. Absent fields keep the
/// stored value.
#[derive(Debug, Clone, Default)]
pub struct OutboxPatch {
    pub retry_count: Option<u32>,
    pub next_attempt_at: Option<EpochMillis>,
    pub last_error: Option<ErrorInfo>,
}

/// Durable FIFO of transactions awaiting server acknowledgment, keyed
/// `tx:<id>` in the backing store.
///
/// Ordering is established by `created_at` (id as tie-break), never by
/// storage iteration order. Entries that fail to decode are pruned on the
/// next full enumeration so corruption cannot wedge the queue.
pub struct Outbox<S> {
    storage: Arc<S>,
    collections: CollectionRegistry,
}

impl<S: StorageEngine> Outbox<S> {
    pub fn new(storage: Arc<S>, collections: CollectionRegistry) -> Self {
        Self {
            storage,
            collections,
        }
    }

    /// Serializes and writes by key. Overwrite semantics: the same call
    /// services both first insertion and in-place update of an id.
    pub async fn add(&self, tx: &Transaction) -> Result<(), OutboxError> {
        let blob = envelope::serialize(tx)?;
        self.storage.set(&storage_key(&tx.id), blob).await?;
        Ok(())
    }

    /// Read-through by id. Decode failures are logged and surface as
    /// `None`; the broken entry is removed.
    pub async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>, OutboxError> {
        let key = storage_key(id);
        let Some(blob) = self.storage.get(&key).await? else {
            return Ok(None);
        };

        match envelope::deserialize(&blob, &self.collections) {
            Ok(tx) => Ok(Some(tx)),
            Err(err) => {
                warn!(%id, error = %err, "dropping undecodable outbox entry");
                self.storage.delete(&key).await?;
                Ok(None)
            }
        }
    }

    /// Every decodable transaction, ascending by `(created_at, id)`.
    /// Undecodable entries are logged, pruned, and skipped.
    pub async fn get_all(&self) -> Result<Vec<Transaction>, OutboxError> {
        let mut transactions = Vec::new();
        for key in self.transaction_keys().await? {
            let Some(blob) = self.storage.get(&key).await? else {
                continue;
            };
            match envelope::deserialize(&blob, &self.collections) {
                Ok(tx) => transactions.push(tx),
                Err(err) => {
                    warn!(key, error = %err, "dropping undecodable outbox entry");
                    self.storage.delete(&key).await?;
                }
            }
        }
        transactions.sort_by_key(Transaction::sort_key);
        Ok(transactions)
    }

    /// Transactions whose key set intersects `keys`.
    pub async fn get_by_keys(
        &self,
        keys: &BTreeSet<GlobalKey>,
    ) -> Result<Vec<Transaction>, OutboxError> {
        let all = self.get_all().await?;
        Ok(all
            .into_iter()
            .filter(|tx| tx.keys.intersection(keys).next().is_some())
            .collect())
    }

    /// Read-modify-write of the retry fields. Fails with `NotFound` when
    /// the id is absent (or its entry was pruned as undecodable).
    pub async fn update(
        &self,
        id: &TransactionId,
        patch: OutboxPatch,
    ) -> Result<Transaction, OutboxError> {
        let mut tx = self
            .get(id)
            .await?
            .ok_or_else(|| OutboxError::NotFound(id.clone()))?;

        if let Some(retry_count) = patch.retry_count {
            tx.retry_count = retry_count;
        }
        if let Some(next_attempt_at) = patch.next_attempt_at {
            tx.next_attempt_at = next_attempt_at;
        }
        if let Some(last_error) = patch.last_error {
            tx.last_error = Some(last_error);
        }

        self.add(&tx).await?;
        Ok(tx)
    }

    pub async fn remove(&self, id: &TransactionId) -> Result<(), OutboxError> {
        self.storage.delete(&storage_key(id)).await?;
        Ok(())
    }

    pub async fn remove_many(&self, ids: &[TransactionId]) -> Result<(), OutboxError> {
        for id in ids {
            self.remove(id).await?;
        }
        Ok(())
    }

    /// Deletes every `tx:` entry, leaving unrelated keys in the shared
    /// store untouched.
    pub async fn clear(&self) -> Result<(), OutboxError> {
        for key in self.transaction_keys().await? {
            self.storage.delete(&key).await?;
        }
        Ok(())
    }

    pub async fn count(&self) -> Result<usize, OutboxError> {
        Ok(self.transaction_keys().await?.len())
    }

    async fn transaction_keys(&self) -> Result<Vec<String>, OutboxError> {
        let keys = self.storage.keys().await?;
        Ok(keys
            .into_iter()
            .filter(|key| key.starts_with(KEY_PREFIX))
            .collect())
    }
}
