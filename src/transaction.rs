use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::collection::{Collection, CollectionSet};
use crate::envelope::ENVELOPE_VERSION;
use crate::types::{
    CollectionId, EpochMillis, GlobalKey, IdempotencyKey, TransactionId, now_ms,
};

/// Kind of per-row operation captured by a mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    Insert,
    Update,
    Delete,
}

/// One row-level operation inside a transaction. `modified` and `original`
/// are opaque JSON payloads owned by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mutation {
    pub global_key: GlobalKey,
    #[serde(rename = "type")]
    pub kind: MutationType,
    pub modified: Option<Value>,
    pub original: Option<Value>,
    pub collection_id: CollectionId,
}

/// Snapshot of the last failure recorded against a transaction.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Outcome reported to waiters whose coordinator was torn down before
    /// the transaction settled.
    pub fn disposed() -> Self {
        Self::new("Disposed", "coordinator disposed before completion")
    }
}

/// A user-initiated unit of work queued for remote execution.
///
/// Immutable by convention once built; only the executor touches
/// `retry_count`, `next_attempt_at`, and `last_error` as attempts fail.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    /// Symbolic key selecting a function from the caller's mutation registry.
    pub mutation_fn_name: String,
    pub mutations: Vec<Mutation>,
    /// Global keys touched by `mutations`, for targeted outbox queries.
    pub keys: BTreeSet<GlobalKey>,
    pub idempotency_key: IdempotencyKey,
    pub created_at: EpochMillis,
    pub retry_count: u32,
    pub next_attempt_at: EpochMillis,
    pub last_error: Option<ErrorInfo>,
    pub metadata: Map<String, Value>,
    /// Envelope format revision this record was built or loaded with.
    pub version: u32,
    /// Live references resolved from the collection registry. Not persisted.
    pub collections: CollectionSet,
}

impl Transaction {
    /// Ordering key: FIFO by creation instant, ties broken by id so clock
    /// collisions stay deterministic.
    pub fn sort_key(&self) -> (EpochMillis, TransactionId) {
        (self.created_at, self.id.clone())
    }
}

impl PartialEq for Transaction {
    /// Equality modulo the live collection references.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.mutation_fn_name == other.mutation_fn_name
            && self.mutations == other.mutations
            && self.keys == other.keys
            && self.idempotency_key == other.idempotency_key
            && self.created_at == other.created_at
            && self.retry_count == other.retry_count
            && self.next_attempt_at == other.next_attempt_at
            && self.last_error == other.last_error
            && self.metadata == other.metadata
            && self.version == other.version
    }
}

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("draft contains no mutations")]
    Empty,
}

/// Accumulates mutations and, on build, emits a [`Transaction`] ready for
/// the outbox. Ids and the idempotency key are assigned here, once.
#[derive(Debug, Default)]
pub struct TransactionDraft {
    mutation_fn_name: String,
    mutations: Vec<Mutation>,
    metadata: Map<String, Value>,
    collections: CollectionSet,
}

impl TransactionDraft {
    pub fn new(mutation_fn_name: impl Into<String>) -> Self {
        Self {
            mutation_fn_name: mutation_fn_name.into(),
            ..Self::default()
        }
    }

    pub fn insert(
        mut self,
        collection: &Arc<dyn Collection>,
        global_key: impl Into<GlobalKey>,
        modified: Value,
    ) -> Self {
        self.push(collection, global_key.into(), MutationType::Insert, Some(modified), None);
        self
    }

    pub fn update(
        mut self,
        collection: &Arc<dyn Collection>,
        global_key: impl Into<GlobalKey>,
        original: Value,
        modified: Value,
    ) -> Self {
        self.push(
            collection,
            global_key.into(),
            MutationType::Update,
            Some(modified),
            Some(original),
        );
        self
    }

    pub fn delete(
        mut self,
        collection: &Arc<dyn Collection>,
        global_key: impl Into<GlobalKey>,
        original: Value,
    ) -> Self {
        self.push(collection, global_key.into(), MutationType::Delete, None, Some(original));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    fn push(
        &mut self,
        collection: &Arc<dyn Collection>,
        global_key: GlobalKey,
        kind: MutationType,
        modified: Option<Value>,
        original: Option<Value>,
    ) {
        self.collections.attach(collection.clone());
        self.mutations.push(Mutation {
            global_key,
            kind,
            modified,
            original,
            collection_id: collection.id().to_string(),
        });
    }

    pub fn build(self) -> Result<Transaction, DraftError> {
        if self.mutations.is_empty() {
            return Err(DraftError::Empty);
        }

        let keys = self
            .mutations
            .iter()
            .map(|m| m.global_key.clone())
            .collect::<BTreeSet<_>>();
        let created_at = now_ms();

        Ok(Transaction {
            id: TransactionId::new(),
            mutation_fn_name: self.mutation_fn_name,
            mutations: self.mutations,
            keys,
            idempotency_key: IdempotencyKey::new(),
            created_at,
            retry_count: 0,
            next_attempt_at: created_at,
            last_error: None,
            metadata: self.metadata,
            version: ENVELOPE_VERSION,
            collections: self.collections,
        })
    }
}
