use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::collection::{CollectionRegistry, CollectionSet};
use crate::transaction::{ErrorInfo, Mutation, Transaction};
use crate::types::{CollectionId, EpochMillis, GlobalKey, IdempotencyKey, TransactionId};

/// Envelope format revision written by this build. Entries carrying any
/// other version are discarded on load.
pub const ENVELOPE_VERSION: u32 = 1;

/// Recoverable decode failures. Callers log and skip the offending entry.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("stored envelope is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),
    #[error("stored transaction references unknown collection {0}")]
    UnknownCollection(CollectionId),
}

/// Storable rendition of a [`Transaction`]: same shape, minus the live
/// collection references.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    id: TransactionId,
    mutation_fn_name: String,
    mutations: Vec<Mutation>,
    keys: BTreeSet<GlobalKey>,
    idempotency_key: IdempotencyKey,
    created_at: EpochMillis,
    retry_count: u32,
    next_attempt_at: EpochMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<ErrorInfo>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Encodes a transaction as the UTF-8 JSON envelope stored in the outbox.
pub fn serialize(tx: &Transaction) -> Result<String, serde_json::Error> {
    let envelope = Envelope {
        version: tx.version,
        id: tx.id.clone(),
        mutation_fn_name: tx.mutation_fn_name.clone(),
        mutations: tx.mutations.clone(),
        keys: tx.keys.clone(),
        idempotency_key: tx.idempotency_key.clone(),
        created_at: tx.created_at,
        retry_count: tx.retry_count,
        next_attempt_at: tx.next_attempt_at,
        last_error: tx.last_error.clone(),
        metadata: tx.metadata.clone(),
    };
    serde_json::to_string(&envelope)
}

/// Decodes a stored envelope and re-attaches live collection references
/// from `registry`. A version mismatch or an unresolvable collection id is
/// recoverable: the caller drops the entry.
pub fn deserialize(
    blob: &str,
    registry: &CollectionRegistry,
) -> Result<Transaction, EnvelopeError> {
    let probe: VersionProbe = serde_json::from_str(blob)?;
    if probe.version != ENVELOPE_VERSION {
        return Err(EnvelopeError::UnsupportedVersion(probe.version));
    }

    let envelope: Envelope = serde_json::from_str(blob)?;

    let mut collections = CollectionSet::new();
    for mutation in &envelope.mutations {
        match registry.get(&mutation.collection_id) {
            Some(collection) => collections.attach(collection),
            None => {
                return Err(EnvelopeError::UnknownCollection(
                    mutation.collection_id.clone(),
                ));
            }
        }
    }

    Ok(Transaction {
        id: envelope.id,
        mutation_fn_name: envelope.mutation_fn_name,
        mutations: envelope.mutations,
        keys: envelope.keys,
        idempotency_key: envelope.idempotency_key,
        created_at: envelope.created_at,
        retry_count: envelope.retry_count,
        next_attempt_at: envelope.next_attempt_at,
        last_error: envelope.last_error,
        metadata: envelope.metadata,
        version: envelope.version,
        collections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::NamedCollection;
    use crate::transaction::TransactionDraft;
    use serde_json::json;

    fn registry() -> CollectionRegistry {
        let mut registry = CollectionRegistry::new();
        registry.register(NamedCollection::new("todos"));
        registry
    }

    fn sample() -> Transaction {
        let todos = NamedCollection::new("todos");
        TransactionDraft::new("sync")
            .insert(&todos, "todos/1", json!({"title": "milk"}))
            .metadata("origin", json!("ui"))
            .build()
            .unwrap()
    }

    #[test]
    fn round_trip_preserves_transaction() {
        let tx = sample();
        let blob = serialize(&tx).unwrap();
        let restored = deserialize(&blob, &registry()).unwrap();
        assert_eq!(tx, restored);
        assert!(restored.collections.get("todos").is_some());
    }

    #[test]
    fn round_trip_keeps_retry_state() {
        let mut tx = sample();
        tx.retry_count = 3;
        tx.next_attempt_at = tx.created_at + 4_000;
        tx.last_error = Some(ErrorInfo::new("Transient", "connection reset"));

        let restored = deserialize(&serialize(&tx).unwrap(), &registry()).unwrap();
        assert_eq!(restored.retry_count, 3);
        assert_eq!(restored.next_attempt_at, tx.next_attempt_at);
        assert_eq!(restored.last_error, tx.last_error);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let tx = sample();
        let blob = serialize(&tx).unwrap().replace("\"version\":1", "\"version\":7");
        let err = deserialize(&blob, &registry()).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnsupportedVersion(7)));
    }

    #[test]
    fn unknown_collection_is_recoverable() {
        let tx = sample();
        let blob = serialize(&tx).unwrap();
        let err = deserialize(&blob, &CollectionRegistry::new()).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownCollection(id) if id == "todos"));
    }

    #[test]
    fn garbage_fails_to_parse() {
        let err = deserialize("not json at all", &registry()).unwrap_err();
        assert!(matches!(err, EnvelopeError::Parse(_)));
    }
}
