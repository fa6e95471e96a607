use std::collections::BTreeSet;
use std::sync::Arc;

#[path = "common.rs"]
mod common;

use common::{TestStorage, all_backends};
use serde_json::json;
use skiff::collection::{Collection, CollectionRegistry, NamedCollection};
use skiff::outbox::{KEY_PREFIX, Outbox, OutboxError, OutboxPatch};
use skiff::storage::{StorageAdapter, StorageEngine};
use skiff::transaction::{ErrorInfo, Transaction, TransactionDraft};
use skiff::types::EpochMillis;

fn todos() -> Arc<dyn Collection> {
    NamedCollection::new("todos")
}

fn registry() -> CollectionRegistry {
    let mut registry = CollectionRegistry::new();
    registry.register(todos());
    registry
}

fn make_tx(global_key: &str, created_at: EpochMillis) -> Transaction {
    let collection = todos();
    let mut tx = TransactionDraft::new("sync")
        .insert(&collection, global_key, json!({ "key": global_key }))
        .build()
        .expect("non-empty draft");
    tx.created_at = created_at;
    tx.next_attempt_at = created_at;
    tx
}

fn outbox_for(storage: Arc<StorageAdapter>) -> Outbox<StorageAdapter> {
    Outbox::new(storage, registry())
}

#[tokio::test]
async fn add_get_round_trip() {
    for backend in all_backends() {
        let storage = TestStorage::new(backend);
        let outbox = outbox_for(storage.storage());

        let tx = make_tx("todos/1", 100);
        outbox.add(&tx).await.unwrap();

        let loaded = outbox.get(&tx.id).await.unwrap().expect("entry present");
        assert_eq!(loaded, tx);
        assert_eq!(outbox.count().await.unwrap(), 1);
    }
}

#[tokio::test]
async fn get_all_sorts_by_creation_time() {
    for backend in all_backends() {
        let storage = TestStorage::new(backend);
        let outbox = outbox_for(storage.storage());

        outbox.add(&make_tx("todos/c", 300)).await.unwrap();
        outbox.add(&make_tx("todos/a", 100)).await.unwrap();
        outbox.add(&make_tx("todos/b", 200)).await.unwrap();

        let all = outbox.get_all().await.unwrap();
        let created: Vec<_> = all.iter().map(|tx| tx.created_at).collect();
        assert_eq!(created, vec![100, 200, 300]);

        let ids: BTreeSet<_> = all.iter().map(|tx| tx.id.clone()).collect();
        assert_eq!(ids.len(), 3, "no duplicate ids");
    }
}

#[tokio::test]
async fn add_overwrites_by_id() {
    for backend in all_backends() {
        let storage = TestStorage::new(backend);
        let outbox = outbox_for(storage.storage());

        let mut tx = make_tx("todos/1", 100);
        outbox.add(&tx).await.unwrap();
        tx.retry_count = 4;
        outbox.add(&tx).await.unwrap();

        assert_eq!(outbox.count().await.unwrap(), 1);
        let loaded = outbox.get(&tx.id).await.unwrap().unwrap();
        assert_eq!(loaded.retry_count, 4);
    }
}

#[tokio::test]
async fn corrupt_entries_are_pruned_on_enumeration() {
    for backend in all_backends() {
        let storage = TestStorage::new(backend);
        let outbox = outbox_for(storage.storage());

        outbox.add(&make_tx("todos/1", 100)).await.unwrap();
        storage
            .storage()
            .set(&format!("{KEY_PREFIX}bogus"), "{ not json".to_string())
            .await
            .unwrap();
        assert_eq!(outbox.count().await.unwrap(), 2);

        let all = outbox.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(outbox.count().await.unwrap(), 1, "corrupt entry pruned");
    }
}

#[tokio::test]
async fn entries_for_unknown_collections_are_skipped() {
    for backend in all_backends() {
        let storage = TestStorage::new(backend);

        let mut rich_registry = registry();
        rich_registry.register(NamedCollection::new("ghosts"));
        let writer = Outbox::new(storage.storage(), rich_registry);

        let ghosts = NamedCollection::new("ghosts");
        let orphan = TransactionDraft::new("sync")
            .insert(&ghosts, "ghosts/1", json!(1))
            .build()
            .unwrap();
        writer.add(&orphan).await.unwrap();
        writer.add(&make_tx("todos/1", 100)).await.unwrap();

        // a reader whose registry no longer knows the ghosts collection
        let reader = outbox_for(storage.storage());
        let all = reader.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].mutations[0].collection_id, "todos");
    }
}

#[tokio::test]
async fn get_by_keys_filters_on_intersection() {
    for backend in all_backends() {
        let storage = TestStorage::new(backend);
        let outbox = outbox_for(storage.storage());

        let a = make_tx("todos/a", 100);
        let b = make_tx("todos/b", 200);
        outbox.add(&a).await.unwrap();
        outbox.add(&b).await.unwrap();

        let wanted: BTreeSet<String> = ["todos/a".to_string(), "todos/zzz".to_string()].into();
        let hits = outbox.get_by_keys(&wanted).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);

        let disjoint: BTreeSet<String> = ["other/x".to_string()].into();
        assert!(outbox.get_by_keys(&disjoint).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn update_patches_retry_state() {
    for backend in all_backends() {
        let storage = TestStorage::new(backend);
        let outbox = outbox_for(storage.storage());

        let tx = make_tx("todos/1", 100);
        outbox.add(&tx).await.unwrap();

        let updated = outbox
            .update(
                &tx.id,
                OutboxPatch {
                    retry_count: Some(2),
                    next_attempt_at: Some(5_000),
                    last_error: Some(ErrorInfo::new("Transient", "timeout")),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.retry_count, 2);
        assert_eq!(updated.next_attempt_at, 5_000);

        let loaded = outbox.get(&tx.id).await.unwrap().unwrap();
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.last_error.as_ref().unwrap().message, "timeout");
        // untouched fields survive the read-modify-write
        assert_eq!(loaded.created_at, 100);
        assert_eq!(loaded.idempotency_key, tx.idempotency_key);
    }
}

#[tokio::test]
async fn update_of_missing_id_fails() {
    for backend in all_backends() {
        let storage = TestStorage::new(backend);
        let outbox = outbox_for(storage.storage());

        let ghost = make_tx("todos/1", 100);
        let err = outbox
            .update(&ghost.id, OutboxPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxError::NotFound(id) if id == ghost.id));
    }
}

#[tokio::test]
async fn remove_many_and_clear() {
    for backend in all_backends() {
        let storage = TestStorage::new(backend);
        let outbox = outbox_for(storage.storage());

        let a = make_tx("todos/a", 100);
        let b = make_tx("todos/b", 200);
        let c = make_tx("todos/c", 300);
        for tx in [&a, &b, &c] {
            outbox.add(tx).await.unwrap();
        }

        outbox
            .remove_many(&[a.id.clone(), b.id.clone()])
            .await
            .unwrap();
        assert_eq!(outbox.count().await.unwrap(), 1);

        outbox.clear().await.unwrap();
        assert_eq!(outbox.count().await.unwrap(), 0);
    }
}

#[tokio::test]
async fn clear_leaves_foreign_keys_alone() {
    for backend in all_backends() {
        let storage = TestStorage::new(backend);
        let outbox = outbox_for(storage.storage());

        outbox.add(&make_tx("todos/1", 100)).await.unwrap();
        storage
            .storage()
            .set("meta:version", "7".to_string())
            .await
            .unwrap();

        outbox.clear().await.unwrap();
        assert_eq!(outbox.count().await.unwrap(), 0);
        assert_eq!(
            storage.storage().get("meta:version").await.unwrap().as_deref(),
            Some("7")
        );
    }
}
