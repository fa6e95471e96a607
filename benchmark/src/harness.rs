use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use skiff::collection::{Collection, CollectionRegistry, NamedCollection};
use skiff::storage::StorageAdapter;
use skiff::{
    CoordinatorOptions, MutationError, MutationRegistry, SkiffConfig, SkiffCoordinator,
    mutation_fn,
};
use tempfile::TempDir;
use tokio::sync::Mutex;

/// One coordinator wired to a synthetic transport whose failures are drawn
/// from a seeded RNG, so runs are reproducible.
pub struct BenchHarness {
    pub coordinator: Arc<SkiffCoordinator<StorageAdapter>>,
    pub rows: Arc<dyn Collection>,
    pub attempts: Arc<AtomicU64>,
    pub failures: Arc<AtomicU64>,
    _guard: Option<TempDir>,
}

impl BenchHarness {
    pub async fn start(
        storage_root: Option<&Path>,
        failure_rate: f64,
        seed: u64,
    ) -> Result<Self> {
        let (storage, guard) = match storage_root {
            None => (StorageAdapter::memory(), None),
            Some(root) => {
                let dir = TempDir::new_in(root).context("create benchmark storage dir")?;
                let storage =
                    StorageAdapter::disk(dir.path().join("outbox")).context("open disk storage")?;
                (storage, Some(dir))
            }
        };

        let rows = NamedCollection::new("rows");
        let mut collections = CollectionRegistry::new();
        collections.register(rows.clone());

        let attempts = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));

        let (attempt_counter, failure_counter) = (attempts.clone(), failures.clone());
        let mut mutation_fns = MutationRegistry::new();
        mutation_fns.register(
            "bench_sync",
            mutation_fn(move |request| {
                let rng = rng.clone();
                let attempts = attempt_counter.clone();
                let failures = failure_counter.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let roll: f64 = rng.lock().await.gen_range(0.0..1.0);
                    if roll < failure_rate {
                        failures.fetch_add(1, Ordering::SeqCst);
                        return Err(MutationError::transient("synthetic transport failure"));
                    }
                    Ok(Some(json!({
                        "accepted": request.transaction.mutations.len(),
                    })))
                }
            }),
        );

        let coordinator = SkiffCoordinator::start(
            SkiffConfig::default().without_jitter(),
            Arc::new(storage),
            collections,
            mutation_fns,
            CoordinatorOptions::default(),
        )
        .await;

        Ok(Self {
            coordinator,
            rows,
            attempts,
            failures,
            _guard: guard,
        })
    }

    pub async fn shutdown(&self) {
        self.coordinator.dispose().await;
    }
}
