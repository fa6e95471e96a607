use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use clap::Parser;
use serde_json::json;
use skiff::{
    CollectionRegistry, CoordinatorOptions, MutationError, MutationRegistry, NamedCollection,
    SkiffConfig, SkiffCoordinator, StorageConfig, mutation_fn,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Minimal host that queues one transaction and drives it to completion,
/// optionally through a few simulated transient failures.
#[derive(Parser, Debug)]
#[command(name = "skiff", about = "Skiff offline outbox demo")]
struct Args {
    /// Directory for durable outbox storage. Omit to stay in memory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Number of attempts that fail before the mutation succeeds.
    #[arg(long, default_value_t = 0)]
    fail_first: u32,

    /// Row key to write.
    #[arg(long, default_value = "todos/1")]
    key: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing();
    let args = Args::parse();

    let mut config = SkiffConfig::default().without_jitter();
    if let Some(dir) = &args.data_dir {
        config = config.with_storage(StorageConfig::disk(dir));
    }
    let storage = Arc::new(config.storage.build()?);

    let todos = NamedCollection::new("todos");
    let mut collections = CollectionRegistry::new();
    collections.register(todos.clone());

    let remaining_failures = Arc::new(AtomicU32::new(args.fail_first));
    let mut mutation_fns = MutationRegistry::new();
    mutation_fns.register(
        "sync_rows",
        mutation_fn(move |request| {
            let remaining_failures = remaining_failures.clone();
            async move {
                if remaining_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Err(MutationError::transient("simulated network failure"));
                }
                info!(
                    mutations = request.transaction.mutations.len(),
                    idempotency_key = %request.idempotency_key,
                    "server accepted transaction"
                );
                Ok(Some(json!({ "accepted": request.transaction.mutations.len() })))
            }
        }),
    );

    let coordinator = SkiffCoordinator::start(
        config,
        storage,
        collections,
        mutation_fns,
        CoordinatorOptions::default(),
    )
    .await;

    info!(
        leader = coordinator.is_offline_enabled(),
        pending = coordinator.pending_count().await,
        "coordinator started"
    );

    let listener = coordinator
        .clone()
        .draft("sync_rows")
        .insert(&todos, args.key.clone(), json!({ "title": "buy milk", "done": false }))
        .metadata("origin", json!("demo"))
        .commit()
        .await?;

    match listener.wait().await {
        Ok(value) => println!("transaction delivered: {value:?}"),
        Err(err) => println!("transaction failed: {err}"),
    }

    coordinator.dispose().await;
    Ok(())
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
