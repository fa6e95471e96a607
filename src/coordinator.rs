use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::collection::{Collection, CollectionRegistry};
use crate::config::SkiffConfig;
use crate::election::{GroupElection, LeaderElection, NullElection};
use crate::executor::{BeforeRetry, Executor, ExecutorHooks, UnknownMutationHook};
use crate::mutation_fn::MutationRegistry;
use crate::online::{ManualOnlineDetector, OnlineDetector};
use crate::outbox::{Outbox, OutboxError};
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::storage::{StorageEngine, StorageError};
use crate::transaction::{DraftError, Transaction, TransactionDraft};
use crate::types::{GlobalKey, TransactionId};
use crate::waiters::{CommitListener, WaiterRegistry, WaiterSink};

/// Fired whenever this instance gains or loses leadership.
pub type LeadershipHook = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Optional collaborators and hooks for [`SkiffCoordinator::start`].
/// Unset overrides fall back to what [`SkiffConfig`] describes.
#[derive(Default)]
pub struct CoordinatorOptions {
    pub election: Option<Arc<dyn LeaderElection>>,
    pub detector: Option<Arc<dyn OnlineDetector>>,
    pub before_retry: Option<BeforeRetry>,
    pub on_unknown_mutation_fn: Option<UnknownMutationHook>,
    pub on_leadership_change: Option<LeadershipHook>,
}

/// Owns the outbox lifecycle for one instance: elects leadership, replays
/// the outbox on acquisition, reacts to connectivity, registers caller
/// waiters, and tears everything down on dispose.
///
/// A non-leader instance persists nothing: committed drafts resolve their
/// waiter with `None` immediately and the authoritative instance handles
/// delivery. Shared durable storage is the only channel between instances.
pub struct SkiffCoordinator<S: StorageEngine> {
    outbox: Arc<Outbox<S>>,
    executor: Arc<Executor<S>>,
    election: Arc<dyn LeaderElection>,
    detector: Arc<dyn OnlineDetector>,
    waiters: Arc<WaiterRegistry>,
    is_leader: AtomicBool,
    on_leadership_change: Option<LeadershipHook>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl<S: StorageEngine + 'static> SkiffCoordinator<S> {
    /// Wires the components, spawns the leadership and connectivity
    /// listeners, and attempts initial leadership. Acquiring it replays
    /// the outbox before this returns.
    pub async fn start(
        config: SkiffConfig,
        storage: Arc<S>,
        collections: CollectionRegistry,
        mutation_fns: MutationRegistry,
        options: CoordinatorOptions,
    ) -> Arc<Self> {
        let outbox = Arc::new(Outbox::new(storage, collections));
        let scheduler = Arc::new(Scheduler::new());
        let waiters = Arc::new(WaiterRegistry::new());
        let executor = Executor::new(
            outbox.clone(),
            scheduler,
            mutation_fns,
            RetryPolicy::new(config.max_retries, config.jitter),
            waiters.clone() as Arc<dyn WaiterSink>,
            ExecutorHooks {
                before_retry: options.before_retry,
                on_unknown_mutation_fn: options.on_unknown_mutation_fn,
            },
            config.max_concurrency,
        );

        let election: Arc<dyn LeaderElection> = match options.election {
            Some(election) => election,
            None => match &config.election_group {
                Some(group) => GroupElection::join(group.clone()).await,
                None => Arc::new(NullElection::new()),
            },
        };
        let detector = options
            .detector
            .unwrap_or_else(|| Arc::new(ManualOnlineDetector::new()));

        let coordinator = Arc::new(Self {
            outbox,
            executor,
            election,
            detector,
            waiters,
            is_leader: AtomicBool::new(false),
            on_leadership_change: options.on_leadership_change,
            tasks: StdMutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        });

        if coordinator.election.request_leadership().await {
            coordinator.apply_leadership(true).await;
        }

        // listeners subscribe after the initial attempt so the replay above
        // is not raced by a second delivery of the same leadership value
        Self::spawn_leadership_listener(&coordinator);
        Self::spawn_online_listener(&coordinator);

        coordinator
    }

    /// Opens a draft that will dispatch to `mutation_fn_name` on commit.
    pub fn draft(self: Arc<Self>, mutation_fn_name: impl Into<String>) -> Draft<S> {
        Draft {
            coordinator: self,
            inner: TransactionDraft::new(mutation_fn_name),
        }
    }

    pub(crate) async fn persist(&self, tx: Transaction) -> Result<(), CoordinatorError> {
        if !self.is_leader.load(Ordering::SeqCst) {
            // the leader instance owns delivery; unblock the local caller
            self.waiters.resolve(&tx.id, None);
            return Ok(());
        }
        self.outbox.add(&tx).await?;
        self.executor.execute(tx).await;
        Ok(())
    }

    pub async fn remove_from_outbox(&self, id: &TransactionId) -> Result<(), CoordinatorError> {
        self.outbox.remove(id).await?;
        Ok(())
    }

    pub async fn peek_outbox(&self) -> Result<Vec<Transaction>, CoordinatorError> {
        Ok(self.outbox.get_all().await?)
    }

    pub async fn peek_outbox_by_keys(
        &self,
        keys: &BTreeSet<GlobalKey>,
    ) -> Result<Vec<Transaction>, CoordinatorError> {
        Ok(self.outbox.get_by_keys(keys).await?)
    }

    /// Removes all persisted transactions and empties the scheduler and
    /// retry timer. In-flight mutation calls are not aborted.
    pub async fn clear_outbox(&self) -> Result<(), CoordinatorError> {
        self.outbox.clear().await?;
        self.executor.clear().await;
        Ok(())
    }

    /// Forwards a connectivity-restored signal to the detector.
    pub fn notify_online(&self) {
        self.detector.notify_online();
    }

    pub async fn pending_count(&self) -> usize {
        self.executor.pending_count().await
    }

    pub async fn running_count(&self) -> usize {
        self.executor.running_count().await
    }

    /// Whether this instance currently owns the queue.
    pub fn is_offline_enabled(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Stops listening, releases leadership, and tears down the waiter
    /// map. Outstanding listeners observe a `Disposed` rejection; an
    /// in-flight mutation call runs to completion unobserved.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for handle in handles {
            handle.abort();
        }
        self.executor.stop();
        self.election.release_leadership().await;
        self.is_leader.store(false, Ordering::SeqCst);
        self.detector.dispose();
        self.waiters.clear();
        info!("coordinator disposed");
    }

    async fn apply_leadership(&self, leading: bool) {
        if self.is_leader.swap(leading, Ordering::SeqCst) == leading {
            return;
        }
        info!(leading, "leadership changed");
        if let Some(hook) = &self.on_leadership_change {
            hook(leading);
        }
        if leading {
            self.load_and_replay().await;
        }
    }

    async fn load_and_replay(&self) {
        if let Err(err) = self.executor.load_pending().await {
            warn!(error = %err, "failed to load pending transactions");
            return;
        }
        self.executor.execute_all().await;
    }

    fn spawn_leadership_listener(coordinator: &Arc<Self>) {
        let mut rx = coordinator.election.subscribe();
        let weak = Arc::downgrade(coordinator);
        let handle = tokio::spawn(async move {
            // a handover may have landed between the initial request and
            // this subscription; apply the current value (deduped) first
            loop {
                let leading = *rx.borrow_and_update();
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                coordinator.apply_leadership(leading).await;
                drop(coordinator);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        coordinator
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    fn spawn_online_listener(coordinator: &Arc<Self>) {
        let mut rx = coordinator.detector.subscribe();
        let weak = Arc::downgrade(coordinator);
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                if coordinator.is_leader.load(Ordering::SeqCst) {
                    coordinator.executor.reset_retry_delays().await;
                    coordinator.executor.execute_all().await;
                }
            }
        });
        coordinator
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}

/// Caller-side builder bound to one coordinator. Accumulates mutations
/// and, on commit, registers a waiter and hands the transaction to the
/// outbox.
pub struct Draft<S: StorageEngine> {
    coordinator: Arc<SkiffCoordinator<S>>,
    inner: TransactionDraft,
}

impl<S: StorageEngine + 'static> Draft<S> {
    pub fn insert(
        mut self,
        collection: &Arc<dyn Collection>,
        global_key: impl Into<GlobalKey>,
        modified: Value,
    ) -> Self {
        self.inner = self.inner.insert(collection, global_key, modified);
        self
    }

    pub fn update(
        mut self,
        collection: &Arc<dyn Collection>,
        global_key: impl Into<GlobalKey>,
        original: Value,
        modified: Value,
    ) -> Self {
        self.inner = self.inner.update(collection, global_key, original, modified);
        self
    }

    pub fn delete(
        mut self,
        collection: &Arc<dyn Collection>,
        global_key: impl Into<GlobalKey>,
        original: Value,
    ) -> Self {
        self.inner = self.inner.delete(collection, global_key, original);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inner = self.inner.metadata(key, value);
        self
    }

    /// Builds the transaction, registers its waiter, and persists it.
    /// The listener settles when the mutation function succeeds or the
    /// transaction fails permanently.
    pub async fn commit(self) -> Result<CommitListener, CoordinatorError> {
        let tx = self.inner.build()?;
        let listener = self.coordinator.waiters.wait_for(&tx.id);
        self.coordinator.persist(tx).await?;
        Ok(listener)
    }
}
