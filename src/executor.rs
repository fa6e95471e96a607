use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mutation_fn::{MutationError, MutationRegistry, MutationRequest};
use crate::outbox::{Outbox, OutboxError, OutboxPatch};
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::storage::StorageEngine;
use crate::transaction::{ErrorInfo, Transaction};
use crate::types::{TransactionId, now_ms};
use crate::waiters::WaiterSink;

/// Replay filter applied when a leader loads the outbox: receives the
/// stored transactions and returns the subset worth retrying. Whatever it
/// drops is deleted from storage.
pub type BeforeRetry = Arc<dyn Fn(Vec<Transaction>) -> Vec<Transaction> + Send + Sync>;

/// Fired once per attempt that names a mutation function missing from the
/// registry, before the transaction is failed permanently.
pub type UnknownMutationHook = Arc<dyn Fn(&str, &Transaction) + Send + Sync>;

/// Optional caller hooks observed by the drain loop.
#[derive(Clone, Default)]
pub struct ExecutorHooks {
    pub before_retry: Option<BeforeRetry>,
    pub on_unknown_mutation_fn: Option<UnknownMutationHook>,
}

/// Drives the scheduler: picks the next ready transaction, invokes its
/// mutation function, and settles the outcome against the outbox and the
/// caller's waiter.
///
/// Concurrent drain requests collapse onto the drain already in flight.
/// A single resettable wake timer re-enters the drain when the earliest
/// backed-off transaction comes due.
pub struct Executor<S> {
    outbox: Arc<Outbox<S>>,
    scheduler: Arc<Scheduler>,
    mutation_fns: MutationRegistry,
    retry: RetryPolicy,
    waiters: Arc<dyn WaiterSink>,
    hooks: ExecutorHooks,
    max_concurrency: usize,
    drain_gate: Mutex<()>,
    drain_requested: AtomicBool,
    stopped: AtomicBool,
    wake_timer: StdMutex<Option<JoinHandle<()>>>,
    weak: Weak<Self>,
}

impl<S: StorageEngine + 'static> Executor<S> {
    pub fn new(
        outbox: Arc<Outbox<S>>,
        scheduler: Arc<Scheduler>,
        mutation_fns: MutationRegistry,
        retry: RetryPolicy,
        waiters: Arc<dyn WaiterSink>,
        hooks: ExecutorHooks,
        max_concurrency: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            outbox,
            scheduler,
            mutation_fns,
            retry,
            waiters,
            hooks,
            max_concurrency,
            drain_gate: Mutex::new(()),
            drain_requested: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            wake_timer: StdMutex::new(None),
            weak: weak.clone(),
        })
    }

    /// Admits one transaction and triggers a drain without waiting for it.
    pub async fn execute(&self, tx: Transaction) {
        self.scheduler.schedule(tx).await;
        self.kick();
    }

    /// Fires a drain on a background task. Used by the live submit path so
    /// callers observe completion through their waiter, not the submit call.
    pub fn kick(&self) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            if let Some(executor) = weak.upgrade() {
                executor.execute_all().await;
            }
        });
    }

    /// Drain loop. Concurrent calls collapse onto the drain in flight:
    /// the gate queues every caller, and the holder keeps draining while
    /// requests are outstanding, re-arming the wake timer after each
    /// cycle. A caller that arrives mid-drain resumes only once that
    /// drain has settled; its own request has usually been consumed by
    /// the holder, so its pass through the loop is a no-op.
    pub async fn execute_all(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.drain_requested.store(true, Ordering::SeqCst);
        let _guard = self.drain_gate.lock().await;
        while self.drain_requested.swap(false, Ordering::SeqCst) {
            self.drain().await;
            self.schedule_next_retry().await;
        }
    }

    async fn drain(&self) {
        loop {
            if self.scheduler.pending_count().await == 0 {
                break;
            }
            let Some(tx) = self.scheduler.next_ready(self.max_concurrency).await else {
                break;
            };

            self.scheduler.mark_started().await;
            match self.attempt(&tx).await {
                Ok(value) => {
                    self.scheduler.mark_completed(&tx.id).await;
                    let removed = self.outbox.remove(&tx.id).await;
                    self.waiters.resolve(&tx.id, value);
                    if let Err(err) = removed {
                        warn!(id = %tx.id, error = %err, "failed to remove completed transaction; ending drain");
                        break;
                    }
                    debug!(id = %tx.id, "transaction completed");
                }
                Err(err) if !self.retry.should_retry(&err, tx.retry_count) => {
                    self.scheduler.mark_completed(&tx.id).await;
                    let removed = self.outbox.remove(&tx.id).await;
                    warn!(
                        id = %tx.id,
                        retries = tx.retry_count,
                        error = %err,
                        "transaction failed permanently"
                    );
                    self.waiters.reject(&tx.id, ErrorInfo::from(&err));
                    if let Err(err) = removed {
                        warn!(id = %tx.id, error = %err, "failed to remove dead transaction; ending drain");
                        break;
                    }
                }
                Err(err) => {
                    let delay = self.retry.delay_for(tx.retry_count);
                    let mut updated = tx.clone();
                    updated.retry_count = tx.retry_count + 1;
                    updated.next_attempt_at = now_ms() + delay.as_millis() as u64;
                    updated.last_error = Some(ErrorInfo::from(&err));

                    self.scheduler.mark_failed().await;
                    self.scheduler.update(updated.clone()).await;

                    let patch = OutboxPatch {
                        retry_count: Some(updated.retry_count),
                        next_attempt_at: Some(updated.next_attempt_at),
                        last_error: updated.last_error.clone(),
                    };
                    if let Err(storage_err) = self.outbox.update(&tx.id, patch).await {
                        warn!(id = %tx.id, error = %storage_err, "failed to persist retry state; ending drain");
                        break;
                    }
                    debug!(
                        id = %tx.id,
                        retry = updated.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transaction scheduled for retry"
                    );
                }
            }
        }
    }

    async fn attempt(&self, tx: &Transaction) -> Result<Option<Value>, MutationError> {
        let Some(mutation_fn) = self.mutation_fns.get(&tx.mutation_fn_name) else {
            if let Some(hook) = &self.hooks.on_unknown_mutation_fn {
                hook(&tx.mutation_fn_name, tx);
            }
            return Err(MutationError::non_retriable(format!(
                "unknown mutation function `{}`",
                tx.mutation_fn_name
            )));
        };
        mutation_fn.invoke(MutationRequest::for_transaction(tx)).await
    }

    /// Replays the outbox into the scheduler after leadership is acquired.
    ///
    /// The `before_retry` filter picks which stored transactions survive;
    /// the complement is deleted. Survivors have `next_attempt_at` pulled
    /// to now so backoff computed before the restart cannot delay them.
    pub async fn load_pending(&self) -> Result<(), OutboxError> {
        let all = self.outbox.get_all().await?;
        let total = all.len();

        let kept = match &self.hooks.before_retry {
            Some(filter) => filter(all.clone()),
            None => all.clone(),
        };
        let kept_ids: HashSet<&TransactionId> = kept.iter().map(|tx| &tx.id).collect();
        let dropped: Vec<TransactionId> = all
            .iter()
            .filter(|tx| !kept_ids.contains(&tx.id))
            .map(|tx| tx.id.clone())
            .collect();
        if !dropped.is_empty() {
            self.outbox.remove_many(&dropped).await?;
        }

        let now = now_ms();
        let replayed = kept.len();
        for mut tx in kept {
            tx.next_attempt_at = now;
            self.scheduler.schedule(tx).await;
        }

        info!(total, replayed, dropped = dropped.len(), "loaded pending transactions");
        self.schedule_next_retry().await;
        Ok(())
    }

    /// Pulls every pending `next_attempt_at` to now, typically on a
    /// connectivity-restored signal.
    pub async fn reset_retry_delays(&self) {
        let now = now_ms();
        let mut pending = self.scheduler.pending().await;
        for tx in &mut pending {
            tx.next_attempt_at = now;
        }
        self.scheduler.update_many(pending).await;
    }

    /// Empties the scheduler and cancels the wake timer.
    pub async fn clear(&self) {
        self.scheduler.clear().await;
        self.cancel_wake_timer();
    }

    pub async fn pending_count(&self) -> usize {
        self.scheduler.pending_count().await
    }

    pub async fn running_count(&self) -> usize {
        self.scheduler.running_count().await
    }

    /// Permanently stops this executor: no further drains start and no
    /// wake timer is re-armed. An attempt already in flight runs to
    /// completion.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cancel_wake_timer();
    }

    pub fn cancel_wake_timer(&self) {
        let handle = {
            let mut timer = self.wake_timer.lock().unwrap_or_else(|e| e.into_inner());
            timer.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Arms a one-shot wake for the earliest pending attempt. Any earlier
    /// timer is cancelled first, so at most one is outstanding.
    ///
    /// Boxed to break the type-level recursion between this method and
    /// `execute_all` (which awaits it, while the task it spawns calls back
    /// into `execute_all`) — without erasure the compiler cannot prove the
    /// resulting future is `Send`.
    fn schedule_next_retry<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.cancel_wake_timer();
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let Some(horizon) = self.scheduler.next_attempt_horizon().await else {
                return;
            };
            let delay = Duration::from_millis(horizon.saturating_sub(now_ms()));

            let weak = self.weak.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(executor) = weak.upgrade() {
                    executor.execute_all().await;
                }
            });

            let mut timer = self.wake_timer.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(old) = timer.replace(handle) {
                old.abort();
            }
        })
    }
}

impl<S> Drop for Executor<S> {
    fn drop(&mut self) {
        let mut timer = self.wake_timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }
}
