use tokio::sync::RwLock;

use crate::transaction::Transaction;
use crate::types::{EpochMillis, TransactionId, now_ms};

#[derive(Debug, Default)]
struct SchedulerState {
    /// Invariant-sorted ascending by `(created_at, id)`.
    pending: Vec<Transaction>,
    running: bool,
}

impl SchedulerState {
    fn resort(&mut self) {
        self.pending.sort_by_key(Transaction::sort_key);
    }

    fn replace(&mut self, tx: Transaction) {
        if let Some(slot) = self.pending.iter_mut().find(|p| p.id == tx.id) {
            *slot = tx;
        }
    }
}

/// In-memory FIFO of transactions awaiting execution.
///
/// Execution is sequential: `running` is a single flag, not a count, and
/// `next_ready` hands out at most one transaction regardless of the
/// requested concurrency.
#[derive(Debug, Default)]
pub struct Scheduler {
    state: RwLock<SchedulerState>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a transaction, replacing any queued entry with the same id.
    pub async fn schedule(&self, tx: Transaction) {
        let mut state = self.state.write().await;
        if state.pending.iter().any(|p| p.id == tx.id) {
            state.replace(tx);
        } else {
            state.pending.push(tx);
        }
        state.resort();
    }

    /// The next transaction eligible to run by wall clock, or `None` while
    /// one is already running or nothing is due yet.
    pub async fn next_ready(&self, _max_concurrency: usize) -> Option<Transaction> {
        let state = self.state.read().await;
        if state.running || state.pending.is_empty() {
            return None;
        }
        let now = now_ms();
        state
            .pending
            .iter()
            .find(|tx| tx.next_attempt_at <= now)
            .cloned()
    }

    pub async fn mark_started(&self) {
        let mut state = self.state.write().await;
        state.running = true;
    }

    /// Drops the transaction from the queue and frees the running slot.
    pub async fn mark_completed(&self, id: &TransactionId) {
        let mut state = self.state.write().await;
        state.pending.retain(|tx| &tx.id != id);
        state.running = false;
    }

    /// Frees the running slot; the transaction stays queued with whatever
    /// retry fields the executor wrote.
    pub async fn mark_failed(&self) {
        let mut state = self.state.write().await;
        state.running = false;
    }

    pub async fn update(&self, tx: Transaction) {
        let mut state = self.state.write().await;
        state.replace(tx);
        state.resort();
    }

    pub async fn update_many(&self, txs: Vec<Transaction>) {
        let mut state = self.state.write().await;
        for tx in txs {
            state.replace(tx);
        }
        state.resort();
    }

    /// Snapshot copy of the pending queue.
    pub async fn pending(&self) -> Vec<Transaction> {
        let state = self.state.read().await;
        state.pending.clone()
    }

    pub async fn pending_count(&self) -> usize {
        let state = self.state.read().await;
        state.pending.len()
    }

    pub async fn running_count(&self) -> usize {
        let state = self.state.read().await;
        usize::from(state.running)
    }

    /// Earliest `next_attempt_at` across the queue, for arming the retry
    /// wake timer.
    pub async fn next_attempt_horizon(&self) -> Option<EpochMillis> {
        let state = self.state.read().await;
        state.pending.iter().map(|tx| tx.next_attempt_at).min()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.pending.clear();
        state.running = false;
    }
}
