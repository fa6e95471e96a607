use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::watch;

use crate::transaction::ErrorInfo;
use crate::types::TransactionId;

/// Terminal result delivered to the caller that committed a draft: the
/// mutation function's return value on success (or `None` when a non-leader
/// instance handed the transaction off), the last error otherwise.
pub type CommitOutcome = Result<Option<Value>, ErrorInfo>;

/// Narrow capability the executor uses to settle caller promises without
/// holding a reference to the whole coordinator.
pub trait WaiterSink: Send + Sync {
    fn resolve(&self, id: &TransactionId, value: Option<Value>);
    fn reject(&self, id: &TransactionId, error: ErrorInfo);
}

/// At-most-one deferred outcome per transaction id.
///
/// Each slot is a watch channel so `wait_for` stays idempotent: repeated
/// calls for the same id observe the same eventual outcome. Settling an
/// absent id is a no-op, which also makes `resolve` after `resolve`
/// harmless.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    slots: Mutex<HashMap<TransactionId, watch::Sender<Option<CommitOutcome>>>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener for `id`, registering a slot on first use.
    pub fn wait_for(&self, id: &TransactionId) -> CommitListener {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = slots.get(id) {
            return CommitListener {
                rx: sender.subscribe(),
            };
        }
        let (tx, rx) = watch::channel(None);
        slots.insert(id.clone(), tx);
        CommitListener { rx }
    }

    fn settle(&self, id: &TransactionId, outcome: CommitOutcome) {
        let sender = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.remove(id)
        };
        if let Some(sender) = sender {
            sender.send_replace(Some(outcome));
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every unsettled slot. Outstanding listeners observe a
    /// `Disposed` rejection.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.clear();
    }
}

impl WaiterSink for WaiterRegistry {
    fn resolve(&self, id: &TransactionId, value: Option<Value>) {
        self.settle(id, Ok(value));
    }

    fn reject(&self, id: &TransactionId, error: ErrorInfo) {
        self.settle(id, Err(error));
    }
}

/// Caller handle awaiting one transaction's terminal outcome.
#[derive(Debug)]
pub struct CommitListener {
    rx: watch::Receiver<Option<CommitOutcome>>,
}

impl CommitListener {
    /// Waits until the executor settles the transaction. Resolves with a
    /// `Disposed` error when the registry is torn down first.
    pub async fn wait(mut self) -> CommitOutcome {
        loop {
            if let Some(outcome) = self.rx.borrow_and_update().clone() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return Err(ErrorInfo::disposed());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_settles_waiter() {
        let registry = WaiterRegistry::new();
        let id = TransactionId::new();
        let listener = registry.wait_for(&id);

        registry.resolve(&id, Some(json!({"ok": 1})));
        assert_eq!(listener.wait().await, Ok(Some(json!({"ok": 1}))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn wait_for_is_idempotent() {
        let registry = WaiterRegistry::new();
        let id = TransactionId::new();
        let first = registry.wait_for(&id);
        let second = registry.wait_for(&id);
        assert_eq!(registry.len(), 1);

        registry.reject(&id, ErrorInfo::new("NonRetriable", "bad input"));
        let err = first.wait().await.unwrap_err();
        assert_eq!(err.name, "NonRetriable");
        let err = second.wait().await.unwrap_err();
        assert_eq!(err.message, "bad input");
    }

    #[tokio::test]
    async fn settling_absent_id_is_a_noop() {
        let registry = WaiterRegistry::new();
        let id = TransactionId::new();
        registry.resolve(&id, None);
        registry.reject(&id, ErrorInfo::new("Transient", "ignored"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn double_resolve_keeps_first_outcome() {
        let registry = WaiterRegistry::new();
        let id = TransactionId::new();
        let listener = registry.wait_for(&id);

        registry.resolve(&id, Some(json!(1)));
        registry.resolve(&id, Some(json!(2)));
        assert_eq!(listener.wait().await, Ok(Some(json!(1))));
    }

    #[tokio::test]
    async fn clear_rejects_outstanding_listeners() {
        let registry = WaiterRegistry::new();
        let id = TransactionId::new();
        let listener = registry.wait_for(&id);

        registry.clear();
        let err = listener.wait().await.unwrap_err();
        assert_eq!(err.name, "Disposed");
    }
}
