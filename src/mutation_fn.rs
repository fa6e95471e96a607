use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::transaction::{ErrorInfo, Mutation, Transaction};
use crate::types::{IdempotencyKey, TransactionId};

/// Failure reported by a mutation function.
///
/// `NonRetriable` means the server rejected the transaction permanently
/// (malformed payload, authorization); everything else is transient and
/// subject to the retry policy.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("permanently rejected: {0}")]
    NonRetriable(String),
    #[error("{0}")]
    Transient(String),
}

impl MutationError {
    pub fn non_retriable(message: impl Into<String>) -> Self {
        Self::NonRetriable(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn is_non_retriable(&self) -> bool {
        matches!(self, Self::NonRetriable(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NonRetriable(_) => "NonRetriable",
            Self::Transient(_) => "Transient",
        }
    }
}

impl From<&MutationError> for ErrorInfo {
    fn from(err: &MutationError) -> Self {
        let message = match err {
            MutationError::NonRetriable(message) | MutationError::Transient(message) => {
                message.clone()
            }
        };
        ErrorInfo::new(err.kind_name(), message)
    }
}

/// Transaction view handed to a mutation function: identity, row
/// operations, and caller metadata, but none of the executor's bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct MutationPayload {
    pub id: TransactionId,
    pub mutations: Vec<Mutation>,
    pub metadata: Map<String, Value>,
}

/// Argument to one mutation-function attempt. The idempotency key is
/// identical across retries of the same transaction.
#[derive(Debug, Clone, Serialize)]
pub struct MutationRequest {
    pub transaction: MutationPayload,
    pub idempotency_key: IdempotencyKey,
}

impl MutationRequest {
    pub fn for_transaction(tx: &Transaction) -> Self {
        Self {
            transaction: MutationPayload {
                id: tx.id.clone(),
                mutations: tx.mutations.clone(),
                metadata: tx.metadata.clone(),
            },
            idempotency_key: tx.idempotency_key.clone(),
        }
    }
}

/// Caller-supplied async operation that applies one transaction against the
/// remote endpoint.
#[async_trait]
pub trait MutationFn: Send + Sync {
    async fn invoke(&self, request: MutationRequest) -> Result<Option<Value>, MutationError>;
}

struct ClosureMutation<F> {
    inner: F,
}

#[async_trait]
impl<F, Fut> MutationFn for ClosureMutation<F>
where
    F: Fn(MutationRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>, MutationError>> + Send,
{
    async fn invoke(&self, request: MutationRequest) -> Result<Option<Value>, MutationError> {
        (self.inner)(request).await
    }
}

/// Adapts a plain async closure into a registrable [`MutationFn`].
pub fn mutation_fn<F, Fut>(f: F) -> Arc<dyn MutationFn>
where
    F: Fn(MutationRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, MutationError>> + Send + 'static,
{
    Arc::new(ClosureMutation { inner: f })
}

/// Named mutation functions a coordinator can dispatch to.
#[derive(Clone, Default)]
pub struct MutationRegistry {
    inner: HashMap<String, Arc<dyn MutationFn>>,
}

impl MutationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, f: Arc<dyn MutationFn>) -> &mut Self {
        self.inner.insert(name.into(), f);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MutationFn>> {
        self.inner.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }
}

impl fmt::Debug for MutationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::NamedCollection;
    use crate::transaction::TransactionDraft;
    use serde_json::json;

    #[tokio::test]
    async fn closure_adapter_round_trips() {
        let f = mutation_fn(|request: MutationRequest| async move {
            Ok(Some(json!({ "echo": request.transaction.mutations.len() })))
        });

        let todos = NamedCollection::new("todos");
        let tx = TransactionDraft::new("echo")
            .insert(&todos, "todos/1", json!(1))
            .build()
            .unwrap();

        let value = f.invoke(MutationRequest::for_transaction(&tx)).await.unwrap();
        assert_eq!(value, Some(json!({ "echo": 1 })));
    }

    #[test]
    fn error_info_captures_kind_and_message() {
        let info = ErrorInfo::from(&MutationError::non_retriable("bad input"));
        assert_eq!(info.name, "NonRetriable");
        assert_eq!(info.message, "bad input");
        assert!(info.stack.is_none());
    }
}
