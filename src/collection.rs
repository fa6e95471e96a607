use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::types::CollectionId;

/// Contract a reactive collection store must satisfy for the outbox to
/// reference it. The store itself (optimistic state, subscriptions,
/// rollback) lives outside this crate; the executor only needs a stable
/// identifier to re-attach references when transactions are loaded from
/// storage.
pub trait Collection: Send + Sync {
    fn id(&self) -> &str;
}

/// Minimal [`Collection`] implementation carrying just an identifier.
/// Handy for binaries and tests that have no real store behind them.
#[derive(Debug, Clone)]
pub struct NamedCollection {
    id: CollectionId,
}

impl NamedCollection {
    pub fn new(id: impl Into<CollectionId>) -> Arc<dyn Collection> {
        Arc::new(Self { id: id.into() })
    }
}

impl Collection for NamedCollection {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Caller-supplied mapping from collection id to live collection reference.
#[derive(Clone, Default)]
pub struct CollectionRegistry {
    inner: HashMap<CollectionId, Arc<dyn Collection>>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collection under its own id, replacing any previous entry.
    pub fn register(&mut self, collection: Arc<dyn Collection>) -> &mut Self {
        self.inner.insert(collection.id().to_string(), collection);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Collection>> {
        self.inner.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.keys()).finish()
    }
}

/// Live collection references attached to one transaction, either at draft
/// time or when the serializer rehydrates an envelope.
#[derive(Clone, Default)]
pub struct CollectionSet {
    inner: HashMap<CollectionId, Arc<dyn Collection>>,
}

impl CollectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, collection: Arc<dyn Collection>) {
        self.inner.insert(collection.id().to_string(), collection);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Collection>> {
        self.inner.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for CollectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.keys()).finish()
    }
}
