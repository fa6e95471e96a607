//! Core crate exports for Skiff, an offline-capable mutation outbox.
//!
//! The modules exposed here define the boundaries between durable storage,
//! the transaction outbox, retry scheduling, and multi-instance leadership.
//! A host wires its reactive collection store and remote transport in
//! through the `collection` and `mutation_fn` contracts and drives
//! everything else through the coordinator.

pub mod collection;
pub mod config;
pub mod coordinator;
pub mod election;
pub mod envelope;
pub mod executor;
pub mod mutation_fn;
pub mod online;
pub mod outbox;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod transaction;
pub mod types;
pub mod waiters;

pub use collection::{Collection, CollectionRegistry, CollectionSet, NamedCollection};
pub use config::{SkiffConfig, StorageBackend, StorageConfig};
pub use coordinator::{
    CoordinatorError, CoordinatorOptions, Draft, LeadershipHook, SkiffCoordinator,
};
pub use election::{
    GroupElection, LeaderElection, NullElection, election_registry, reset_election_registry,
};
pub use envelope::{ENVELOPE_VERSION, EnvelopeError};
pub use executor::{BeforeRetry, Executor, ExecutorHooks, UnknownMutationHook};
pub use mutation_fn::{
    MutationError, MutationFn, MutationPayload, MutationRegistry, MutationRequest, mutation_fn,
};
pub use online::{ManualOnlineDetector, OnlineDetector};
pub use outbox::{Outbox, OutboxError, OutboxPatch};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use transaction::{
    DraftError, ErrorInfo, Mutation, MutationType, Transaction, TransactionDraft,
};
pub use types::{
    CollectionId, EpochMillis, GlobalKey, IdempotencyKey, TransactionId, now_ms,
};
pub use waiters::{CommitListener, CommitOutcome, WaiterRegistry, WaiterSink};
