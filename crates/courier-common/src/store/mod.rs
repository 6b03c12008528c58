//! Store contracts the bus loads its persistence services through.

use async_trait::async_trait;
use bson::Bson;
use uuid::Uuid;

use crate::saga::SagaData;
use crate::timeout::{DueTimeout, Timeout};

#[cfg(feature = "test")]
pub mod test;

/// Persistence error surfaced to the bus.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying store failure, propagated unchanged for the bus retry
    /// policy to handle.
    #[error(transparent)]
    Database(Box<dyn std::error::Error + Send + Sync>),
    /// Concurrent modification detected, or a unique-correlation collision.
    #[error("optimistic locking conflict on saga {saga_id} in collection {collection}")]
    OptimisticLockingConflict {
        /// Id of the saga datum the conflicting write carried.
        saga_id: Uuid,
        /// Collection the write went to.
        collection: String,
        /// Driver error that signalled the conflict, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// The same saga type was registered for a collection twice.
    #[error("saga type {saga_type} already has a collection mapping")]
    DuplicateCollectionMapping {
        /// Fully qualified saga type name.
        saga_type: &'static str,
    },
    /// Operation on a saga type that has no collection mapping.
    #[error(
        "no collection mapping for saga type {saga_type}; register one explicitly \
         or enable automatic collection names to store it as \"sagas_{simple_name}\""
    )]
    MissingCollectionMapping {
        /// Fully qualified saga type name.
        saga_type: &'static str,
        /// Simple type name the automatic convention would use.
        simple_name: &'static str,
    },
    /// A correlation-path index exists but is not unique, or was built in
    /// the background.
    #[error("index on {element} in collection {collection} {problem}")]
    IndexMisconfigured {
        /// Collection holding the index.
        collection: String,
        /// Element the index covers.
        element: String,
        /// What is wrong with it.
        problem: String,
    },
    /// Nonsensical constructor or configuration arguments.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Durable storage for saga data with optimistic revision locking.
///
/// One store instance serves every saga type the bus handles; `D` selects
/// the per-type collection.
#[async_trait]
pub trait SagaStore<D: SagaData>: Send + Sync {
    /// Persist a new saga datum, assigning it the caller's revision plus
    /// one.
    ///
    /// Any duplicate-key violation, whether on the primary key or on a
    /// unique correlation index, fails with
    /// [`Error::OptimisticLockingConflict`].
    async fn insert(&self, data: &mut D, correlation_paths: &[&str]) -> Result<(), Error>;

    /// Replace the stored document whose id and revision match `data`,
    /// incrementing the caller's revision by one.
    ///
    /// Fails with [`Error::OptimisticLockingConflict`] when no document
    /// matched, or on any duplicate-key violation.
    async fn update(&self, data: &mut D, correlation_paths: &[&str]) -> Result<(), Error>;

    /// Delete the stored document whose id and revision match `data`.
    ///
    /// Fails with [`Error::OptimisticLockingConflict`] when no document was
    /// deleted.
    async fn delete(&self, data: &D) -> Result<(), Error>;

    /// Look up a single saga datum by correlation property path and value.
    ///
    /// The unique-correlation invariant makes more than one match a
    /// precondition violation; if it ever happens, one match is returned
    /// arbitrarily.
    async fn find(&self, property_path: &str, value: Bson) -> Result<Option<D>, Error>;
}

/// Due-time priority queue of deferred messages.
#[async_trait]
pub trait TimeoutStore: Send + Sync {
    /// Defer a timeout for later delivery.
    async fn add(&self, timeout: Timeout) -> Result<(), Error>;

    /// Lease up to a batch of due timeouts, ordered by due time.
    ///
    /// Concurrent callers never observe overlapping batches within a lease
    /// window. A leased timeout that is not marked processed becomes
    /// available again once its lease expires, so delivery is at least
    /// once.
    async fn due_timeouts(&self) -> Result<Vec<DueTimeout>, Error>;
}

/// Event type to subscriber endpoint mapping.
///
/// Add and remove are set operations, so every call is idempotent and no
/// optimistic concurrency is needed.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Add `endpoint` to the subscriber set of `event_type`.
    async fn store(&self, event_type: &str, endpoint: &str) -> Result<(), Error>;

    /// Remove `endpoint` from the subscriber set of `event_type`.
    async fn remove(&self, event_type: &str, endpoint: &str) -> Result<(), Error>;

    /// All endpoints subscribed to `event_type`, empty when none are known.
    async fn subscribers(&self, event_type: &str) -> Result<Vec<String>, Error>;
}
