//! MongoDB storage backend for the Courier service bus.
//!
//! Implements the saga, timeout and subscription store contracts from
//! [`courier_common`] on top of the official MongoDB driver:
//!
//! * [`MongoSagaStore`]: saga data with revision-based optimistic locking
//!   and periodically re-asserted unique correlation indexes.
//! * [`MongoTimeoutStore`]: deferred messages dequeued through atomic
//!   leases, safe under concurrent polling.
//! * [`MongoSubscriptionStore`]: subscriber sets per event type.
//!
//! Handles come from [`database_from_connection_string`]; the path segment
//! of the connection string names the database.

pub mod error;
mod handle;
mod jitter;
pub mod saga;
pub mod subscription;
pub mod timeout;

pub use error::Error;
pub use handle::database_from_connection_string;
pub use saga::MongoSagaStore;
pub use subscription::MongoSubscriptionStore;
pub use timeout::{MongoTimeoutStore, TimeoutStoreOptions};
