//! Courier shared persistence types and store contracts.
//!
//! The bus runtime loads its persistence services through the three
//! contracts defined here: [`SagaStore`] for durable workflow state with
//! optimistic revision locking, [`TimeoutStore`] for deferred messages, and
//! [`SubscriptionStore`] for event subscriptions. Storage backends live in
//! their own crates and implement these traits; the bus never sees a
//! driver type.

pub mod clock;
pub mod saga;
pub mod store;
pub mod timeout;

pub use self::clock::{Clock, SystemClock};
pub use self::saga::SagaData;
pub use self::store::{Error, SagaStore, SubscriptionStore, TimeoutStore};
pub use self::timeout::{DueTimeout, MarkProcessed, Timeout};
