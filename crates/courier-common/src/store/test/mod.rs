//! Generic contract tests for store implementations.
//!
//! These cases are generic and check the expected behaviour of any
//! implementation of the store contracts. Backends instantiate them with
//! the [`saga_store_test!`](crate::saga_store_test),
//! [`timeout_store_test!`](crate::timeout_store_test) and
//! [`subscription_store_test!`](crate::subscription_store_test) macros,
//! handing each case a freshly provisioned store.
#![allow(clippy::unwrap_used)]

pub mod subscription;

pub use crate::clock::ManualClock;
