//! Timeout store with lease-based dequeue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use courier_common::clock::Clock;
use courier_common::store::{Error as StoreError, TimeoutStore};
use courier_common::timeout::{DueTimeout, MarkProcessed, Timeout};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::Error;

/// Interval at which the bus polls for due timeouts. The lease must
/// outlive one tick, or a poller could re-lease its own batch mid-flight.
pub const POLLER_TICK: Duration = Duration::from_millis(300);

/// Tuning knobs for [`MongoTimeoutStore`], validated at construction.
#[derive(Debug, Clone)]
pub struct TimeoutStoreOptions {
    /// How long a leased timeout stays invisible to other pollers.
    pub lock_timeouts_offset: Duration,
    /// Most timeouts leased by one poll.
    pub max_due_timeouts_retrieved: usize,
}

impl Default for TimeoutStoreOptions {
    fn default() -> Self {
        Self {
            lock_timeouts_offset: Duration::from_secs(5),
            max_due_timeouts_retrieved: 5,
        }
    }
}

/// One deferred message as persisted.
#[derive(Debug, Serialize, Deserialize)]
struct TimeoutDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    time: bson::DateTime,
    corr_id: Option<String>,
    saga_id: Option<Uuid>,
    data: Option<String>,
    reply_to: Option<String>,
    due_lock: Option<bson::DateTime>,
}

impl TimeoutDocument {
    fn from_timeout(timeout: &Timeout) -> Self {
        Self {
            id: None,
            time: bson::DateTime::from_chrono(timeout.due_time),
            corr_id: timeout.correlation_id.clone(),
            saga_id: timeout.saga_id,
            data: timeout.data.clone(),
            reply_to: timeout.reply_to.clone(),
            due_lock: None,
        }
    }

    fn into_timeout(self) -> Timeout {
        Timeout {
            due_time: self.time.to_chrono(),
            correlation_id: self.corr_id,
            saga_id: self.saga_id,
            data: self.data,
            reply_to: self.reply_to,
        }
    }
}

/// MongoDB-backed timeout store.
///
/// Dequeue is lease based: a poll atomically stamps each returned document
/// with a `due_lock` expiry, so concurrent pollers never lease the same
/// timeout, and an unprocessed timeout is redelivered once its lease
/// expires. Delivery is at least once by design.
pub struct MongoTimeoutStore {
    collection: Collection<TimeoutDocument>,
    clock: Arc<dyn Clock>,
    lock_timeouts_offset: chrono::Duration,
    max_due_timeouts_retrieved: usize,
}

impl MongoTimeoutStore {
    /// Create a store over `collection` in `db`, building the dequeue
    /// index.
    pub async fn new(
        db: &Database,
        collection: &str,
        clock: Arc<dyn Clock>,
        options: TimeoutStoreOptions,
    ) -> Result<Self, StoreError> {
        if options.lock_timeouts_offset <= POLLER_TICK {
            return Err(StoreError::InvalidConfiguration(format!(
                "lock timeout offset {:?} must exceed the {POLLER_TICK:?} poller tick",
                options.lock_timeouts_offset
            )));
        }
        if options.max_due_timeouts_retrieved == 0 {
            return Err(StoreError::InvalidConfiguration(
                "max due timeouts retrieved must be positive".to_owned(),
            ));
        }
        let lock_timeouts_offset = chrono::Duration::from_std(options.lock_timeouts_offset)
            .map_err(|_| {
                StoreError::InvalidConfiguration("lock timeout offset out of range".to_owned())
            })?;

        let collection = db.collection::<TimeoutDocument>(collection);
        // The same (time, due_lock) pair may legitimately repeat, so the
        // dequeue index is not unique.
        let index = IndexModel::builder()
            .keys(doc! { "time": 1, "due_lock": 1 })
            .options(IndexOptions::builder().background(true).build())
            .build();
        collection.create_index(index).await.map_err(Error::from)?;
        debug!(collection = collection.name(), "timeout store ready");

        Ok(Self {
            collection,
            clock,
            lock_timeouts_offset,
            max_due_timeouts_retrieved: options.max_due_timeouts_retrieved,
        })
    }
}

/// Filter matching timeouts that are due and not leased at `now`.
fn available_filter(now: bson::DateTime) -> Document {
    doc! {
        "time": { "$lte": now },
        "$or": [
            { "due_lock": Bson::Null },
            { "due_lock": { "$lt": now } },
        ],
    }
}

#[async_trait]
impl TimeoutStore for MongoTimeoutStore {
    async fn add(&self, timeout: Timeout) -> Result<(), StoreError> {
        self.collection
            .insert_one(TimeoutDocument::from_timeout(&timeout))
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn due_timeouts(&self) -> Result<Vec<DueTimeout>, StoreError> {
        let now = self.clock.now();
        let filter = available_filter(bson::DateTime::from_chrono(now));
        let lease = doc! {
            "$set": {
                "due_lock": bson::DateTime::from_chrono(now + self.lock_timeouts_offset),
            }
        };

        let mut batch = Vec::new();
        for _ in 0..self.max_due_timeouts_retrieved {
            let leased = self
                .collection
                .find_one_and_update(filter.clone(), lease.clone())
                .sort(doc! { "time": 1, "due_lock": 1 })
                .return_document(ReturnDocument::Before)
                .await
                .map_err(Error::from)?;
            let Some(document) = leased else { break };
            let id = document.id.ok_or(Error::MissingTimeoutId)?;
            let marker = Box::new(DeleteOnProcessed {
                collection: self.collection.clone(),
                id,
            });
            batch.push(DueTimeout::new(document.into_timeout(), marker));
        }
        Ok(batch)
    }
}

impl fmt::Debug for MongoTimeoutStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoTimeoutStore")
            .field("collection", &self.collection.name())
            .field("lock_timeouts_offset", &self.lock_timeouts_offset)
            .field("max_due_timeouts_retrieved", &self.max_due_timeouts_retrieved)
            .finish_non_exhaustive()
    }
}

/// Retires a leased timeout by deleting its backing document.
struct DeleteOnProcessed {
    collection: Collection<TimeoutDocument>,
    id: ObjectId,
}

#[async_trait]
impl MarkProcessed for DeleteOnProcessed {
    async fn mark_processed(self: Box<Self>) -> Result<(), StoreError> {
        // Deleting a document another consumer already removed is a no-op.
        self.collection
            .delete_one(doc! { "_id": self.id })
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::{DateTime, Utc};
    use courier_common::clock::SystemClock;
    use mongodb::Client;

    use super::*;

    fn sample_timeout() -> Timeout {
        Timeout {
            due_time: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("valid timestamp"),
            correlation_id: Some("corr-1".to_owned()),
            saga_id: Some(Uuid::nil()),
            data: Some("payload".to_owned()),
            reply_to: Some("originator".to_owned()),
        }
    }

    #[test]
    fn available_filter_matches_null_and_expired_leases() {
        let now = bson::DateTime::from_millis(1_700_000_000_000);
        assert_eq!(
            available_filter(now),
            doc! {
                "time": { "$lte": now },
                "$or": [
                    { "due_lock": Bson::Null },
                    { "due_lock": { "$lt": now } },
                ],
            }
        );
    }

    #[test]
    fn documents_use_the_wire_field_names() {
        let document =
            bson::to_document(&TimeoutDocument::from_timeout(&sample_timeout())).unwrap();
        for element in ["time", "corr_id", "saga_id", "data", "reply_to", "due_lock"] {
            assert!(document.contains_key(element), "missing {element}");
        }
        // Unset ids are omitted so the server assigns one.
        assert!(!document.contains_key("_id"));
        assert_eq!(document.get("due_lock"), Some(&Bson::Null));
    }

    #[test]
    fn documents_round_trip_with_the_zero_uuid() {
        let original = sample_timeout();
        let restored = TimeoutDocument::from_timeout(&original).into_timeout();
        assert_eq!(restored, original);
    }

    // Validation fails before any server round trip, so a lazy handle is
    // enough for these.
    async fn test_db() -> Database {
        Client::with_uri_str("mongodb://localhost:27017")
            .await
            .expect("parse uri")
            .database("courier_unit")
    }

    #[tokio::test]
    async fn lease_must_outlive_the_poller_tick() {
        let options = TimeoutStoreOptions {
            lock_timeouts_offset: Duration::from_millis(300),
            ..TimeoutStoreOptions::default()
        };
        let error = MongoTimeoutStore::new(
            &test_db().await,
            "timeouts",
            Arc::new(SystemClock),
            options,
        )
        .await
        .unwrap_err();
        assert!(matches!(error, StoreError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn batch_size_must_be_positive() {
        let options = TimeoutStoreOptions {
            max_due_timeouts_retrieved: 0,
            ..TimeoutStoreOptions::default()
        };
        let error = MongoTimeoutStore::new(
            &test_db().await,
            "timeouts",
            Arc::new(SystemClock),
            options,
        )
        .await
        .unwrap_err();
        assert!(matches!(error, StoreError::InvalidConfiguration(_)));
    }
}
