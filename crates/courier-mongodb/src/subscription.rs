//! Subscription store.

use std::fmt;

use async_trait::async_trait;
use bson::{doc, Document};
use courier_common::store::{Error as StoreError, SubscriptionStore};
use mongodb::{Collection, Database};

use crate::error::Error;

/// MongoDB-backed subscription store.
///
/// One document per event type, keyed by the event's fully qualified name.
/// Add and remove are set operations on the `endpoints` element, so calls
/// are idempotent and no optimistic concurrency is needed.
pub struct MongoSubscriptionStore {
    collection: Collection<Document>,
}

impl MongoSubscriptionStore {
    /// Create a store over `collection` in `db`.
    pub fn new(db: &Database, collection: &str) -> Self {
        Self {
            collection: db.collection(collection),
        }
    }
}

#[async_trait]
impl SubscriptionStore for MongoSubscriptionStore {
    async fn store(&self, event_type: &str, endpoint: &str) -> Result<(), StoreError> {
        self.collection
            .update_one(
                doc! { "_id": event_type },
                doc! { "$addToSet": { "endpoints": endpoint } },
            )
            .upsert(true)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn remove(&self, event_type: &str, endpoint: &str) -> Result<(), StoreError> {
        // Upsert on remove may create an empty document; harmless, and it
        // keeps remove symmetrical with store.
        self.collection
            .update_one(
                doc! { "_id": event_type },
                doc! { "$pull": { "endpoints": endpoint } },
            )
            .upsert(true)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn subscribers(&self, event_type: &str) -> Result<Vec<String>, StoreError> {
        let document = self
            .collection
            .find_one(doc! { "_id": event_type })
            .await
            .map_err(Error::from)?;
        let Some(document) = document else {
            return Ok(Vec::new());
        };
        let endpoints = match document.get_array("endpoints") {
            Ok(values) => values
                .iter()
                .filter_map(|value| value.as_str().map(str::to_owned))
                .collect(),
            Err(_) => Vec::new(),
        };
        Ok(endpoints)
    }
}

impl fmt::Debug for MongoSubscriptionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoSubscriptionStore")
            .field("collection", &self.collection.name())
            .finish_non_exhaustive()
    }
}
