//! Saga store with optimistic revision locking and unique-correlation
//! indexing.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use courier_common::saga::{SagaData, ID_ELEMENT};
use courier_common::store::{Error as StoreError, SagaStore};
use futures::TryStreamExt;
use mongodb::options::{Acknowledgment, CollectionOptions, IndexOptions, WriteConcern};
use mongodb::{Collection, Database, IndexModel};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{is_duplicate_key, Error};
use crate::jitter;

/// Default interval between index sweeps.
pub const DEFAULT_INDEX_DECLARATION_INTERVAL: Duration = Duration::from_secs(600);

/// Default variation applied around the sweep interval.
pub const DEFAULT_INDEX_DECLARATION_VARIATION: Duration = Duration::from_secs(300);

/// Prefix for collection names derived from saga type names.
const AUTOMATIC_COLLECTION_PREFIX: &str = "sagas_";

/// MongoDB-backed saga store.
///
/// One instance serves every saga type the bus handles; each type maps to
/// its own collection, either registered explicitly with
/// [`with_collection`](Self::with_collection) or derived from the type name
/// when [`allow_automatic_collection_names`](Self::allow_automatic_collection_names)
/// is enabled.
///
/// Unique indexes on correlation paths are re-asserted before writes, at
/// most once per randomized sweep interval, to defend against operators
/// silently dropping constraints.
pub struct MongoSagaStore {
    db: Database,
    collections: HashMap<TypeId, String>,
    automatic_names: bool,
    index_ensured_recently: Arc<AtomicBool>,
    index_ensure_lock: tokio::sync::Mutex<()>,
    sweep: parking_lot::Mutex<JoinHandle<()>>,
}

impl MongoSagaStore {
    /// Create a store over `db` with no collection mappings.
    pub fn new(db: Database) -> Self {
        let index_ensured_recently = Arc::new(AtomicBool::new(false));
        let task = spawn_sweep(
            Arc::clone(&index_ensured_recently),
            DEFAULT_INDEX_DECLARATION_INTERVAL,
            DEFAULT_INDEX_DECLARATION_VARIATION,
        );
        Self {
            db,
            collections: HashMap::new(),
            automatic_names: false,
            index_ensured_recently,
            index_ensure_lock: tokio::sync::Mutex::new(()),
            sweep: parking_lot::Mutex::new(task),
        }
    }

    /// Map saga type `D` to `collection`.
    ///
    /// Mappings are fixed at configuration time; registering the same saga
    /// type twice is a configuration error.
    pub fn with_collection<D: SagaData + 'static>(
        mut self,
        collection: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let collection = collection.into();
        if self.collections.contains_key(&TypeId::of::<D>()) {
            return Err(StoreError::DuplicateCollectionMapping {
                saga_type: type_name::<D>(),
            });
        }
        info!(
            saga_type = type_name::<D>(),
            collection = %collection,
            "mapped saga collection"
        );
        self.collections.insert(TypeId::of::<D>(), collection);
        Ok(self)
    }

    /// Let unregistered saga types fall back to the collection
    /// `sagas_<TypeSimpleName>`.
    pub fn allow_automatic_collection_names(mut self) -> Self {
        self.automatic_names = true;
        self
    }

    /// Change the sweep cadence and restart the sweep.
    ///
    /// The next sweep fires after a uniformly random delay in
    /// `[interval - variation, interval + variation]`.
    pub fn set_index_declaration_interval(
        &self,
        interval: Duration,
        variation: Duration,
    ) -> Result<(), StoreError> {
        if variation > interval {
            return Err(StoreError::InvalidConfiguration(format!(
                "index declaration variation {variation:?} exceeds the interval {interval:?}"
            )));
        }
        let mut sweep = self.sweep.lock();
        sweep.abort();
        *sweep = spawn_sweep(
            Arc::clone(&self.index_ensured_recently),
            interval,
            variation,
        );
        info!(?interval, ?variation, "restarted index declaration sweep");
        Ok(())
    }

    fn collection_name<D: SagaData + 'static>(&self) -> Result<String, StoreError> {
        if let Some(name) = self.collections.get(&TypeId::of::<D>()) {
            return Ok(name.clone());
        }
        if self.automatic_names {
            return Ok(format!(
                "{AUTOMATIC_COLLECTION_PREFIX}{}",
                simple_type_name::<D>()
            ));
        }
        Err(StoreError::MissingCollectionMapping {
            saga_type: type_name::<D>(),
            simple_name: simple_type_name::<D>(),
        })
    }

    fn collection<D: SagaData + 'static>(&self) -> Result<Collection<Document>, StoreError> {
        let name = self.collection_name::<D>()?;
        // Correctness depends on server confirmation, whatever write
        // concern the connection string carries.
        let options = CollectionOptions::builder()
            .write_concern(WriteConcern::builder().w(Acknowledgment::Nodes(1)).build())
            .build();
        Ok(self.db.collection_with_options(&name, options))
    }

    async fn ensure_indexes<D: SagaData>(
        &self,
        collection: &Collection<Document>,
        correlation_paths: &[&str],
    ) -> Result<(), StoreError> {
        if self.index_ensured_recently.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.index_ensure_lock.lock().await;
        if self.index_ensured_recently.load(Ordering::SeqCst) {
            return Ok(());
        }

        let existing: Vec<IndexModel> = collection
            .list_indexes()
            .await
            .map_err(Error::from)?
            .try_collect()
            .await
            .map_err(Error::from)?;

        for path in correlation_paths {
            let element = D::element_name(path);
            if element == ID_ELEMENT {
                continue;
            }
            match existing.iter().find(|index| covers_exactly(index, element)) {
                Some(index) => verify_index(collection.name(), element, index)?,
                None => {
                    debug!(
                        collection = collection.name(),
                        element, "creating unique correlation index"
                    );
                    let index = IndexModel::builder()
                        .keys(single_key(element))
                        .options(IndexOptions::builder().unique(true).background(false).build())
                        .build();
                    collection.create_index(index).await.map_err(Error::from)?;
                }
            }
        }

        self.index_ensured_recently.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl<D: SagaData + 'static> SagaStore<D> for MongoSagaStore {
    async fn insert(&self, data: &mut D, correlation_paths: &[&str]) -> Result<(), StoreError> {
        let collection = self.collection::<D>()?;
        self.ensure_indexes::<D>(&collection, correlation_paths).await?;

        data.set_revision(data.revision() + 1);
        let document = bson::to_document(data).map_err(Error::from)?;
        if let Err(error) = collection.insert_one(document).await {
            if is_duplicate_key(&error) {
                return Err(conflict(data, collection.name(), Some(error)));
            }
            return Err(Error::from(error).into());
        }
        Ok(())
    }

    async fn update(&self, data: &mut D, correlation_paths: &[&str]) -> Result<(), StoreError> {
        let collection = self.collection::<D>()?;
        self.ensure_indexes::<D>(&collection, correlation_paths).await?;

        let criteria = revision_criteria(data)?;
        data.set_revision(data.revision() + 1);
        let replacement = bson::to_document(data).map_err(Error::from)?;
        match collection.replace_one(criteria, replacement).await {
            Ok(outcome) if outcome.modified_count == 0 => {
                Err(conflict(data, collection.name(), None))
            }
            Ok(_) => Ok(()),
            Err(error) if is_duplicate_key(&error) => {
                Err(conflict(data, collection.name(), Some(error)))
            }
            Err(error) => Err(Error::from(error).into()),
        }
    }

    async fn delete(&self, data: &D) -> Result<(), StoreError> {
        let collection = self.collection::<D>()?;
        let criteria = revision_criteria(data)?;
        let outcome = collection.delete_one(criteria).await.map_err(Error::from)?;
        if outcome.deleted_count == 0 {
            return Err(conflict(data, collection.name(), None));
        }
        Ok(())
    }

    async fn find(&self, property_path: &str, value: Bson) -> Result<Option<D>, StoreError> {
        let collection = self.collection::<D>()?.clone_with_type::<D>();
        let mut filter = Document::new();
        filter.insert(D::element_name(property_path), value);
        Ok(collection.find_one(filter).await.map_err(Error::from)?)
    }
}

impl fmt::Debug for MongoSagaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoSagaStore")
            .field("database", &self.db.name())
            .field("collections", &self.collections)
            .field("automatic_names", &self.automatic_names)
            .finish_non_exhaustive()
    }
}

impl Drop for MongoSagaStore {
    fn drop(&mut self) {
        self.sweep.lock().abort();
    }
}

/// Conditional filter matching the datum's id and current revision.
fn revision_criteria<D: SagaData>(data: &D) -> Result<Document, Error> {
    let mut criteria = Document::new();
    criteria.insert(ID_ELEMENT, bson::to_bson(&data.id())?);
    criteria.insert(D::revision_element_name(), Bson::Int64(data.revision()));
    Ok(criteria)
}

fn conflict<D: SagaData>(
    data: &D,
    collection: &str,
    source: Option<mongodb::error::Error>,
) -> StoreError {
    StoreError::OptimisticLockingConflict {
        saga_id: data.id(),
        collection: collection.to_owned(),
        source: source.map(|error| Box::new(error) as Box<dyn std::error::Error + Send + Sync>),
    }
}

/// Last path segment of the type name.
fn simple_type_name<D: 'static>() -> &'static str {
    let full = type_name::<D>();
    full.rsplit("::").next().unwrap_or(full)
}

fn single_key(element: &str) -> Document {
    let mut keys = Document::new();
    keys.insert(element, 1_i32);
    keys
}

/// Whether `index` is a single-key index on exactly `element`.
///
/// Compound indexes do not count as coverage.
fn covers_exactly(index: &IndexModel, element: &str) -> bool {
    index.keys.len() == 1 && index.keys.contains_key(element)
}

fn verify_index(collection: &str, element: &str, index: &IndexModel) -> Result<(), StoreError> {
    let options = index.options.as_ref();
    if options.and_then(|options| options.unique) != Some(true) {
        warn!(collection, element, "correlation index exists but is not unique");
        return Err(StoreError::IndexMisconfigured {
            collection: collection.to_owned(),
            element: element.to_owned(),
            problem: "is not unique".to_owned(),
        });
    }
    if options.and_then(|options| options.background) == Some(true) {
        warn!(collection, element, "correlation index was built in the background");
        return Err(StoreError::IndexMisconfigured {
            collection: collection.to_owned(),
            element: element.to_owned(),
            problem: "was built in the background".to_owned(),
        });
    }
    Ok(())
}

fn spawn_sweep(flag: Arc<AtomicBool>, interval: Duration, variation: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delay = {
                let mut rng = rand::rng();
                jitter::sweep_delay(interval, variation, &mut rng)
            };
            tokio::time::sleep(delay).await;
            flag.store(false, Ordering::SeqCst);
        }
    })
}
