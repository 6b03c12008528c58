//! Saga data capability.

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Element name the saga id is persisted under.
pub const ID_ELEMENT: &str = "_id";

/// Element name the saga revision is persisted under.
pub const REVISION_ELEMENT: &str = "_rev";

/// Durable state of one long-running workflow instance.
///
/// A saga datum persists as one document per instance. The id is the
/// document primary key and the revision is the optimistic-locking token,
/// so the implementing type tags those fields to serialize under
/// [`ID_ELEMENT`] and [`REVISION_ELEMENT`]:
///
/// ```
/// use courier_common::saga::SagaData;
/// use serde::{Deserialize, Serialize};
/// use uuid::Uuid;
///
/// #[derive(Serialize, Deserialize)]
/// struct OrderSaga {
///     #[serde(rename = "_id")]
///     id: Uuid,
///     #[serde(rename = "_rev")]
///     revision: i64,
///     order_number: String,
/// }
///
/// impl SagaData for OrderSaga {
///     fn id(&self) -> Uuid {
///         self.id
///     }
///
///     fn revision(&self) -> i64 {
///         self.revision
///     }
///
///     fn set_revision(&mut self, revision: i64) {
///         self.revision = revision;
///     }
/// }
/// ```
pub trait SagaData: Serialize + DeserializeOwned + Send + Sync {
    /// Globally unique identifier, stable for the life of the instance.
    fn id(&self) -> Uuid;

    /// Optimistic-locking revision, incremented by exactly one on every
    /// successful insert or update.
    fn revision(&self) -> i64;

    /// Replace the revision after a successful write.
    fn set_revision(&mut self, revision: i64);

    /// Element name the revision is persisted under.
    ///
    /// Conditional filters go through this accessor rather than a literal,
    /// so a type that renames its revision field stays consistent with its
    /// own documents.
    fn revision_element_name() -> &'static str {
        REVISION_ELEMENT
    }

    /// Map a correlation property path to the persisted element name.
    ///
    /// `Id` and `Revision` map to their remapped element names; any other
    /// path, including dotted nested paths, passes through unchanged.
    fn element_name(property_path: &str) -> &str {
        match property_path {
            "Id" => ID_ELEMENT,
            "Revision" => Self::revision_element_name(),
            other => other,
        }
    }
}
