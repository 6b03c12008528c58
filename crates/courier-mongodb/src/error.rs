//! MongoDB backend errors.

use mongodb::error::{ErrorKind, WriteFailure};
use thiserror::Error;

/// MongoDB storage error.
#[derive(Debug, Error)]
pub enum Error {
    /// Driver error.
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
    /// BSON serialization error.
    #[error(transparent)]
    Serialize(#[from] bson::ser::Error),
    /// BSON deserialization error.
    #[error(transparent)]
    Deserialize(#[from] bson::de::Error),
    /// The server returned a leased timeout without an id.
    #[error("leased timeout document has no id")]
    MissingTimeoutId,
}

impl From<Error> for courier_common::store::Error {
    fn from(e: Error) -> Self {
        Self::Database(Box::new(e))
    }
}

/// Server error codes signalling a duplicate-key violation.
const DUPLICATE_KEY_CODES: [i32; 3] = [11000, 11001, 12582];

/// Whether a driver error is a duplicate-key write violation, on the
/// primary key or on any unique index.
pub(crate) fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            DUPLICATE_KEY_CODES.contains(&write_error.code)
        }
        ErrorKind::Write(WriteFailure::WriteConcernError(concern_error)) => {
            DUPLICATE_KEY_CODES.contains(&concern_error.code)
        }
        ErrorKind::Command(command_error) => DUPLICATE_KEY_CODES.contains(&command_error.code),
        _ => false,
    }
}
