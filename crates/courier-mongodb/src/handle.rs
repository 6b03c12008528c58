//! Database handle acquisition.

use courier_common::store::Error as StoreError;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};

use crate::error::Error;

/// Produce a [`Database`] handle from a connection string whose path
/// segment names the database.
///
/// A connection string without a database name, or with a blank one, is an
/// [`InvalidConfiguration`](StoreError::InvalidConfiguration) error.
pub async fn database_from_connection_string(
    connection_string: &str,
) -> Result<Database, StoreError> {
    let options = ClientOptions::parse(connection_string)
        .await
        .map_err(Error::from)?;
    let name = match options.default_database.as_deref() {
        Some(name) if !name.trim().is_empty() => name.to_owned(),
        _ => {
            return Err(StoreError::InvalidConfiguration(
                "connection string names no database; add it as the path segment".to_owned(),
            ))
        }
    };
    let client = Client::with_options(options).map_err(Error::from)?;
    Ok(client.database(&name))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    // Handle construction is lazy, so none of these touch a server.

    #[tokio::test]
    async fn database_name_comes_from_the_path_segment() {
        let database = database_from_connection_string("mongodb://localhost:27017/courier")
            .await
            .unwrap();
        assert_eq!(database.name(), "courier");
    }

    #[tokio::test]
    async fn missing_database_name_is_rejected() {
        let error = database_from_connection_string("mongodb://localhost:27017")
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::InvalidConfiguration(_)));
    }
}
