//! Deferred message timeouts.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::Error;

/// A message scheduled for redelivery to its originator at a future instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout {
    /// Absolute instant the timeout becomes due.
    pub due_time: DateTime<Utc>,
    /// Correlation identifier of the originating conversation, if any.
    pub correlation_id: Option<String>,
    /// Saga instance the timeout belongs to, if any. May be the zero UUID.
    pub saga_id: Option<Uuid>,
    /// Opaque payload carried back to the originator.
    pub data: Option<String>,
    /// Queue address the timeout replies to.
    pub reply_to: Option<String>,
}

/// Capability to retire a leased timeout.
#[async_trait]
pub trait MarkProcessed: Send + Sync {
    /// Consume the capability and delete the backing document.
    ///
    /// Deleting a document another consumer already removed is a no-op, so
    /// processing after a lost lease is harmless.
    async fn mark_processed(self: Box<Self>) -> Result<(), Error>;
}

/// A due timeout leased to the caller, carrying the capability to mark it
/// processed.
///
/// A timeout that is not marked processed within its lease window becomes
/// available to other pollers again.
pub struct DueTimeout {
    timeout: Timeout,
    marker: Box<dyn MarkProcessed>,
}

impl DueTimeout {
    /// Wrap a leased timeout with its mark-processed capability.
    pub fn new(timeout: Timeout, marker: Box<dyn MarkProcessed>) -> Self {
        Self { timeout, marker }
    }

    /// The leased timeout.
    pub fn timeout(&self) -> &Timeout {
        &self.timeout
    }

    /// Delete the backing document so the timeout is never delivered again.
    pub async fn mark_as_processed(self) -> Result<(), Error> {
        self.marker.mark_processed().await
    }
}

impl fmt::Debug for DueTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DueTimeout")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
