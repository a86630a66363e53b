//! Error taxonomy for the connector lifecycle subsystem.
//!
//! | Variant | Raised when | Retry |
//! |---------|-------------|-------|
//! | [`NotFound`](LifecycleError::NotFound) | CCP, connector, or capability is missing | no |
//! | [`Precondition`](LifecycleError::Precondition) | Invalid lifecycle transition | no, fix the state first |
//! | [`IndexDeletion`](LifecycleError::IndexDeletion) | Index engine unreachable or rejected a delete | re-invoke the operation |
//! | [`StoreTransaction`](LifecycleError::StoreTransaction) | Constraint violation or lost connection | re-invoke the operation |
//! | [`BlobDeletion`](LifecycleError::BlobDeletion) | A stored file could not be removed | never fatal |
//! | [`InvalidConfig`](LifecycleError::InvalidConfig) | Policy values out of range | no |

use thiserror::Error;

/// Boxed source error carried by adapter failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used across the core crate.
pub type Result<T> = std::result::Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("index deletion failed for document '{doc_id}': {message}")]
    IndexDeletion {
        doc_id: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("store transaction failed: {message}")]
    StoreTransaction {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("blob deletion failed for file '{file_id}': {message}")]
    BlobDeletion {
        file_id: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LifecycleError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn index(doc_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IndexDeletion {
            doc_id: doc_id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreTransaction {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an adapter error (sqlx, driver, ...) as a store failure.
    pub fn store_source<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StoreTransaction {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn blob(file_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BlobDeletion {
            file_id: file_id.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Whether re-invoking the failed operation may succeed.
    ///
    /// Deletion runs are resumable, so index and store failures are
    /// retried by running the whole operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IndexDeletion { .. } | Self::StoreTransaction { .. }
        )
    }
}
