use index::{BucketError, DocumentId, RecordError, StorageError, StorageLevel};
use minhash::PlannerError;
use thiserror::Error;

/// Errors returned by [`crate::SimilarityStore`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Invalid configuration, or a backend that cannot take a new store.
    #[error("invalid config: {0}")]
    Config(String),

    /// Persisted settings are missing, unparsable or inconsistent.
    #[error("cannot load store: {0}")]
    Load(String),

    #[error(
        "{operation} requires storage level '{required}' or higher, store keeps '{configured}'"
    )]
    StorageLevel {
        operation: &'static str,
        required: StorageLevel,
        configured: StorageLevel,
    },

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    /// Any other backend failure, passed through unchanged.
    #[error(transparent)]
    Backend(StorageError),

    #[error("corrupt record for document {id}: {source}")]
    Record { id: DocumentId, source: RecordError },

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { what, key } => StoreError::NotFound { what, key },
            other => StoreError::Backend(other),
        }
    }
}

impl From<PlannerError> for StoreError {
    fn from(err: PlannerError) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl From<BucketError> for StoreError {
    fn from(err: BucketError) -> Self {
        StoreError::Config(err.to_string())
    }
}
