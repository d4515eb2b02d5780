//! # nearmatch Index
//!
//! The storage side of a similarity store: the asynchronous
//! [`StorageBackend`] contract, the LSH [`BucketIndex`] that maps signatures
//! to bucket ids, and the [`StoredDocument`] record written for every indexed
//! document.
//!
//! ## Core Features
//!
//! - **Pluggable Backends**: anything implementing [`StorageBackend`] can hold
//!   a store. Out of the box:
//!   - [`InMemoryBackend`], hash maps behind `RwLock`s, ideal for tests and
//!     ephemeral indexes.
//!   - `RedbBackend`, a persistent single-file store (feature
//!     `backend-redb`, enabled by default).
//! - **Storage levels**: [`StorageLevel`] decides which fields of a document
//!   are persisted. Records are validated against the level on the way in and
//!   on the way out.
//! - **Banding**: [`BucketIndex`] splits a signature into bands and derives
//!   one [`BucketId`] per band.
//!
//! ## Contract
//!
//! Every backend call is a future; none of them block the caller's executor.
//! Absent settings and documents are reported as [`StorageError::NotFound`],
//! never as an empty value. Removing an id from a bucket that does not
//! contain it is a no-op.
//!
//! ## Example Usage
//!
//! ```
//! use futures::TryStreamExt;
//! use index::{BucketIndex, InMemoryBackend, StorageBackend};
//! use std::sync::Arc;
//!
//! # futures::executor::block_on(async {
//! let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
//! let buckets = BucketIndex::new(Arc::clone(&backend), 2, 2);
//!
//! let ids = buckets.bucket_ids(&[1, 2, 3, 4], None).unwrap();
//! buckets.link(ids[0], 7).await.unwrap();
//!
//! let members: Vec<u64> = buckets.members(ids[0]).try_collect().await.unwrap();
//! assert_eq!(members, vec![7]);
//! # });
//! ```

mod backend;
mod bucket;
mod record;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "backend-redb")]
pub use backend::RedbBackend;
pub use backend::{BackendConfig, InMemoryBackend};
pub use bucket::{BucketError, BucketIndex};
pub use record::{RecordError, StorageLevel, StoredDocument, RECORD_VERSION};

/// Document identifier, assigned by the caller or by
/// [`StorageBackend::next_document_id`].
pub type DocumentId = u64;

/// Setting holding the next id a backend will hand out.
pub const NEXT_DOCUMENT_ID_KEY: &str = "next_document_id";

/// Identifier of one LSH bucket, derived from a band of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketId(pub u64);

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Errors surfaced by storage backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Serialization encode error: {0}")]
    Encode(String),
    #[error("Serialization decode error: {0}")]
    Decode(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

impl StorageError {
    pub fn backend<E: fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn not_found<K: fmt::Display>(what: &'static str, key: K) -> Self {
        Self::NotFound {
            what,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Full contents of a backend, used to snapshot and restore a store.
///
/// Ordered maps keep the dump byte-stable for identical contents.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageDump {
    pub settings: BTreeMap<String, String>,
    pub documents: BTreeMap<DocumentId, Vec<u8>>,
    pub buckets: BTreeMap<u64, Vec<DocumentId>>,
}

/// Storage contract for a similarity store.
///
/// Implementations must be safe to call concurrently on independent keys and
/// must offer read-your-own-writes within a session.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Prepare the backend for a fresh store.
    async fn initialize(&self) -> Result<(), StorageError>;

    async fn insert_setting(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Fails with [`StorageError::NotFound`] if the key was never written.
    async fn query_setting(&self, key: &str) -> Result<String, StorageError>;

    /// Insert or overwrite the forward record of `id`.
    async fn insert_document(&self, id: DocumentId, record: Vec<u8>) -> Result<(), StorageError>;

    /// Fails with [`StorageError::NotFound`] if `id` has no record.
    async fn query_document(&self, id: DocumentId) -> Result<Vec<u8>, StorageError>;

    /// Records for `ids`, aligned by position; `None` where a record is absent.
    async fn query_documents(
        &self,
        ids: &[DocumentId],
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.query_document(id).await {
                Ok(record) => out.push(Some(record)),
                Err(err) if err.is_not_found() => out.push(None),
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    /// Fails with [`StorageError::NotFound`] if `id` has no record.
    async fn remove_document(&self, id: DocumentId) -> Result<(), StorageError>;

    async fn add_document_to_bucket(
        &self,
        bucket: BucketId,
        id: DocumentId,
    ) -> Result<(), StorageError>;

    /// Members of `bucket` in ascending id order. An unknown bucket is empty.
    fn query_ids_from_bucket(
        &self,
        bucket: BucketId,
    ) -> BoxStream<'_, Result<DocumentId, StorageError>>;

    /// No-op if `id` is not a member of `bucket`.
    async fn remove_id_from_bucket(
        &self,
        bucket: BucketId,
        id: DocumentId,
    ) -> Result<(), StorageError>;

    /// Reserve a fresh document id.
    ///
    /// The returned id is above every id that holds a record and above every
    /// id returned before. The counter lives in the settings under
    /// [`NEXT_DOCUMENT_ID_KEY`], so it survives reopening and snapshots.
    async fn next_document_id(&self) -> Result<DocumentId, StorageError> {
        Err(StorageError::Unsupported("next_document_id"))
    }

    /// Copy out everything the backend holds.
    async fn export(&self) -> Result<StorageDump, StorageError> {
        Err(StorageError::Unsupported("export"))
    }
}

/// Pick the id to hand out from the persisted counter and the highest id in
/// use, and the counter value to store after it.
pub(crate) fn allocate_document_id(
    counter: Option<&str>,
    highest: Option<DocumentId>,
) -> Result<(DocumentId, DocumentId), StorageError> {
    let counter = match counter {
        Some(raw) => raw.parse::<DocumentId>().map_err(|err| {
            StorageError::Decode(format!("{NEXT_DOCUMENT_ID_KEY}='{raw}': {err}"))
        })?,
        None => 0,
    };
    let after_highest = match highest {
        Some(id) => id
            .checked_add(1)
            .ok_or_else(|| StorageError::backend("document id space exhausted"))?,
        None => 0,
    };
    let id = counter.max(after_highest);
    let next = id
        .checked_add(1)
        .ok_or_else(|| StorageError::backend("document id space exhausted"))?;
    Ok((id, next))
}
