use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use hashbrown::HashMap;

use crate::{
    allocate_document_id, BucketId, DocumentId, StorageBackend, StorageDump, StorageError,
    NEXT_DOCUMENT_ID_KEY,
};

/// Configuration for selecting and building a backend.
///
/// # Example
/// ```
/// use index::BackendConfig;
///
/// // In-memory (for testing)
/// let config = BackendConfig::in_memory();
///
/// // Redb (pure Rust, persistent)
/// let config = BackendConfig::redb("/data/nearmatch.redb");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Single-file redb database at `path`.
    ///
    /// Requires the `backend-redb` feature (enabled by default).
    Redb { path: String },
    /// Hash maps in process memory; contents are lost on drop.
    #[default]
    InMemory,
}

impl BackendConfig {
    pub fn in_memory() -> Self {
        BackendConfig::InMemory
    }

    pub fn redb<P: Into<String>>(path: P) -> Self {
        BackendConfig::Redb { path: path.into() }
    }

    /// Build the backend described by this configuration.
    pub fn build(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
        match self {
            BackendConfig::InMemory => Ok(Arc::new(InMemoryBackend::new())),
            BackendConfig::Redb { path } => {
                #[cfg(feature = "backend-redb")]
                {
                    Ok(Arc::new(RedbBackend::open(path)?))
                }
                #[cfg(not(feature = "backend-redb"))]
                {
                    let _ = path;
                    Err(StorageError::backend("redb backend disabled at compile time"))
                }
            }
        }
    }
}

/// An in-memory backend using `RwLock`-guarded hash maps.
///
/// Bucket members are kept ordered so streams come out in ascending id order.
pub struct InMemoryBackend {
    settings: RwLock<HashMap<String, String>>,
    documents: RwLock<HashMap<DocumentId, Vec<u8>>>,
    buckets: RwLock<HashMap<BucketId, BTreeSet<DocumentId>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            settings: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Number of forward records held.
    pub fn document_count(&self) -> Result<usize, StorageError> {
        Ok(self.documents.read().map_err(poisoned)?.len())
    }

    /// Number of non-empty buckets held.
    pub fn bucket_count(&self) -> Result<usize, StorageError> {
        Ok(self.buckets.read().map_err(poisoned)?.len())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::backend("poisoned lock")
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn insert_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.settings
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn query_setting(&self, key: &str) -> Result<String, StorageError> {
        let guard = self.settings.read().map_err(poisoned)?;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found("setting", key))
    }

    async fn insert_document(&self, id: DocumentId, record: Vec<u8>) -> Result<(), StorageError> {
        self.documents.write().map_err(poisoned)?.insert(id, record);
        Ok(())
    }

    async fn query_document(&self, id: DocumentId) -> Result<Vec<u8>, StorageError> {
        let guard = self.documents.read().map_err(poisoned)?;
        guard
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("document", id))
    }

    async fn query_documents(
        &self,
        ids: &[DocumentId],
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        // One read lock for the whole batch.
        let guard = self.documents.read().map_err(poisoned)?;
        Ok(ids.iter().map(|id| guard.get(id).cloned()).collect())
    }

    async fn remove_document(&self, id: DocumentId) -> Result<(), StorageError> {
        self.documents
            .write()
            .map_err(poisoned)?
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("document", id))
    }

    async fn add_document_to_bucket(
        &self,
        bucket: BucketId,
        id: DocumentId,
    ) -> Result<(), StorageError> {
        self.buckets
            .write()
            .map_err(poisoned)?
            .entry(bucket)
            .or_default()
            .insert(id);
        Ok(())
    }

    fn query_ids_from_bucket(
        &self,
        bucket: BucketId,
    ) -> BoxStream<'_, Result<DocumentId, StorageError>> {
        let members: Result<Vec<DocumentId>, StorageError> = self
            .buckets
            .read()
            .map_err(poisoned)
            .map(|guard| {
                guard
                    .get(&bucket)
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default()
            });
        match members {
            Ok(ids) => stream::iter(ids.into_iter().map(Ok)).boxed(),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        }
    }

    async fn remove_id_from_bucket(
        &self,
        bucket: BucketId,
        id: DocumentId,
    ) -> Result<(), StorageError> {
        let mut guard = self.buckets.write().map_err(poisoned)?;
        if let Some(ids) = guard.get_mut(&bucket) {
            ids.remove(&id);
            if ids.is_empty() {
                guard.remove(&bucket);
            }
        }
        Ok(())
    }

    async fn next_document_id(&self) -> Result<DocumentId, StorageError> {
        // Holding the settings write lock serializes allocations.
        let mut settings = self.settings.write().map_err(poisoned)?;
        let highest = self.documents.read().map_err(poisoned)?.keys().max().copied();
        let (id, next) = allocate_document_id(
            settings.get(NEXT_DOCUMENT_ID_KEY).map(String::as_str),
            highest,
        )?;
        settings.insert(NEXT_DOCUMENT_ID_KEY.to_string(), next.to_string());
        Ok(id)
    }

    async fn export(&self) -> Result<StorageDump, StorageError> {
        let settings = self.settings.read().map_err(poisoned)?;
        let documents = self.documents.read().map_err(poisoned)?;
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(StorageDump {
            settings: settings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            documents: documents.iter().map(|(k, v)| (*k, v.clone())).collect(),
            buckets: buckets
                .iter()
                .map(|(k, v)| (k.0, v.iter().copied().collect()))
                .collect(),
        })
    }
}

/// The Redb backend implementation.
#[cfg(feature = "backend-redb")]
pub mod redb;

#[cfg(feature = "backend-redb")]
pub use self::redb::RedbBackend;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn settings_roundtrip_and_not_found() {
        let backend = InMemoryBackend::new();
        backend.insert_setting("seed", "42").await.unwrap();
        assert_eq!(backend.query_setting("seed").await.unwrap(), "42");
        let err = backend.query_setting("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn documents_roundtrip_overwrite_and_remove() {
        let backend = InMemoryBackend::new();
        backend.insert_document(1, b"a".to_vec()).await.unwrap();
        backend.insert_document(1, b"b".to_vec()).await.unwrap();
        assert_eq!(backend.query_document(1).await.unwrap(), b"b".to_vec());
        assert_eq!(backend.document_count().unwrap(), 1);

        backend.remove_document(1).await.unwrap();
        assert!(backend.query_document(1).await.unwrap_err().is_not_found());
        assert!(backend.remove_document(1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn query_documents_aligns_with_ids() {
        let backend = InMemoryBackend::new();
        backend.insert_document(1, b"one".to_vec()).await.unwrap();
        backend.insert_document(3, b"three".to_vec()).await.unwrap();
        let got = backend.query_documents(&[3, 2, 1]).await.unwrap();
        assert_eq!(
            got,
            vec![Some(b"three".to_vec()), None, Some(b"one".to_vec())]
        );
    }

    #[tokio::test]
    async fn buckets_are_ordered_and_pruned() {
        let backend = InMemoryBackend::new();
        let bucket = BucketId(5);
        for id in [9, 2, 5] {
            backend.add_document_to_bucket(bucket, id).await.unwrap();
        }
        let ids: Vec<DocumentId> = backend
            .query_ids_from_bucket(bucket)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec![2, 5, 9]);

        for id in [9, 2, 5] {
            backend.remove_id_from_bucket(bucket, id).await.unwrap();
        }
        assert_eq!(backend.bucket_count().unwrap(), 0);

        let empty: Vec<DocumentId> = backend
            .query_ids_from_bucket(BucketId(404))
            .try_collect()
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn export_captures_everything() {
        let backend = InMemoryBackend::new();
        backend.insert_setting("k", "v").await.unwrap();
        backend.insert_document(4, vec![1, 0]).await.unwrap();
        backend.add_document_to_bucket(BucketId(8), 4).await.unwrap();

        let dump = backend.export().await.unwrap();
        assert_eq!(dump.settings.get("k").map(String::as_str), Some("v"));
        assert_eq!(dump.documents.get(&4), Some(&vec![1, 0]));
        assert_eq!(dump.buckets.get(&8), Some(&vec![4]));
    }

    #[tokio::test]
    async fn next_document_id_counts_up_past_used_ids() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.next_document_id().await.unwrap(), 0);
        assert_eq!(backend.next_document_id().await.unwrap(), 1);

        backend.insert_document(40, b"x".to_vec()).await.unwrap();
        assert_eq!(backend.next_document_id().await.unwrap(), 41);

        // Removing the highest record never recycles its id.
        backend.remove_document(40).await.unwrap();
        assert_eq!(backend.next_document_id().await.unwrap(), 42);
        assert_eq!(
            backend.query_setting(NEXT_DOCUMENT_ID_KEY).await.unwrap(),
            "43"
        );
    }

    #[test]
    fn config_builds_in_memory() {
        assert!(BackendConfig::in_memory().build().is_ok());
        assert_eq!(BackendConfig::default(), BackendConfig::InMemory);
    }
}
