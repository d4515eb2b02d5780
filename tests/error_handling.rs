//! Backend failures surface unchanged through the store.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use nearmatch::{
    BucketId, DocumentId, InMemoryBackend, SimilarityStore, StorageBackend, StorageError,
    StorageLevel, StoreConfig, StoreError, WordNgrams,
};

/// Delegates to an in-memory backend but fails every bucket read.
struct BrokenBuckets {
    inner: InMemoryBackend,
}

#[async_trait]
impl StorageBackend for BrokenBuckets {
    async fn initialize(&self) -> Result<(), StorageError> {
        self.inner.initialize().await
    }

    async fn insert_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.insert_setting(key, value).await
    }

    async fn query_setting(&self, key: &str) -> Result<String, StorageError> {
        self.inner.query_setting(key).await
    }

    async fn insert_document(&self, id: DocumentId, record: Vec<u8>) -> Result<(), StorageError> {
        self.inner.insert_document(id, record).await
    }

    async fn query_document(&self, id: DocumentId) -> Result<Vec<u8>, StorageError> {
        self.inner.query_document(id).await
    }

    async fn remove_document(&self, id: DocumentId) -> Result<(), StorageError> {
        self.inner.remove_document(id).await
    }

    async fn add_document_to_bucket(
        &self,
        bucket: BucketId,
        id: DocumentId,
    ) -> Result<(), StorageError> {
        self.inner.add_document_to_bucket(bucket, id).await
    }

    fn query_ids_from_bucket(
        &self,
        _bucket: BucketId,
    ) -> BoxStream<'_, Result<DocumentId, StorageError>> {
        stream::once(async { Err(StorageError::backend("bucket shard offline")) }).boxed()
    }

    async fn remove_id_from_bucket(
        &self,
        bucket: BucketId,
        id: DocumentId,
    ) -> Result<(), StorageError> {
        self.inner.remove_id_from_bucket(bucket, id).await
    }

    async fn next_document_id(&self) -> Result<DocumentId, StorageError> {
        self.inner.next_document_id().await
    }
}

/// Delegates to an in-memory backend but drops the last record of every
/// batch read.
struct ShortBatches {
    inner: InMemoryBackend,
}

#[async_trait]
impl StorageBackend for ShortBatches {
    async fn initialize(&self) -> Result<(), StorageError> {
        self.inner.initialize().await
    }

    async fn insert_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.insert_setting(key, value).await
    }

    async fn query_setting(&self, key: &str) -> Result<String, StorageError> {
        self.inner.query_setting(key).await
    }

    async fn insert_document(&self, id: DocumentId, record: Vec<u8>) -> Result<(), StorageError> {
        self.inner.insert_document(id, record).await
    }

    async fn query_document(&self, id: DocumentId) -> Result<Vec<u8>, StorageError> {
        self.inner.query_document(id).await
    }

    async fn query_documents(
        &self,
        ids: &[DocumentId],
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let mut records = self.inner.query_documents(ids).await?;
        records.pop();
        Ok(records)
    }

    async fn remove_document(&self, id: DocumentId) -> Result<(), StorageError> {
        self.inner.remove_document(id).await
    }

    async fn add_document_to_bucket(
        &self,
        bucket: BucketId,
        id: DocumentId,
    ) -> Result<(), StorageError> {
        self.inner.add_document_to_bucket(bucket, id).await
    }

    fn query_ids_from_bucket(
        &self,
        bucket: BucketId,
    ) -> BoxStream<'_, Result<DocumentId, StorageError>> {
        self.inner.query_ids_from_bucket(bucket)
    }

    async fn remove_id_from_bucket(
        &self,
        bucket: BucketId,
        id: DocumentId,
    ) -> Result<(), StorageError> {
        self.inner.remove_id_from_bucket(bucket, id).await
    }
}

#[tokio::test]
async fn bucket_read_failure_is_a_backend_error() {
    let store = SimilarityStore::create(
        StoreConfig::default().with_storage_level(StorageLevel::Fingerprint),
        Arc::new(WordNgrams::new(1)),
        Arc::new(BrokenBuckets {
            inner: InMemoryBackend::new(),
        }),
    )
    .await
    .unwrap();
    store.insert("a b c", Some(1), None, None).await.unwrap();

    let err = store.query("a b c").await.unwrap_err();
    assert_eq!(
        err,
        StoreError::Backend(StorageError::Backend("bucket shard offline".into()))
    );
    assert!(store.query_top_n("a b c", 1, false).await.is_err());
}

#[tokio::test]
async fn short_batch_read_is_a_backend_error() {
    let store = SimilarityStore::create(
        StoreConfig::default().with_storage_level(StorageLevel::Fingerprint),
        Arc::new(WordNgrams::new(1)),
        Arc::new(ShortBatches {
            inner: InMemoryBackend::new(),
        }),
    )
    .await
    .unwrap();
    store.insert("a b c", Some(1), None, None).await.unwrap();
    store.insert("a b c", Some(2), None, None).await.unwrap();

    let err = store.query_top_n("a b c", 2, false).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::Backend(StorageError::Backend(
            "query_documents returned 1 records for 2 ids".into()
        ))
    );
}

#[tokio::test]
async fn auto_ids_need_backend_support() {
    let store = SimilarityStore::create(
        StoreConfig::default(),
        Arc::new(WordNgrams::new(1)),
        Arc::new(ShortBatches {
            inner: InMemoryBackend::new(),
        }),
    )
    .await
    .unwrap();
    let err = store.insert("a b c", None, None, None).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::Backend(StorageError::Unsupported("next_document_id"))
    );
    assert_eq!(store.insert("a b c", Some(4), None, None).await.unwrap(), 4);
}

#[tokio::test]
async fn snapshots_need_export() {
    let store = SimilarityStore::create(
        StoreConfig::default(),
        Arc::new(WordNgrams::new(1)),
        Arc::new(BrokenBuckets {
            inner: InMemoryBackend::new(),
        }),
    )
    .await
    .unwrap();
    let err = store
        .to_bytes(&nearmatch::CompressionConfig::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::Backend(StorageError::Unsupported("export"))
    );
}

#[tokio::test]
async fn corrupt_record_is_reported_with_its_id() {
    let backend = Arc::new(InMemoryBackend::new());
    let store = SimilarityStore::create(
        StoreConfig::default().with_storage_level(StorageLevel::Fingerprint),
        Arc::new(WordNgrams::new(1)),
        Arc::clone(&backend) as Arc<dyn StorageBackend>,
    )
    .await
    .unwrap();
    backend.insert_document(3, vec![99, 0]).await.unwrap();

    let err = store.get_document(3).await.unwrap_err();
    assert!(matches!(err, StoreError::Record { id: 3, .. }), "{err:?}");
}
