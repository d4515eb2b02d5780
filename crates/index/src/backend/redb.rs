//! Redb (Rust embedded database) backend.
//!
//! Redb is a pure Rust, ACID, single-file key-value store. Every call runs its
//! own transaction on tokio's blocking pool, so the async contract never
//! stalls an executor thread on disk I/O.
//!
//! # Configuration Example
//! ```yaml
//! backend:
//!   backend: redb
//!   path: "/data/nearmatch.redb"
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use redb::{
    Database, MultimapTableDefinition, ReadableDatabase, ReadableMultimapTable, ReadableTable,
    TableDefinition,
};
use tracing::debug;

use crate::{
    allocate_document_id, BucketId, DocumentId, StorageBackend, StorageDump, StorageError,
    NEXT_DOCUMENT_ID_KEY,
};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("nearmatch_settings");
const DOCUMENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("nearmatch_documents");
const BUCKETS: MultimapTableDefinition<u64, u64> = MultimapTableDefinition::new("nearmatch_buckets");

/// Redb backend for persistent storage.
///
/// Cloning is cheap; clones share the same database handle.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open or create a database at `path` and make sure every table exists.
    ///
    /// # Example
    /// ```no_run
    /// use index::RedbBackend;
    ///
    /// let backend = RedbBackend::open("/tmp/nearmatch.redb").unwrap();
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(StorageError::backend)?;
        create_tables(&db)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Run `f` against the database on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(StorageError::backend)?
    }
}

fn create_tables(db: &Database) -> Result<(), StorageError> {
    let write_txn = db.begin_write().map_err(StorageError::backend)?;
    {
        // Opening a table in a write transaction creates it.
        write_txn
            .open_table(SETTINGS)
            .map_err(StorageError::backend)?;
        write_txn
            .open_table(DOCUMENTS)
            .map_err(StorageError::backend)?;
        write_txn
            .open_multimap_table(BUCKETS)
            .map_err(StorageError::backend)?;
    }
    write_txn.commit().map_err(StorageError::backend)
}

fn bucket_members(db: &Database, bucket: u64) -> Result<Vec<DocumentId>, StorageError> {
    let read_txn = db.begin_read().map_err(StorageError::backend)?;
    let table = read_txn
        .open_multimap_table(BUCKETS)
        .map_err(StorageError::backend)?;
    let mut ids = Vec::new();
    for item in table.get(bucket).map_err(StorageError::backend)? {
        ids.push(item.map_err(StorageError::backend)?.value());
    }
    Ok(ids)
}

#[async_trait]
impl StorageBackend for RedbBackend {
    async fn initialize(&self) -> Result<(), StorageError> {
        self.blocking(create_tables).await
    }

    async fn insert_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(StorageError::backend)?;
            {
                let mut table = write_txn
                    .open_table(SETTINGS)
                    .map_err(StorageError::backend)?;
                table
                    .insert(key.as_str(), value.as_str())
                    .map_err(StorageError::backend)?;
            }
            write_txn.commit().map_err(StorageError::backend)
        })
        .await
    }

    async fn query_setting(&self, key: &str) -> Result<String, StorageError> {
        let key = key.to_string();
        self.blocking(move |db| {
            let read_txn = db.begin_read().map_err(StorageError::backend)?;
            let table = read_txn
                .open_table(SETTINGS)
                .map_err(StorageError::backend)?;
            match table.get(key.as_str()).map_err(StorageError::backend)? {
                Some(value) => Ok(value.value().to_string()),
                None => Err(StorageError::not_found("setting", key)),
            }
        })
        .await
    }

    async fn insert_document(&self, id: DocumentId, record: Vec<u8>) -> Result<(), StorageError> {
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(StorageError::backend)?;
            {
                let mut table = write_txn
                    .open_table(DOCUMENTS)
                    .map_err(StorageError::backend)?;
                table
                    .insert(id, record.as_slice())
                    .map_err(StorageError::backend)?;
            }
            write_txn.commit().map_err(StorageError::backend)
        })
        .await
    }

    async fn query_document(&self, id: DocumentId) -> Result<Vec<u8>, StorageError> {
        self.blocking(move |db| {
            let read_txn = db.begin_read().map_err(StorageError::backend)?;
            let table = read_txn
                .open_table(DOCUMENTS)
                .map_err(StorageError::backend)?;
            match table.get(id).map_err(StorageError::backend)? {
                Some(value) => Ok(value.value().to_vec()),
                None => Err(StorageError::not_found("document", id)),
            }
        })
        .await
    }

    async fn query_documents(
        &self,
        ids: &[DocumentId],
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let ids = ids.to_vec();
        self.blocking(move |db| {
            // One read transaction for the whole batch.
            let read_txn = db.begin_read().map_err(StorageError::backend)?;
            let table = read_txn
                .open_table(DOCUMENTS)
                .map_err(StorageError::backend)?;
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                let record = table.get(id).map_err(StorageError::backend)?;
                out.push(record.map(|v| v.value().to_vec()));
            }
            Ok(out)
        })
        .await
    }

    async fn remove_document(&self, id: DocumentId) -> Result<(), StorageError> {
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(StorageError::backend)?;
            let removed = {
                let mut table = write_txn
                    .open_table(DOCUMENTS)
                    .map_err(StorageError::backend)?;
                let removed = table.remove(id).map_err(StorageError::backend)?;
                removed.is_some()
            };
            if !removed {
                write_txn.abort().map_err(StorageError::backend)?;
                return Err(StorageError::not_found("document", id));
            }
            write_txn.commit().map_err(StorageError::backend)
        })
        .await
    }

    async fn add_document_to_bucket(
        &self,
        bucket: BucketId,
        id: DocumentId,
    ) -> Result<(), StorageError> {
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(StorageError::backend)?;
            {
                let mut table = write_txn
                    .open_multimap_table(BUCKETS)
                    .map_err(StorageError::backend)?;
                table.insert(bucket.0, id).map_err(StorageError::backend)?;
            }
            write_txn.commit().map_err(StorageError::backend)
        })
        .await
    }

    fn query_ids_from_bucket(
        &self,
        bucket: BucketId,
    ) -> BoxStream<'_, Result<DocumentId, StorageError>> {
        // Multimap values come back sorted, matching the in-memory order.
        stream::once(self.blocking(move |db| bucket_members(db, bucket.0)))
            .map_ok(|ids| stream::iter(ids.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    async fn remove_id_from_bucket(
        &self,
        bucket: BucketId,
        id: DocumentId,
    ) -> Result<(), StorageError> {
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(StorageError::backend)?;
            {
                let mut table = write_txn
                    .open_multimap_table(BUCKETS)
                    .map_err(StorageError::backend)?;
                table.remove(bucket.0, id).map_err(StorageError::backend)?;
            }
            write_txn.commit().map_err(StorageError::backend)
        })
        .await
    }

    async fn next_document_id(&self) -> Result<DocumentId, StorageError> {
        self.blocking(|db| {
            // redb admits one write transaction at a time.
            let write_txn = db.begin_write().map_err(StorageError::backend)?;
            let id = {
                let highest = {
                    let documents = write_txn
                        .open_table(DOCUMENTS)
                        .map_err(StorageError::backend)?;
                    let last = documents
                        .last()
                        .map_err(StorageError::backend)?
                        .map(|(k, _)| k.value());
                    last
                };
                let mut settings = write_txn
                    .open_table(SETTINGS)
                    .map_err(StorageError::backend)?;
                let counter = settings
                    .get(NEXT_DOCUMENT_ID_KEY)
                    .map_err(StorageError::backend)?
                    .map(|v| v.value().to_string());
                let (id, next) = allocate_document_id(counter.as_deref(), highest)?;
                settings
                    .insert(NEXT_DOCUMENT_ID_KEY, next.to_string().as_str())
                    .map_err(StorageError::backend)?;
                id
            };
            write_txn.commit().map_err(StorageError::backend)?;
            Ok(id)
        })
        .await
    }

    async fn export(&self) -> Result<StorageDump, StorageError> {
        let dump = self
            .blocking(|db| {
                let read_txn = db.begin_read().map_err(StorageError::backend)?;
                let mut dump = StorageDump::default();

                let settings = read_txn
                    .open_table(SETTINGS)
                    .map_err(StorageError::backend)?;
                for item in settings.iter().map_err(StorageError::backend)? {
                    let (k, v) = item.map_err(StorageError::backend)?;
                    dump.settings
                        .insert(k.value().to_string(), v.value().to_string());
                }

                let documents = read_txn
                    .open_table(DOCUMENTS)
                    .map_err(StorageError::backend)?;
                for item in documents.iter().map_err(StorageError::backend)? {
                    let (k, v) = item.map_err(StorageError::backend)?;
                    dump.documents.insert(k.value(), v.value().to_vec());
                }

                let buckets = read_txn
                    .open_multimap_table(BUCKETS)
                    .map_err(StorageError::backend)?;
                for item in buckets.iter().map_err(StorageError::backend)? {
                    let (k, values) = item.map_err(StorageError::backend)?;
                    let mut ids = Vec::new();
                    for v in values {
                        ids.push(v.map_err(StorageError::backend)?.value());
                    }
                    dump.buckets.insert(k.value(), ids);
                }
                Ok(dump)
            })
            .await?;
        debug!(
            settings = dump.settings.len(),
            documents = dump.documents.len(),
            buckets = dump.buckets.len(),
            "redb_export"
        );
        Ok(dump)
    }
}
