//! The similarity store: tokenizes, signs, buckets and persists documents.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use futures::TryStreamExt;
use index::{
    BucketIndex, DocumentId, StorageBackend, StorageError, StorageLevel, StoredDocument,
};
use minhash::{estimate_similarity, MinHasher};
use tokenize::Tokenizer;
use tracing::{debug, info, warn, Instrument, Level};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::settings::{StoreSettings, KEY_FORMAT_VERSION};

/// A MinHash LSH index over a [`StorageBackend`].
///
/// A value of this type always refers to a fully initialized store: the only
/// ways to get one are [`SimilarityStore::create`],
/// [`SimilarityStore::load_from_storage`] and
/// [`SimilarityStore::from_stream`]. The store itself holds nothing but its
/// settings and shared handles, so it can be wrapped in an `Arc` and used
/// from many tasks at once.
pub struct SimilarityStore {
    settings: StoreSettings,
    hasher: MinHasher,
    buckets: BucketIndex,
    backend: Arc<dyn StorageBackend>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl fmt::Debug for SimilarityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimilarityStore")
            .field("settings", &self.settings)
            .field("use_parallel", &self.hasher.config().use_parallel)
            .finish_non_exhaustive()
    }
}

impl SimilarityStore {
    /// Plan a banding layout for `config` and write a new store to `backend`.
    ///
    /// Fails with [`StoreError::Config`] if the targets are invalid or
    /// infeasible, or if `backend` already holds a store.
    pub async fn create(
        config: StoreConfig,
        tokenizer: Arc<dyn Tokenizer>,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, StoreError> {
        let start = Instant::now();
        let params = config.plan()?;

        backend.initialize().await?;
        match backend.query_setting(KEY_FORMAT_VERSION).await {
            Ok(_) => {
                return Err(StoreError::Config(
                    "backend already holds a store".to_string(),
                ));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        let settings = StoreSettings::new(&config, params);
        settings.persist(backend.as_ref()).await?;
        let store = Self::assemble(settings, tokenizer, backend, config.use_parallel)?;

        info!(
            num_bands = params.num_bands,
            rows_per_band = params.rows_per_band,
            num_hashes = params.num_hashes(),
            similarity_threshold = config.similarity_threshold,
            storage_level = %config.storage_level,
            hash_algorithm = %config.hash_algorithm,
            elapsed_micros = start.elapsed().as_micros(),
            "store_created"
        );
        Ok(store)
    }

    /// Open a store previously written to `backend`.
    pub async fn load_from_storage(
        tokenizer: Arc<dyn Tokenizer>,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, StoreError> {
        let start = Instant::now();
        let settings = match StoreSettings::load(backend.as_ref()).await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = %err, "store_load_failure");
                return Err(err);
            }
        };
        let store = Self::assemble(settings, tokenizer, backend, false)?;

        info!(
            num_bands = store.settings.num_bands,
            rows_per_band = store.settings.rows_per_band,
            storage_level = %store.settings.storage_level,
            elapsed_micros = start.elapsed().as_micros(),
            "store_loaded"
        );
        Ok(store)
    }

    fn assemble(
        settings: StoreSettings,
        tokenizer: Arc<dyn Tokenizer>,
        backend: Arc<dyn StorageBackend>,
        use_parallel: bool,
    ) -> Result<Self, StoreError> {
        let hasher = MinHasher::new(settings.minhash_config().with_parallel(use_parallel))?;
        let buckets = BucketIndex::new(
            Arc::clone(&backend),
            settings.num_bands,
            settings.rows_per_band,
        );
        Ok(Self {
            settings,
            hasher,
            buckets,
            backend,
            tokenizer,
        })
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn storage_level(&self) -> StorageLevel {
        self.settings.storage_level
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Toggle rayon-parallel signature computation. Signatures are unchanged.
    pub fn with_parallel_signatures(mut self, use_parallel: bool) -> Self {
        self.hasher = self.hasher.with_parallel(use_parallel);
        self
    }

    /// The MinHash signature this store computes for `document`.
    pub fn fingerprint(&self, document: &str) -> Vec<u32> {
        self.hasher.signature(&self.tokenizer.tokenize(document))
    }

    /// Index `document` under `id`, or under a fresh id from the backend when
    /// `id` is `None`. Returns the id the document was stored under.
    ///
    /// Re-inserting an id overwrites its record; bucket links of the previous
    /// content are not removed. An empty `exact_part` counts as none.
    pub async fn insert(
        &self,
        document: &str,
        id: Option<DocumentId>,
        exact_part: Option<&str>,
        data: Option<&[u8]>,
    ) -> Result<DocumentId, StoreError> {
        let start = Instant::now();
        let span = tracing::span!(
            Level::DEBUG,
            "nearmatch.insert",
            id,
            storage_level = %self.settings.storage_level
        );
        let result = self
            .insert_inner(document, id, exact_part, data)
            .instrument(span)
            .await;
        log_outcome("insert", start, &result);
        result
    }

    async fn insert_inner(
        &self,
        document: &str,
        id: Option<DocumentId>,
        exact_part: Option<&str>,
        data: Option<&[u8]>,
    ) -> Result<DocumentId, StoreError> {
        let id = match id {
            Some(id) => id,
            None => self.backend.next_document_id().await?,
        };
        let exact_part = exact_part.filter(|s| !s.is_empty());
        let signature = self.fingerprint(document);
        let bucket_ids = self.buckets.bucket_ids(&signature, exact_part)?;

        let level = self.settings.storage_level;
        let mut record = StoredDocument::new(id);
        if level.keeps_fingerprint() {
            record = record
                .with_fingerprint(signature)
                .with_exact_part(exact_part.map(str::to_owned));
        }
        if level.keeps_document() {
            record = record.with_document(document.to_owned());
        }
        if level.keeps_data() {
            record = record.with_data(data.map(<[u8]>::to_vec));
        }
        let bytes = record
            .encode(level)
            .map_err(|source| StoreError::Record { id, source })?;

        self.backend.insert_document(id, Vec::from(bytes)).await?;
        try_join_all(bucket_ids.iter().map(|&bucket| self.buckets.link(bucket, id))).await?;
        debug!(id, buckets = bucket_ids.len(), "linked");
        Ok(id)
    }

    /// Ids sharing at least one bucket with `document`.
    pub async fn query(&self, document: &str) -> Result<BTreeSet<DocumentId>, StoreError> {
        let start = Instant::now();
        let span = tracing::span!(Level::DEBUG, "nearmatch.query");
        let result = self
            .candidate_set(document, None)
            .instrument(span)
            .await;
        log_outcome("query", start, &result);
        result
    }

    /// Like [`SimilarityStore::query`], restricted to documents inserted with
    /// the same `exact_part`.
    pub async fn query_exact(
        &self,
        document: &str,
        exact_part: &str,
    ) -> Result<BTreeSet<DocumentId>, StoreError> {
        let start = Instant::now();
        let span = tracing::span!(Level::DEBUG, "nearmatch.query_exact", exact_part);
        let result = self
            .candidate_set(document, Some(exact_part))
            .instrument(span)
            .await;
        log_outcome("query_exact", start, &result);
        result
    }

    /// Up to `n` candidates with their estimated similarity, most similar
    /// first. Ties keep discovery order: band order, then ascending id.
    ///
    /// With `check_if_exists`, fails with [`StoreError::NotFound`] unless a
    /// candidate has exactly the query's signature.
    pub async fn query_top_n(
        &self,
        document: &str,
        n: usize,
        check_if_exists: bool,
    ) -> Result<Vec<(DocumentId, f32)>, StoreError> {
        let start = Instant::now();
        let span = tracing::span!(Level::DEBUG, "nearmatch.query_top_n", n, check_if_exists);
        let result = self
            .query_top_n_inner(document, n, check_if_exists)
            .instrument(span)
            .await;
        log_outcome("query_top_n", start, &result);
        result
    }

    async fn query_top_n_inner(
        &self,
        document: &str,
        n: usize,
        check_if_exists: bool,
    ) -> Result<Vec<(DocumentId, f32)>, StoreError> {
        self.require_level("query_top_n", StorageLevel::Fingerprint)?;

        let signature = self.fingerprint(document);
        let candidates = self.candidates(&signature, None).await?;
        let records = self.backend.query_documents(&candidates).await?;
        if records.len() != candidates.len() {
            return Err(StoreError::Backend(StorageError::backend(format!(
                "query_documents returned {} records for {} ids",
                records.len(),
                candidates.len()
            ))));
        }

        let mut scored = Vec::with_capacity(candidates.len());
        for (&id, raw) in candidates.iter().zip(records) {
            // Removed since its bucket was read.
            let Some(raw) = raw else { continue };
            let record = self.decode(id, &raw)?;
            let fingerprint = record
                .require_fingerprint()
                .map_err(|source| StoreError::Record { id, source })?;
            scored.push((id, estimate_similarity(&signature, fingerprint)));
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        if check_if_exists && scored.first().is_none_or(|&(_, s)| s < 1.0) {
            return Err(StoreError::NotFound {
                what: "document",
                key: "matching the query".to_string(),
            });
        }
        scored.truncate(n);
        Ok(scored)
    }

    /// Unlink `id` from every bucket, then delete its record.
    pub async fn remove_by_id(&self, id: DocumentId) -> Result<(), StoreError> {
        let start = Instant::now();
        let span = tracing::span!(Level::DEBUG, "nearmatch.remove_by_id", id);
        let result = self.remove_inner(id).instrument(span).await;
        log_outcome("remove_by_id", start, &result);
        result
    }

    async fn remove_inner(&self, id: DocumentId) -> Result<(), StoreError> {
        self.require_level("remove_by_id", StorageLevel::Fingerprint)?;

        let raw = self.backend.query_document(id).await?;
        let record = self.decode(id, &raw)?;
        let fingerprint = record
            .require_fingerprint()
            .map_err(|source| StoreError::Record { id, source })?;
        let bucket_ids = self.buckets.bucket_ids(fingerprint, record.exact_part())?;

        try_join_all(bucket_ids.iter().map(|&bucket| self.buckets.unlink(bucket, id))).await?;
        self.backend.remove_document(id).await?;
        Ok(())
    }

    /// The stored record of `id`, holding whatever the storage level keeps.
    pub async fn get_document(&self, id: DocumentId) -> Result<StoredDocument, StoreError> {
        let raw = self.backend.query_document(id).await?;
        self.decode(id, &raw)
    }

    async fn candidate_set(
        &self,
        document: &str,
        exact_part: Option<&str>,
    ) -> Result<BTreeSet<DocumentId>, StoreError> {
        let signature = self.fingerprint(document);
        let ids = self.candidates(&signature, exact_part).await?;
        Ok(ids.into_iter().collect())
    }

    /// Bucket members for `signature`, deduplicated in discovery order.
    async fn candidates(
        &self,
        signature: &[u32],
        exact_part: Option<&str>,
    ) -> Result<Vec<DocumentId>, StoreError> {
        let bucket_ids = self
            .buckets
            .bucket_ids(signature, exact_part.filter(|s| !s.is_empty()))?;
        let members = try_join_all(
            bucket_ids
                .iter()
                .map(|&bucket| self.buckets.members(bucket).try_collect::<Vec<_>>()),
        )
        .await?;

        let mut seen = HashSet::new();
        Ok(members
            .into_iter()
            .flatten()
            .filter(|id| seen.insert(*id))
            .collect())
    }

    fn decode(&self, id: DocumentId, raw: &[u8]) -> Result<StoredDocument, StoreError> {
        StoredDocument::decode(id, raw, self.settings.storage_level)
            .map_err(|source| StoreError::Record { id, source })
    }

    fn require_level(
        &self,
        operation: &'static str,
        required: StorageLevel,
    ) -> Result<(), StoreError> {
        let configured = self.settings.storage_level;
        if configured < required {
            return Err(StoreError::StorageLevel {
                operation,
                required,
                configured,
            });
        }
        Ok(())
    }
}

fn log_outcome<T>(operation: &'static str, start: Instant, result: &Result<T, StoreError>) {
    let elapsed_micros = start.elapsed().as_micros();
    match result {
        Ok(_) => debug!(operation, elapsed_micros, "store_op_success"),
        Err(err) => warn!(operation, error = %err, elapsed_micros, "store_op_failure"),
    }
}
