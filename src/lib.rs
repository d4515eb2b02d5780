//! Workspace umbrella crate for nearmatch, a near-duplicate search store.
//!
//! Documents are tokenized, turned into MinHash signatures and banded into
//! LSH buckets held by a pluggable asynchronous [`StorageBackend`]. Queries
//! return every indexed document likely to be at least as similar as the
//! configured threshold, without comparing against the whole collection.
//!
//! ```rust
//! use std::sync::Arc;
//! use nearmatch::{CharNgrams, InMemoryBackend, SimilarityStore, StorageLevel, StoreConfig};
//!
//! # futures::executor::block_on(async {
//! let store = SimilarityStore::create(
//!     StoreConfig::new(0.5).with_storage_level(StorageLevel::Fingerprint),
//!     Arc::new(CharNgrams::new(3)),
//!     Arc::new(InMemoryBackend::new()),
//! )
//! .await
//! .unwrap();
//!
//! store.insert("Oatmeal cookies", Some(1), None, None).await.unwrap();
//! let top = store.query_top_n("Oatmeal cookies", 5, true).await.unwrap();
//! assert_eq!(top, vec![(1, 1.0)]);
//! # });
//! ```

pub mod config;
pub mod error;
pub mod settings;
pub mod snapshot;
mod store;

pub use crate::config::{ConfigLoadError, NearmatchConfig, StoreConfig};
pub use crate::error::StoreError;
pub use crate::settings::{StoreSettings, FORMAT_VERSION};
pub use crate::snapshot::{CompressionCodec, CompressionConfig};
pub use crate::store::SimilarityStore;

#[cfg(feature = "backend-redb")]
pub use index::RedbBackend;
pub use index::{
    BackendConfig, BucketId, DocumentId, InMemoryBackend, StorageBackend, StorageDump,
    StorageError, StorageLevel, StoredDocument, NEXT_DOCUMENT_ID_KEY,
};
pub use minhash::{estimate_similarity, HashAlgorithm, LshParams, MinHashConfig, MinHasher};
pub use tokenize::{CharNgrams, Tokenizer, TokenizerConfig, TokenizerKind, WordNgrams};
