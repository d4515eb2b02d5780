//! LSH banding on top of a [`StorageBackend`].

use std::sync::Arc;

use futures::stream::BoxStream;
use minhash::splitmix64;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::{BucketId, DocumentId, StorageBackend, StorageError};

// Keeps band seeds away from small integers.
const BAND_SALT: u64 = 0x6e65_6172_6d61_7463;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BucketError {
    #[error("signature has {actual} values, banding expects {expected}")]
    SignatureLength { expected: usize, actual: usize },
}

/// Maps signatures to one bucket per band and forwards bucket membership to
/// the backend. Holds no state of its own.
#[derive(Clone)]
pub struct BucketIndex {
    backend: Arc<dyn StorageBackend>,
    num_bands: usize,
    rows_per_band: usize,
}

impl BucketIndex {
    pub fn new(backend: Arc<dyn StorageBackend>, num_bands: usize, rows_per_band: usize) -> Self {
        Self {
            backend,
            num_bands,
            rows_per_band,
        }
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    pub fn rows_per_band(&self) -> usize {
        self.rows_per_band
    }

    /// One bucket id per band, in band order.
    ///
    /// Equal row values in different bands give unrelated ids. A non-empty
    /// `exact_part` is mixed into every id, so documents only meet when their
    /// exact parts are equal.
    pub fn bucket_ids(
        &self,
        signature: &[u32],
        exact_part: Option<&str>,
    ) -> Result<Vec<BucketId>, BucketError> {
        let expected = self.num_bands * self.rows_per_band;
        if signature.len() != expected {
            return Err(BucketError::SignatureLength {
                expected,
                actual: signature.len(),
            });
        }

        let exact = exact_part.filter(|s| !s.is_empty());
        let mut key = Vec::with_capacity(self.rows_per_band * 4 + exact.map_or(0, |s| s.len() + 1));
        let ids = signature
            .chunks_exact(self.rows_per_band)
            .enumerate()
            .map(|(band, rows)| {
                key.clear();
                for &v in rows {
                    key.extend_from_slice(&v.to_le_bytes());
                }
                if let Some(exact) = exact {
                    key.push(b'-');
                    key.extend_from_slice(exact.as_bytes());
                }
                BucketId(xxh3_64_with_seed(&key, band_seed(band)))
            })
            .collect();
        Ok(ids)
    }

    pub async fn link(&self, bucket: BucketId, id: DocumentId) -> Result<(), StorageError> {
        self.backend.add_document_to_bucket(bucket, id).await
    }

    pub async fn unlink(&self, bucket: BucketId, id: DocumentId) -> Result<(), StorageError> {
        self.backend.remove_id_from_bucket(bucket, id).await
    }

    /// Lazily streamed members of `bucket`.
    pub fn members(&self, bucket: BucketId) -> BoxStream<'_, Result<DocumentId, StorageError>> {
        self.backend.query_ids_from_bucket(bucket)
    }
}

#[inline]
fn band_seed(band: usize) -> u64 {
    splitmix64(band as u64 ^ BAND_SALT)
}
