//! Immutable per-store settings and their persisted key/value form.

use std::fmt::Display;
use std::str::FromStr;

use index::{StorageBackend, StorageError, StorageLevel};
use minhash::{HashAlgorithm, LshParams, MinHashConfig, MAX_HASHES};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::StoreError;

/// Bump this value whenever the persisted layout of a store changes.
pub const FORMAT_VERSION: u32 = 1;

pub const KEY_FORMAT_VERSION: &str = "format_version";
pub const KEY_HASH_ALGORITHM: &str = "hash_algorithm";
pub const KEY_SEED: &str = "seed";
pub const KEY_NUM_HASHES: &str = "num_hashes";
pub const KEY_NUM_BANDS: &str = "num_bands";
pub const KEY_ROWS_PER_BAND: &str = "rows_per_band";
pub const KEY_SIMILARITY_THRESHOLD: &str = "similarity_threshold";
pub const KEY_STORAGE_LEVEL: &str = "storage_level";

/// Everything needed to reproduce signatures and bucket ids of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    pub format_version: u32,
    pub hash_algorithm: HashAlgorithm,
    pub seed: u64,
    pub num_hashes: usize,
    pub num_bands: usize,
    pub rows_per_band: usize,
    pub similarity_threshold: f64,
    pub storage_level: StorageLevel,
}

impl StoreSettings {
    pub fn new(config: &StoreConfig, params: LshParams) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            hash_algorithm: config.hash_algorithm,
            seed: config.seed,
            num_hashes: params.num_hashes(),
            num_bands: params.num_bands,
            rows_per_band: params.rows_per_band,
            similarity_threshold: config.similarity_threshold,
            storage_level: config.storage_level,
        }
    }

    pub fn lsh_params(&self) -> LshParams {
        LshParams::new(self.num_bands, self.rows_per_band)
    }

    pub fn minhash_config(&self) -> MinHashConfig {
        MinHashConfig::new(self.num_hashes)
            .with_hash_algorithm(self.hash_algorithm)
            .with_seed(self.seed)
    }

    /// Check the banding invariant and the signature length limit.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.num_bands == 0 || self.rows_per_band == 0 {
            return Err(StoreError::Load(format!(
                "banding {}x{} is empty",
                self.num_bands, self.rows_per_band
            )));
        }
        let Some(product) = self.num_bands.checked_mul(self.rows_per_band) else {
            return Err(StoreError::Load(format!(
                "banding {}x{} overflows",
                self.num_bands, self.rows_per_band
            )));
        };
        if self.num_hashes != product {
            return Err(StoreError::Load(format!(
                "num_hashes={} does not equal num_bands={} * rows_per_band={}",
                self.num_hashes, self.num_bands, self.rows_per_band
            )));
        }
        if self.num_hashes > MAX_HASHES {
            return Err(StoreError::Load(format!(
                "num_hashes={} exceeds the limit of {MAX_HASHES}",
                self.num_hashes
            )));
        }
        Ok(())
    }

    /// Settings as `(key, value)` pairs, `format_version` last.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (KEY_HASH_ALGORITHM, self.hash_algorithm.id().to_string()),
            (KEY_SEED, self.seed.to_string()),
            (KEY_NUM_HASHES, self.num_hashes.to_string()),
            (KEY_NUM_BANDS, self.num_bands.to_string()),
            (KEY_ROWS_PER_BAND, self.rows_per_band.to_string()),
            (KEY_SIMILARITY_THRESHOLD, self.similarity_threshold.to_string()),
            (KEY_STORAGE_LEVEL, self.storage_level.id().to_string()),
            (KEY_FORMAT_VERSION, self.format_version.to_string()),
        ]
    }

    /// Write every setting. `format_version` goes last and marks the store
    /// as complete.
    pub async fn persist(&self, backend: &dyn StorageBackend) -> Result<(), StorageError> {
        for (key, value) in self.to_pairs() {
            backend.insert_setting(key, &value).await?;
        }
        Ok(())
    }

    /// Read and validate the settings of an existing store.
    pub async fn load(backend: &dyn StorageBackend) -> Result<Self, StoreError> {
        let format_version: u32 = parse(KEY_FORMAT_VERSION, &read(backend, KEY_FORMAT_VERSION).await?)?;
        if format_version != FORMAT_VERSION {
            return Err(StoreError::Load(format!(
                "unsupported format_version {format_version}, expected {FORMAT_VERSION}"
            )));
        }

        let settings = Self {
            format_version,
            hash_algorithm: parse(KEY_HASH_ALGORITHM, &read(backend, KEY_HASH_ALGORITHM).await?)?,
            seed: parse(KEY_SEED, &read(backend, KEY_SEED).await?)?,
            num_hashes: parse(KEY_NUM_HASHES, &read(backend, KEY_NUM_HASHES).await?)?,
            num_bands: parse(KEY_NUM_BANDS, &read(backend, KEY_NUM_BANDS).await?)?,
            rows_per_band: parse(KEY_ROWS_PER_BAND, &read(backend, KEY_ROWS_PER_BAND).await?)?,
            similarity_threshold: parse(
                KEY_SIMILARITY_THRESHOLD,
                &read(backend, KEY_SIMILARITY_THRESHOLD).await?,
            )?,
            storage_level: parse(KEY_STORAGE_LEVEL, &read(backend, KEY_STORAGE_LEVEL).await?)?,
        };
        settings.validate()?;
        Ok(settings)
    }
}

async fn read(backend: &dyn StorageBackend, key: &'static str) -> Result<String, StoreError> {
    backend.query_setting(key).await.map_err(|err| match err {
        StorageError::NotFound { .. } => StoreError::Load(format!("missing setting '{key}'")),
        other => StoreError::Backend(other),
    })
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|err| StoreError::Load(format!("setting '{key}' = '{raw}': {err}")))
}
