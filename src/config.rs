//! YAML Configuration File Support for nearmatch
//!
//! A single YAML file describes how a store is planned, how documents are
//! tokenized, and where the store lives.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//!
//! store:
//!   similarity_threshold: 0.75
//!   max_false_negative_proba: 0.05
//!   max_false_positive_proba: 0.05
//!   storage_level: fingerprint
//!   hash_algorithm: murmur3_32
//!   seed: 42
//!
//! tokenizer:
//!   kind: char
//!   n: 3
//!   lowercase: true
//!
//! backend:
//!   backend: redb
//!   path: "/var/lib/nearmatch/store.redb"
//! ```
//!
//! Every section is optional and falls back to its defaults.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use index::{BackendConfig, StorageBackend, StorageError, StorageLevel};
use minhash::{
    plan, HashAlgorithm, LshParams, PlannerError, DEFAULT_SEED,
    planner::{DEFAULT_MAX_FALSE_NEGATIVE, DEFAULT_MAX_FALSE_POSITIVE, DEFAULT_THRESHOLD},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokenize::{Tokenizer, TokenizerConfig, TokenizerError};

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

impl From<PlannerError> for ConfigLoadError {
    fn from(err: PlannerError) -> Self {
        ConfigLoadError::Validation(err.to_string())
    }
}

impl From<TokenizerError> for ConfigLoadError {
    fn from(err: TokenizerError) -> Self {
        ConfigLoadError::Validation(err.to_string())
    }
}

/// Planning inputs and persisted identity of a new store.
///
/// Only consulted by [`crate::SimilarityStore::create`]; a loaded store takes
/// everything from its persisted settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub similarity_threshold: f64,
    pub max_false_negative_proba: f64,
    pub max_false_positive_proba: f64,
    pub storage_level: StorageLevel,
    pub hash_algorithm: HashAlgorithm,
    pub seed: u64,
    /// Compute signatures on the rayon pool. Not persisted.
    pub use_parallel: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_THRESHOLD,
            max_false_negative_proba: DEFAULT_MAX_FALSE_NEGATIVE,
            max_false_positive_proba: DEFAULT_MAX_FALSE_POSITIVE,
            storage_level: StorageLevel::Minimal,
            hash_algorithm: HashAlgorithm::Murmur3_32,
            seed: DEFAULT_SEED,
            use_parallel: false,
        }
    }
}

impl StoreConfig {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
            ..Self::default()
        }
    }

    pub fn with_false_negative_proba(mut self, proba: f64) -> Self {
        self.max_false_negative_proba = proba;
        self
    }

    pub fn with_false_positive_proba(mut self, proba: f64) -> Self {
        self.max_false_positive_proba = proba;
        self
    }

    pub fn with_storage_level(mut self, level: StorageLevel) -> Self {
        self.storage_level = level;
        self
    }

    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_parallel(mut self, use_parallel: bool) -> Self {
        self.use_parallel = use_parallel;
        self
    }

    /// Choose the banding layout. Also validates the threshold and bounds.
    pub fn plan(&self) -> Result<LshParams, PlannerError> {
        plan(
            self.similarity_threshold,
            self.max_false_negative_proba,
            self.max_false_positive_proba,
        )
    }
}

/// Top-level YAML configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearmatchConfig {
    /// Configuration format version
    pub version: String,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    #[serde(default)]
    pub backend: BackendConfig,
}

impl Default for NearmatchConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            store: StoreConfig::default(),
            tokenizer: TokenizerConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl NearmatchConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: NearmatchConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigLoadError> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.store.plan()?;
        self.tokenizer.validate()?;
        if let BackendConfig::Redb { path } = &self.backend {
            if path.is_empty() {
                return Err(ConfigLoadError::Validation(
                    "backend.path must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn build_tokenizer(&self) -> Result<Arc<dyn Tokenizer>, TokenizerError> {
        Ok(Arc::from(self.tokenizer.build()?))
    }

    pub fn build_backend(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
        self.backend.build()
    }
}
