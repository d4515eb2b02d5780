//! Configuration and error types for MinHash signatures and LSH planning.
//!
//! Nothing in here performs I/O; a [`MinHashConfig`] plus a token set fully
//! determines a signature.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::HashAlgorithm;

/// Seed used when the caller does not pick one.
pub const DEFAULT_SEED: u64 = 42;

/// Configuration for a [`crate::MinHasher`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MinHashConfig {
    /// Number of permutations, i.e. the signature length.
    pub num_hashes: usize,
    /// Base hash applied to every token.
    pub hash_algorithm: HashAlgorithm,
    /// Seed for the permutation coefficients.
    ///
    /// Two hashers agree slot for slot only when `num_hashes`,
    /// `hash_algorithm` and `seed` are all equal.
    pub seed: u64,
    /// Compute signature slots on the rayon pool.
    ///
    /// Output is bit-identical to the sequential path; this only trades CPU
    /// for latency on large token sets.
    #[serde(default)]
    pub use_parallel: bool,
}

impl MinHashConfig {
    pub fn new(num_hashes: usize) -> Self {
        Self {
            num_hashes,
            ..Self::default()
        }
    }

    pub fn with_hash_algorithm(mut self, hash_algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = hash_algorithm;
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

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.num_hashes == 0 {
            return Err(PlannerError::ZeroHashes);
        }
        Ok(())
    }
}

impl Default for MinHashConfig {
    fn default() -> Self {
        Self {
            num_hashes: 128,
            hash_algorithm: HashAlgorithm::default(),
            seed: DEFAULT_SEED,
            use_parallel: false,
        }
    }
}

/// Errors raised while parsing a hash algorithm id.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("unknown hash algorithm id '{0}'")]
    UnknownAlgorithm(String),
}

/// Errors returned by the parameter planner and hasher validation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlannerError {
    #[error("invalid config: similarity_threshold must be in (0, 1] (got {0})")]
    InvalidThreshold(f64),

    #[error("invalid config: {name} must be in (0, 1) (got {value})")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("invalid config: num_hashes must be >= 1")]
    ZeroHashes,

    #[error(
        "no banding within {max_hashes} hashes reaches threshold={threshold} \
         with max_false_negative_proba={max_false_negative} and \
         max_false_positive_proba={max_false_positive}"
    )]
    Infeasible {
        threshold: f64,
        max_false_negative: f64,
        max_false_positive: f64,
        max_hashes: usize,
    },
}
