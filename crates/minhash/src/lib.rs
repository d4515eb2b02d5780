//! # nearmatch MinHash
//!
//! Similarity-preserving signatures for token sets, and the planner that
//! turns a similarity threshold plus error bounds into an LSH banding layout.
//!
//! ## Contract
//!
//! - Pure: a signature is a function of `(tokens, MinHashConfig)` only. No
//!   I/O, no clocks, no global state.
//! - Identical token sets always produce identical signatures; token order
//!   and duplicates are ignored.
//! - The probability that two signatures agree on a slot approximates the
//!   Jaccard similarity of the underlying sets.
//!
//! ## Example Usage
//!
//! ```
//! use minhash::{estimate_similarity, plan, MinHashConfig, MinHasher};
//!
//! let params = plan(0.75, 0.05, 0.05).unwrap();
//! let hasher = MinHasher::new(MinHashConfig::new(params.num_hashes())).unwrap();
//!
//! let a = hasher.signature(&["oatmeal", "raisin", "cookie"]);
//! let b = hasher.signature(&["cookie", "raisin", "oatmeal"]);
//! assert_eq!(estimate_similarity(&a, &b), 1.0);
//! ```

pub mod config;
pub mod hash;
mod minhash;
pub mod planner;

pub use crate::config::{HashError, MinHashConfig, PlannerError, DEFAULT_SEED};
pub use crate::hash::HashAlgorithm;
pub use crate::minhash::{estimate_similarity, splitmix64, MinHasher, EMPTY_SLOT, PRIME};
pub use crate::planner::{collision_probability, plan, LshParams, MAX_HASHES};
