//! MinHash signatures over token sets.
//!
//! Instead of evaluating `num_hashes` independent hash functions per token,
//! every token is hashed once with the configured [`HashAlgorithm`] and the
//! base hash is pushed through `num_hashes` linear permutations
//! `(a * h + b) mod PRIME`. The coefficients come from a splitmix64 stream, so
//! a `(num_hashes, seed)` pair always yields the same permutation family.

use rayon::prelude::*;

use crate::config::{MinHashConfig, PlannerError};
use crate::hash::HashAlgorithm;

/// Largest prime below 2^32. Every permuted value is `< PRIME`, which keeps
/// the narrowing to `u32` lossless.
pub const PRIME: u64 = 4_294_967_291;

/// Slot value of the signature of an empty token set. Never produced by a
/// real token because permuted values are always `< PRIME`.
pub const EMPTY_SLOT: u32 = u32::MAX;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Computes fixed-length MinHash signatures.
#[derive(Debug, Clone)]
pub struct MinHasher {
    cfg: MinHashConfig,
    a: Vec<u64>,
    b: Vec<u64>,
}

impl MinHasher {
    /// Build a hasher and draw its permutation coefficients.
    pub fn new(cfg: MinHashConfig) -> Result<Self, PlannerError> {
        cfg.validate()?;
        let (a, b) = permutation_coefficients(cfg.num_hashes, cfg.seed);
        Ok(Self { cfg, a, b })
    }

    pub fn num_hashes(&self) -> usize {
        self.cfg.num_hashes
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.cfg.hash_algorithm
    }

    pub fn config(&self) -> &MinHashConfig {
        &self.cfg
    }

    /// Toggle rayon slot computation. Signatures do not change.
    pub fn with_parallel(mut self, use_parallel: bool) -> Self {
        self.cfg.use_parallel = use_parallel;
        self
    }

    /// Signature of a token set. Duplicates and token order do not matter.
    pub fn signature<S>(&self, tokens: &[S]) -> Vec<u32>
    where
        S: AsRef<[u8]>,
    {
        let base = self.base_hashes(tokens);
        if base.is_empty() {
            return vec![EMPTY_SLOT; self.cfg.num_hashes];
        }

        let mut result = Vec::with_capacity(self.cfg.num_hashes);
        if self.cfg.use_parallel {
            (0..self.cfg.num_hashes)
                .into_par_iter()
                .map(|i| compute_slot(&base, self.a[i], self.b[i]))
                .collect_into_vec(&mut result);
        } else {
            for i in 0..self.cfg.num_hashes {
                result.push(compute_slot(&base, self.a[i], self.b[i]));
            }
        }
        result
    }

    /// Base hashes of the tokens, already reduced modulo [`PRIME`].
    fn base_hashes<S>(&self, tokens: &[S]) -> Vec<u64>
    where
        S: AsRef<[u8]>,
    {
        let alg = self.cfg.hash_algorithm;
        let mut hashes: Vec<u64> = tokens
            .iter()
            .map(|t| alg.hash(t.as_ref()) % PRIME)
            .collect();
        hashes.sort_unstable();
        hashes.dedup();
        hashes
    }
}

/// Estimated Jaccard similarity: the fraction of slots on which two
/// signatures agree. Signatures of different length compare as `0.0`.
pub fn estimate_similarity(a: &[u32], b: &[u32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let agree = a.iter().zip(b).filter(|(x, y)| x == y).count();
    agree as f32 / a.len() as f32
}

/// Minimum permuted value over all base hashes for one slot.
#[inline]
pub(crate) fn compute_slot(base: &[u64], a: u64, b: u64) -> u32 {
    let mut minv = u32::MAX;
    for &h in base {
        let v = permute(h, a, b);
        if v < minv {
            minv = v;
        }
    }
    minv
}

/// `(a * h + b) mod PRIME`, computed in `u128` before narrowing.
///
/// `a`, `b` and `h` may each be as large as `u64::MAX`; the product needs up
/// to 128 bits and must be reduced before it is cast down.
#[inline(always)]
pub(crate) fn permute(h: u64, a: u64, b: u64) -> u32 {
    let wide = (u128::from(a) * u128::from(h) + u128::from(b)) % u128::from(PRIME);
    wide as u32
}

/// Draw `n` coefficient pairs, `a ∈ [1, PRIME)` and `b ∈ [0, PRIME)`.
pub(crate) fn permutation_coefficients(n: usize, seed: u64) -> (Vec<u64>, Vec<u64>) {
    let mut a = Vec::with_capacity(n);
    let mut b = Vec::with_capacity(n);
    let mut state = seed;
    for _ in 0..n {
        state = state.wrapping_add(GOLDEN_GAMMA);
        a.push(1 + splitmix64(state) % (PRIME - 1));
        state = state.wrapping_add(GOLDEN_GAMMA);
        b.push(splitmix64(state) % PRIME);
    }
    (a, b)
}

/// One splitmix64 output step for state `x`.
///
/// Stepping the state by the golden gamma and finalizing it yields the
/// permutation coefficients of a [`MinHasher`]. The bucket index reuses it to
/// derive a per-band seed. Both are persisted implicitly through the store
/// seed, so the mixing constants must never change.
#[inline]
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(GOLDEN_GAMMA);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
