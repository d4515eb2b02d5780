//! Stable token hashing.
//!
//! Every algorithm here is seeded with zero and produces the same value on
//! every platform and every release. The chosen algorithm is persisted with a
//! store's settings, so changing any of these functions silently breaks every
//! index built before the change.

use std::fmt;
use std::str::FromStr;

use mur3::murmurhash3_x86_32;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh32::xxh32;
use xxhash_rust::xxh64::xxh64;

use crate::config::HashError;

/// Base hash function applied to every token before permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// 32 bit MurmurHash3 (x86 variant).
    #[default]
    #[serde(rename = "murmur3_32")]
    Murmur3_32,
    /// 32 bit xxHash.
    #[serde(rename = "xxh32")]
    Xxh32,
    /// 64 bit xxHash.
    #[serde(rename = "xxh64")]
    Xxh64,
}

impl HashAlgorithm {
    /// All supported algorithms, in id order.
    pub const ALL: [HashAlgorithm; 3] = [
        HashAlgorithm::Murmur3_32,
        HashAlgorithm::Xxh32,
        HashAlgorithm::Xxh64,
    ];

    /// Stable identifier persisted in store settings.
    pub fn id(self) -> &'static str {
        match self {
            HashAlgorithm::Murmur3_32 => "murmur3_32",
            HashAlgorithm::Xxh32 => "xxh32",
            HashAlgorithm::Xxh64 => "xxh64",
        }
    }

    /// Hash `bytes`. 32 bit algorithms are zero-extended.
    #[inline]
    pub fn hash(self, bytes: &[u8]) -> u64 {
        match self {
            HashAlgorithm::Murmur3_32 => u64::from(murmurhash3_x86_32(bytes, 0)),
            HashAlgorithm::Xxh32 => u64::from(xxh32(bytes, 0)),
            HashAlgorithm::Xxh64 => xxh64(bytes, 0),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.id() == s)
            .ok_or_else(|| HashError::UnknownAlgorithm(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn murmur3_reference_vectors() {
        assert_eq!(HashAlgorithm::Murmur3_32.hash(b"test"), 3_127_628_307);
        assert_eq!(HashAlgorithm::Murmur3_32.hash(b""), 0);
        assert_eq!(murmurhash3_x86_32(b"", 1), 0x514e_28b7);
        assert_eq!(murmurhash3_x86_32(b"Hello, world!", 1234), 0xfaf6_cdb3);
    }

    #[test]
    fn xxhash_reference_vectors() {
        assert_eq!(HashAlgorithm::Xxh32.hash(b"test"), 1_042_293_711);
        assert_eq!(HashAlgorithm::Xxh32.hash(b""), 46_947_589);
        assert_eq!(HashAlgorithm::Xxh64.hash(b"test"), 5_754_696_928_334_414_137);
        assert_eq!(HashAlgorithm::Xxh64.hash(b""), 17_241_709_254_077_376_921);
    }

    #[test]
    fn murmur_tail_lengths_are_distinct() {
        let inputs: [&[u8]; 4] = [b"abcd", b"abcde", b"abcdef", b"abcdefg"];
        let hashes: std::collections::HashSet<u64> = inputs
            .iter()
            .map(|b| HashAlgorithm::Murmur3_32.hash(b))
            .collect();
        assert_eq!(hashes.len(), inputs.len());
    }

    #[test]
    fn algorithm_ids_roundtrip() {
        for alg in HashAlgorithm::ALL {
            assert_eq!(alg.id().parse::<HashAlgorithm>().unwrap(), alg);
            assert_eq!(alg.to_string(), alg.id());
        }
    }

    #[test]
    fn unknown_algorithm_id_is_rejected() {
        let err = "sha1".parse::<HashAlgorithm>().unwrap_err();
        assert_eq!(err, HashError::UnknownAlgorithm("sha1".into()));
    }

    #[test]
    fn serde_uses_stable_ids() {
        let json = serde_json::to_string(&HashAlgorithm::Xxh64).unwrap();
        assert_eq!(json, "\"xxh64\"");
        let back: HashAlgorithm = serde_json::from_str("\"murmur3_32\"").unwrap();
        assert_eq!(back, HashAlgorithm::Murmur3_32);
    }

    #[test]
    fn default_is_murmur() {
        assert_eq!(HashAlgorithm::default(), HashAlgorithm::Murmur3_32);
    }
}
