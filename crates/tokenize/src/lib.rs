//! # nearmatch Tokenize
//!
//! Turns text into the token sets that MinHash signatures are computed over.
//!
//! Any `Fn(&str) -> Vec<String> + Send + Sync` is a [`Tokenizer`], so callers
//! can plug in their own splitting. The built-in choices are character
//! n-grams ([`CharNgrams`]) and word n-grams ([`WordNgrams`]); short texts
//! usually work better with character n-grams, long ones with words.
//!
//! ```rust
//! use tokenize::{CharNgrams, Tokenizer, WordNgrams};
//!
//! assert_eq!(CharNgrams::new(2).tokenize("ab"), vec!["$a", "ab", "b$"]);
//! assert_eq!(WordNgrams::new(2).tokenize("one  two three"), vec!["one two", "two three"]);
//!
//! let custom = |s: &str| s.split(',').map(str::to_string).collect::<Vec<_>>();
//! assert_eq!(custom.tokenize("a,b"), vec!["a", "b"]);
//! ```

pub mod config;
mod ngram;

pub use crate::config::{TokenizerConfig, TokenizerError, TokenizerKind};
pub use crate::ngram::{char_ngrams, word_ngrams, CharNgrams, WordNgrams, DEFAULT_PAD};

/// Splits a document into tokens.
///
/// Only the set of returned tokens matters; order and duplicates are ignored
/// downstream. Implementations must be deterministic.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn tokenize(&self, text: &str) -> Vec<String> {
        self(text)
    }
}
