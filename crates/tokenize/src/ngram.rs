//! Character and word n-gram extraction.
//!
//! Both extractors return each distinct n-gram once, in the order it first
//! appears. Downstream hashing treats the output as a set.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::Tokenizer;

/// Padding character used when none is configured.
pub const DEFAULT_PAD: char = '$';

/// Character n-grams of `text`.
///
/// With `pad = Some(c)` the text is surrounded by `n - 1` copies of `c` on
/// both sides, so `"ab"` with `n = 2` yields `"$a"`, `"ab"`, `"b$"`. Without
/// padding, text shorter than `n` characters yields nothing. Empty text always
/// yields nothing.
pub fn char_ngrams(text: &str, n: usize, pad: Option<char>) -> Vec<String> {
    if text.is_empty() || n == 0 {
        return Vec::new();
    }

    let pad_len = if pad.is_some() { n - 1 } else { 0 };
    let mut chars: Vec<char> = Vec::with_capacity(text.len() + 2 * pad_len);
    if let Some(p) = pad {
        chars.extend(std::iter::repeat(p).take(pad_len));
    }
    chars.extend(text.chars());
    if let Some(p) = pad {
        chars.extend(std::iter::repeat(p).take(pad_len));
    }

    dedup_first_seen(chars.windows(n).map(|w| w.iter().collect::<String>()))
}

/// Word n-grams of `text`.
///
/// Words are separated by any unicode whitespace and re-joined with single
/// spaces. Text with fewer than `n` words yields one token holding all of
/// them.
pub fn word_ngrams(text: &str, n: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || n == 0 {
        return Vec::new();
    }
    if words.len() < n {
        return vec![words.join(" ")];
    }
    dedup_first_seen(words.windows(n).map(|w| w.join(" ")))
}

fn dedup_first_seen<I>(grams: I) -> Vec<String>
where
    I: Iterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for gram in grams {
        if seen.insert(gram.clone()) {
            out.push(gram);
        }
    }
    out
}

/// Tokenizer producing character n-grams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharNgrams {
    pub n: usize,
    #[serde(default = "default_pad")]
    pub pad: Option<char>,
}

fn default_pad() -> Option<char> {
    Some(DEFAULT_PAD)
}

impl CharNgrams {
    /// `n`-grams padded with [`DEFAULT_PAD`].
    pub fn new(n: usize) -> Self {
        Self {
            n,
            pad: Some(DEFAULT_PAD),
        }
    }

    pub fn with_pad(mut self, pad: Option<char>) -> Self {
        self.pad = pad;
        self
    }
}

impl Tokenizer for CharNgrams {
    fn tokenize(&self, text: &str) -> Vec<String> {
        char_ngrams(text, self.n, self.pad)
    }
}

/// Tokenizer producing word n-grams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordNgrams {
    pub n: usize,
}

impl WordNgrams {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Tokenizer for WordNgrams {
    fn tokenize(&self, text: &str) -> Vec<String> {
        word_ngrams(text, self.n)
    }
}
