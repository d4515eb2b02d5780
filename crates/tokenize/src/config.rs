//! Serializable tokenizer selection.
//!
//! A [`TokenizerConfig`] names one of the built-in n-gram tokenizers plus
//! the text normalization applied before splitting. It is the form in which
//! tokenizers appear in YAML store configuration.
//!
//! ```rust
//! use tokenize::{Tokenizer, TokenizerConfig, TokenizerKind};
//!
//! let cfg = TokenizerConfig::new(TokenizerKind::Char { n: 3, pad: Some('$') })
//!     .with_lowercase(true);
//! let tokenizer = cfg.build().unwrap();
//! assert!(tokenizer.tokenize("Oat").contains(&"oat".to_string()));
//! ```

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::ngram::{CharNgrams, WordNgrams, DEFAULT_PAD};
use crate::Tokenizer;

/// Errors raised by [`TokenizerConfig::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenizerError {
    #[error("invalid tokenizer config: n must be >= 1")]
    ZeroN,
}

/// Which n-gram family to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenizerKind {
    /// Character n-grams, optionally padded.
    Char {
        n: usize,
        #[serde(default = "default_pad")]
        pad: Option<char>,
    },
    /// Whitespace-separated word n-grams.
    Word { n: usize },
}

fn default_pad() -> Option<char> {
    Some(DEFAULT_PAD)
}

impl Default for TokenizerKind {
    fn default() -> Self {
        TokenizerKind::Word { n: 3 }
    }
}

/// Tokenizer selection plus pre-tokenization normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenizerConfig {
    #[serde(flatten)]
    pub kind: TokenizerKind,
    /// Lowercase the text (locale-free unicode lowercasing).
    #[serde(default)]
    pub lowercase: bool,
    /// Apply NFKC normalization before anything else.
    #[serde(default)]
    pub normalize_unicode: bool,
}

impl TokenizerConfig {
    pub fn new(kind: TokenizerKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    pub fn with_normalize_unicode(mut self, normalize_unicode: bool) -> Self {
        self.normalize_unicode = normalize_unicode;
        self
    }

    pub fn validate(&self) -> Result<(), TokenizerError> {
        let n = match self.kind {
            TokenizerKind::Char { n, .. } | TokenizerKind::Word { n } => n,
        };
        if n == 0 {
            return Err(TokenizerError::ZeroN);
        }
        Ok(())
    }

    /// Build the configured tokenizer.
    pub fn build(&self) -> Result<Box<dyn Tokenizer>, TokenizerError> {
        self.validate()?;
        let boxed: Box<dyn Tokenizer> = match self.kind {
            TokenizerKind::Char { n, pad } => Box::new(Normalized {
                inner: CharNgrams { n, pad },
                lowercase: self.lowercase,
                normalize_unicode: self.normalize_unicode,
            }),
            TokenizerKind::Word { n } => Box::new(Normalized {
                inner: WordNgrams { n },
                lowercase: self.lowercase,
                normalize_unicode: self.normalize_unicode,
            }),
        };
        Ok(boxed)
    }
}

/// Applies normalization before delegating to `inner`.
struct Normalized<T> {
    inner: T,
    lowercase: bool,
    normalize_unicode: bool,
}

impl<T: Tokenizer> Tokenizer for Normalized<T> {
    fn tokenize(&self, text: &str) -> Vec<String> {
        // NFKC first; it can change what lowercasing sees.
        let text: Cow<str> = if self.normalize_unicode {
            Cow::Owned(text.nfkc().collect::<String>())
        } else {
            Cow::Borrowed(text)
        };
        let text: Cow<str> = if self.lowercase {
            Cow::Owned(text.to_lowercase())
        } else {
            text
        };
        self.inner.tokenize(&text)
    }
}
