//! Minimal text analysis for callers that hand over raw text.
//!
//! The index itself only consumes normalized tokens. The bridge and the CLI
//! receive raw text from the host, so they run it through a [`Tokenizer`]
//! first.
//!
//! # Examples
//!
//! ```
//! use strata::analysis::{Tokenizer, WordTokenizer};
//!
//! let tokens = WordTokenizer::new().tokenize("Hello, World! Café");
//! assert_eq!(tokens, vec!["hello", "world", "café"]);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::document::Document;
use crate::error::{Result, StrataError};

/// Trait for tokenizers that convert text into normalized tokens.
pub trait Tokenizer: Send + Sync + std::fmt::Debug {
    /// Split and normalize `text`. Never yields empty tokens.
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Get the name of this tokenizer (for debugging and configuration).
    fn name(&self) -> &'static str;
}

/// Splits on Unicode word boundaries (UAX #29) and lowercases.
#[derive(Clone, Debug, Default)]
pub struct WordTokenizer;

impl WordTokenizer {
    pub fn new() -> Self {
        WordTokenizer
    }
}

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .map(|word| word.to_lowercase())
            .filter(|word| !word.is_empty())
            .collect()
    }

    fn name(&self) -> &'static str {
        "word"
    }
}

/// Splits on whitespace and lowercases. Punctuation stays part of the token.
#[derive(Clone, Debug, Default)]
pub struct WhitespaceTokenizer;

impl WhitespaceTokenizer {
    pub fn new() -> Self {
        WhitespaceTokenizer
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_lowercase).collect()
    }

    fn name(&self) -> &'static str {
        "whitespace"
    }
}

/// The whole trimmed text as one lowercased token.
#[derive(Clone, Debug, Default)]
pub struct KeywordTokenizer;

impl KeywordTokenizer {
    pub fn new() -> Self {
        KeywordTokenizer
    }
}

impl Tokenizer for KeywordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            Vec::new()
        } else {
            vec![text.to_lowercase()]
        }
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

/// Tokenizer selected by an index configuration.
///
/// Stored with the committed configuration, so an index reopens with the
/// tokenizer it was built with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    #[default]
    Word,
    Whitespace,
    Keyword,
}

impl TokenizerKind {
    pub fn build(self) -> Arc<dyn Tokenizer> {
        match self {
            TokenizerKind::Word => Arc::new(WordTokenizer::new()),
            TokenizerKind::Whitespace => Arc::new(WhitespaceTokenizer::new()),
            TokenizerKind::Keyword => Arc::new(KeywordTokenizer::new()),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TokenizerKind::Word => "word",
            TokenizerKind::Whitespace => "whitespace",
            TokenizerKind::Keyword => "keyword",
        }
    }
}

impl fmt::Display for TokenizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TokenizerKind {
    type Err = StrataError;

    /// Case-insensitive; `default` is an alias of `word`.
    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "word" | "default" => Ok(TokenizerKind::Word),
            "whitespace" => Ok(TokenizerKind::Whitespace),
            "keyword" => Ok(TokenizerKind::Keyword),
            other => Err(StrataError::config(format!("unknown tokenizer: {other}"))),
        }
    }
}

/// Build a single-field document from raw text.
pub fn text_document(
    tokenizer: &dyn Tokenizer,
    row_id: Option<u64>,
    field: &str,
    text: &str,
) -> Document {
    let mut document = Document::new();
    document.row_id = row_id;
    document.add_tokens(field, tokenizer.tokenize(text));
    document
}
