//! Documents and terms as handed over by the ingestion collaborator.
//!
//! Tokenization and normalization happen before a document reaches the
//! index: a [`Document`] is an ordered list of fields, each holding one or
//! more already-normalized tokens.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// A `(field, token)` pair.
///
/// Terms order lexicographically on field, then token, which is the order of
/// every term dictionary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term {
    field: String,
    token: String,
}

impl Term {
    pub fn new<F: Into<String>, T: Into<String>>(field: F, token: T) -> Self {
        Term {
            field: field.into(),
            token: token.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether this term is in the same field as `prefix` and its token
    /// starts with the prefix token.
    pub fn has_prefix(&self, prefix: &Term) -> bool {
        self.field == prefix.field && self.token.starts_with(&prefix.token)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.token)
    }
}

/// A field of a document with its tokens in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub tokens: Vec<String>,
}

/// A document ready for indexing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Host-side row identifier, used for deletes and row-id range filters.
    #[serde(default)]
    pub row_id: Option<u64>,
    pub fields: Vec<Field>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a document.
    pub fn builder() -> DocumentBuilder {
        DocumentBuilder::default()
    }

    /// Append tokens to a field, creating the field on first use.
    pub fn add_tokens<S, I, T>(&mut self, field: S, tokens: I)
    where
        S: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let name = field.into();
        let tokens = tokens.into_iter().map(Into::into);
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.tokens.extend(tokens),
            None => self.fields.push(Field {
                name,
                tokens: tokens.collect(),
            }),
        }
    }

    /// Total number of tokens across all fields.
    pub fn token_count(&self) -> usize {
        self.fields.iter().map(|f| f.tokens.len()).sum()
    }

    /// Check the ingestion contract: non-empty field names and tokens.
    pub fn validate(&self) -> Result<()> {
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(StrataError::invariant("document has a field with an empty name"));
            }
            if field.tokens.iter().any(|t| t.is_empty()) {
                return Err(StrataError::invariant(format!(
                    "field '{}' contains an empty token",
                    field.name
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`Document`].
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    pub fn row_id(mut self, row_id: u64) -> Self {
        self.document.row_id = Some(row_id);
        self
    }

    pub fn add_tokens<S, I, T>(mut self, field: S, tokens: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.document.add_tokens(field, tokens);
        self
    }

    pub fn build(self) -> Document {
        self.document
    }
}
