//! Term dictionary for term-to-posting lookup.
//!
//! The dictionary is a pair of parallel sorted arrays built once per segment.
//! Exact lookups are binary searches; range and prefix scans start at a
//! binary-searched position and walk forward lazily.

use std::collections::BTreeMap;

use crate::document::Term;
use crate::error::{Result, StrataError};

/// Reference from a term to its posting list in the owning segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingRef {
    /// Index of the posting list in the segment's posting table.
    pub ordinal: u32,
    /// Number of documents containing the term.
    pub doc_freq: u64,
    /// Total occurrences across all documents.
    pub total_freq: u64,
}

/// Immutable sorted mapping from [`Term`] to [`PostingRef`].
#[derive(Debug, Clone, Default)]
pub struct TermDictionary {
    /// Sorted terms.
    terms: Vec<Term>,
    /// Posting reference for each term (parallel array).
    refs: Vec<PostingRef>,
}

impl TermDictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a map of terms to posting references.
    pub fn from_map(map: BTreeMap<Term, PostingRef>) -> Self {
        let mut terms = Vec::with_capacity(map.len());
        let mut refs = Vec::with_capacity(map.len());

        for (term, posting) in map {
            terms.push(term);
            refs.push(posting);
        }

        TermDictionary { terms, refs }
    }

    /// Create from entries that must already be strictly ascending.
    pub fn from_sorted(entries: Vec<(Term, PostingRef)>) -> Result<Self> {
        let mut terms: Vec<Term> = Vec::with_capacity(entries.len());
        let mut refs = Vec::with_capacity(entries.len());
        for (term, posting) in entries {
            if terms.last().is_some_and(|prev| *prev >= term) {
                return Err(StrataError::corrupted(format!(
                    "term dictionary is not sorted at '{term}'"
                )));
            }
            terms.push(term);
            refs.push(posting);
        }
        Ok(TermDictionary { terms, refs })
    }

    /// Look up a term. A missing term is `None`, not an error.
    pub fn lookup(&self, term: &Term) -> Option<PostingRef> {
        self.terms
            .binary_search(term)
            .ok()
            .map(|index| self.refs[index])
    }

    /// Terms in `[low, high]`, ascending. Empty when `low > high`.
    pub fn range(&self, low: &Term, high: &Term) -> impl Iterator<Item = (&Term, PostingRef)> + '_ {
        let start = self.terms.partition_point(|t| t < low);
        let end = self.terms.partition_point(|t| t <= high).max(start);
        self.entries(start, end)
    }

    /// Terms of the prefix's field whose token starts with the prefix token.
    pub fn prefix(&self, prefix: &Term) -> impl Iterator<Item = (&Term, PostingRef)> + '_ {
        let start = self.terms.partition_point(|t| t < prefix);
        let end = start
            + self.terms[start..]
                .iter()
                .take_while(|t| t.has_prefix(prefix))
                .count();
        self.entries(start, end)
    }

    /// All terms of one field, ascending.
    pub fn field_terms(&self, field: &str) -> impl Iterator<Item = (&Term, PostingRef)> + '_ {
        let start = self.terms.partition_point(|t| t.field() < field);
        let end = self.terms.partition_point(|t| t.field() <= field).max(start);
        self.entries(start, end)
    }

    fn entries(&self, start: usize, end: usize) -> impl Iterator<Item = (&Term, PostingRef)> + '_ {
        self.terms[start..end]
            .iter()
            .zip(self.refs[start..end].iter().copied())
    }

    /// Get an iterator over all terms.
    pub fn iter(&self) -> impl Iterator<Item = (&Term, PostingRef)> + '_ {
        self.entries(0, self.terms.len())
    }

    /// Get the number of terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}
