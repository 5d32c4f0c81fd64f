//! Scoring implementations for ranking search results.
//!
//! The executor calls a [`Scorer`] once per candidate document with the
//! statistics of every positive query term the document contains.

use std::fmt::Debug;

use crate::document::Term;
use crate::error::Result;
use crate::segment::SegmentId;

/// Statistics of one query term matched by a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedTerm<'a> {
    pub term: &'a Term,
    /// Occurrences of the term in the document.
    pub term_freq: u32,
    /// Documents of the segment containing the term, deleted ones included.
    pub doc_freq: u64,
    /// Tokens in the term's field of the document.
    pub field_length: u32,
    /// Mean field length over the segment.
    pub avg_field_length: f32,
}

/// Everything a scorer may look at for one candidate.
#[derive(Debug, Clone)]
pub struct ScoringContext<'a> {
    pub segment_id: SegmentId,
    pub segment_max_doc: u64,
    /// Local docid of the candidate.
    pub docid: u64,
    pub terms: &'a [MatchedTerm<'a>],
}

/// Trait for document scorers.
pub trait Scorer: Send + Sync + Debug {
    /// Calculate the score for a candidate.
    fn score(&self, context: &ScoringContext<'_>) -> Result<f32>;

    /// Get the name of this scorer.
    fn name(&self) -> &'static str;
}

/// Sums the term frequencies of the matched terms.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermFrequencyScorer;

impl Scorer for TermFrequencyScorer {
    fn score(&self, context: &ScoringContext<'_>) -> Result<f32> {
        Ok(context.terms.iter().map(|t| t.term_freq as f32).sum())
    }

    fn name(&self) -> &'static str {
        "term_frequency"
    }
}

/// BM25 over per-segment statistics.
#[derive(Debug, Clone)]
pub struct Bm25Scorer {
    /// Term frequency saturation.
    pub k1: f32,
    /// Field length normalization.
    pub b: f32,
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Bm25Scorer { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Scorer {
    pub fn new(k1: f32, b: f32) -> Self {
        Bm25Scorer { k1, b }
    }

    fn idf(doc_freq: u64, num_docs: u64) -> f32 {
        let n = num_docs as f32;
        let df = doc_freq as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

impl Scorer for Bm25Scorer {
    fn score(&self, context: &ScoringContext<'_>) -> Result<f32> {
        let score = context
            .terms
            .iter()
            .map(|t| {
                let tf = t.term_freq as f32;
                let norm = if t.avg_field_length > 0.0 {
                    1.0 - self.b + self.b * (t.field_length as f32 / t.avg_field_length)
                } else {
                    1.0
                };
                Self::idf(t.doc_freq, context.segment_max_doc) * tf * (self.k1 + 1.0)
                    / (tf + self.k1 * norm)
            })
            .sum();
        Ok(score)
    }

    fn name(&self) -> &'static str {
        "bm25"
    }
}
