//! Query model and search requests.
//!
//! A [`Query`] is an operator tree over term leaves. It is evaluated per
//! segment by the [`executor`] into a docid bitmap, scored through a
//! [`scoring::Scorer`] and ranked across segments.

pub mod executor;
pub mod parser;
pub mod scoring;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::document::Term;
use crate::segment::SegmentId;

pub use self::executor::QueryExecutor;
pub use self::parser::{QueryParser, QueryParserBuilder};
pub use self::scoring::{Bm25Scorer, MatchedTerm, Scorer, ScoringContext, TermFrequencyScorer};

/// An operator tree over term leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Query {
    /// Documents containing the term.
    Term(Term),
    /// Documents matching every child. An empty `And` matches nothing.
    And(Vec<Query>),
    /// Documents matching any child.
    Or(Vec<Query>),
    /// Live documents not matching the child.
    Not(Box<Query>),
    /// Documents containing a term of `field` whose token is in `[low, high]`.
    Range {
        field: String,
        low: String,
        high: String,
    },
    /// Documents containing a term of the same field starting with the token.
    Prefix(Term),
    /// Documents containing a term of `field` whose whole token matches
    /// `pattern`.
    Regex { field: String, pattern: String },
    /// Matches nothing.
    Empty,
}

impl Query {
    pub fn term<F: Into<String>, T: Into<String>>(field: F, token: T) -> Self {
        Query::Term(Term::new(field, token))
    }

    pub fn and(children: Vec<Query>) -> Self {
        Query::And(children)
    }

    pub fn or(children: Vec<Query>) -> Self {
        Query::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Query) -> Self {
        Query::Not(Box::new(child))
    }

    pub fn range<F, L, H>(field: F, low: L, high: H) -> Self
    where
        F: Into<String>,
        L: Into<String>,
        H: Into<String>,
    {
        Query::Range {
            field: field.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn prefix<F: Into<String>, T: Into<String>>(field: F, prefix: T) -> Self {
        Query::Prefix(Term::new(field, prefix))
    }

    pub fn regex<F: Into<String>, P: Into<String>>(field: F, pattern: P) -> Self {
        Query::Regex {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Whether the tree has no term, range, prefix or regex leaf. Such a
    /// query matches nothing, negated or not.
    pub fn is_empty(&self) -> bool {
        match self {
            Query::Empty => true,
            Query::And(children) | Query::Or(children) => children.iter().all(Query::is_empty),
            Query::Not(child) => child.is_empty(),
            Query::Term(_) | Query::Range { .. } | Query::Prefix(_) | Query::Regex { .. } => false,
        }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        match self {
            Query::And(children) | Query::Or(children) => {
                1 + children.iter().map(Query::node_count).sum::<usize>()
            }
            Query::Not(child) => 1 + child.node_count(),
            _ => 1,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, children: &[Query], op: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")
        }

        match self {
            Query::Term(term) => write!(f, "{term}"),
            Query::And(children) => join(f, children, "AND"),
            Query::Or(children) => join(f, children, "OR"),
            Query::Not(child) => write!(f, "NOT {child}"),
            Query::Range { field, low, high } => write!(f, "{field}:[{low} TO {high}]"),
            Query::Prefix(term) => write!(f, "{term}*"),
            Query::Regex { field, pattern } => write!(f, "{field}:/{pattern}/"),
            Query::Empty => write!(f, "()"),
        }
    }
}

/// Limits on how much work a query may do.
///
/// Checked between operator node evaluations. Tripping any limit aborts the
/// query with [`crate::error::StrataError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct SearchBudget {
    /// Largest candidate set a single node may produce.
    pub max_candidates: Option<u64>,
    /// Wall-clock budget for the whole query.
    pub time_budget: Option<Duration>,
    /// Set from another thread to cancel the query.
    pub cancel: Arc<AtomicBool>,
}

impl SearchBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_candidates(mut self, max_candidates: u64) -> Self {
        self.max_candidates = Some(max_candidates);
        self
    }

    pub fn with_time_budget(mut self, time_budget: Duration) -> Self {
        self.time_budget = Some(time_budget);
        self
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// A query plus result shaping.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: Query,
    /// Maximum number of hits returned.
    pub limit: usize,
    /// Inclusive row id range; documents outside it, or without a row id,
    /// do not match.
    pub row_id_range: Option<(u64, u64)>,
    pub budget: SearchBudget,
}

impl SearchRequest {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn new(query: Query) -> Self {
        SearchRequest {
            query,
            limit: Self::DEFAULT_LIMIT,
            row_id_range: None,
            budget: SearchBudget::default(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_row_id_range(mut self, low: u64, high: u64) -> Self {
        self.row_id_range = Some((low, high));
        self
    }

    pub fn with_budget(mut self, budget: SearchBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Whether `row_id` passes the row id filter.
    pub fn accepts_row_id(&self, row_id: Option<u64>) -> bool {
        match (self.row_id_range, row_id) {
            (None, _) => true,
            (Some((low, high)), Some(row_id)) => low <= row_id && row_id <= high,
            (Some(_), None) => false,
        }
    }
}

/// A ranked match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    /// Global docid within the searched version.
    pub docid: u64,
    pub score: f32,
    pub row_id: Option<u64>,
    pub segment_id: SegmentId,
}

/// A segment whose evaluation failed and which contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedSegment {
    pub segment_id: SegmentId,
    pub error: String,
}

/// Search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    /// Hits by descending score, then ascending docid.
    pub hits: Vec<Hit>,
    /// Total number of matching documents.
    pub total_hits: u64,
    pub degraded: Vec<DegradedSegment>,
}

impl SearchResults {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn max_score(&self) -> Option<f32> {
        self.hits.first().map(|hit| hit.score)
    }
}

/// Result of counting matches without scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResults {
    pub count: u64,
    pub degraded: Vec<DegradedSegment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let query = Query::and(vec![
            Query::term("body", "cat"),
            Query::not(Query::or(vec![
                Query::prefix("body", "do"),
                Query::range("year", "2000", "2010"),
            ])),
            Query::regex("body", "b.*d"),
        ]);
        assert_eq!(
            query.to_string(),
            "(body:cat AND NOT (body:do* OR year:[2000 TO 2010]) AND body:/b.*d/)"
        );
        assert_eq!(query.node_count(), 6);
    }

    #[test]
    fn test_is_empty() {
        assert!(Query::Empty.is_empty());
        assert!(Query::and(vec![]).is_empty());
        assert!(Query::or(vec![Query::Empty, Query::and(vec![])]).is_empty());
        assert!(Query::not(Query::Empty).is_empty());
        assert!(Query::not(Query::or(vec![Query::and(vec![])])).is_empty());
        assert!(!Query::term("a", "b").is_empty());
        assert!(!Query::not(Query::term("a", "b")).is_empty());
        assert!(!Query::and(vec![Query::Empty, Query::regex("a", "b.")]).is_empty());
    }

    #[test]
    fn test_row_id_filter() {
        let request = SearchRequest::new(Query::Empty).with_row_id_range(5, 7);
        assert!(request.accepts_row_id(Some(5)));
        assert!(request.accepts_row_id(Some(7)));
        assert!(!request.accepts_row_id(Some(8)));
        assert!(!request.accepts_row_id(None));
        assert!(SearchRequest::new(Query::Empty).accepts_row_id(None));
    }

    #[test]
    fn test_budget_cancel_flag_is_shared() {
        let flag = Arc::new(AtomicBool::new(false));
        let budget = SearchBudget::new().with_cancel_flag(Arc::clone(&flag));
        assert!(!budget.is_cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(budget.is_cancelled());
    }
}
