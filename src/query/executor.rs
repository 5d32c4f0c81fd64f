//! Query evaluation against an index version.
//!
//! Each segment evaluates the operator tree into a docid bitmap on its own.
//! Results of all segments are translated to global docids, ranked by
//! descending score and then ascending docid, and truncated to the limit.
//! A segment that fails is reported as degraded and contributes nothing; a
//! cancelled query fails as a whole.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use log::{debug, warn};
use rayon::prelude::*;
use regex::Regex;

use crate::bitmap::Bitmap;
use crate::dictionary::PostingRef;
use crate::document::Term;
use crate::error::{Result, StrataError};
use crate::index::IndexVersion;
use crate::query::scoring::{MatchedTerm, Scorer, ScoringContext, TermFrequencyScorer};
use crate::query::{
    CountResults, DegradedSegment, Hit, Query, SearchBudget, SearchRequest, SearchResults,
};
use crate::segment::{Segment, SegmentId};

/// Evaluates queries against index versions.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    scorer: Arc<dyn Scorer>,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExecutor {
    /// An executor scoring with [`TermFrequencyScorer`].
    pub fn new() -> Self {
        Self::with_scorer(Arc::new(TermFrequencyScorer))
    }

    pub fn with_scorer(scorer: Arc<dyn Scorer>) -> Self {
        QueryExecutor { scorer }
    }

    pub fn scorer(&self) -> &Arc<dyn Scorer> {
        &self.scorer
    }

    /// Ranked hits for `request` on `version`.
    pub fn search(&self, version: &IndexVersion, request: &SearchRequest) -> Result<SearchResults> {
        let plan = Plan::compile(&request.query, &request.budget)?;
        if request.query.is_empty() || version.is_empty() {
            return Ok(SearchResults::default());
        }

        let outcomes = self.evaluate_all(version, &plan, request, Some(request.limit));
        let (matches, degraded) = split_outcomes(outcomes)?;

        let total_hits = matches.iter().map(|m| m.count).sum();
        let mut hits: Vec<Hit> = matches.into_iter().flat_map(|m| m.hits).collect();
        hits.sort_by(rank_order);
        hits.truncate(request.limit);

        debug!(
            "query {} matched {total_hits} documents in generation {}",
            request.query,
            version.generation()
        );
        Ok(SearchResults {
            hits,
            total_hits,
            degraded,
        })
    }

    /// Number of documents matching `request`, without scoring.
    pub fn count(&self, version: &IndexVersion, request: &SearchRequest) -> Result<CountResults> {
        let plan = Plan::compile(&request.query, &request.budget)?;
        if request.query.is_empty() || version.is_empty() {
            return Ok(CountResults::default());
        }

        let outcomes = self.evaluate_all(version, &plan, request, None);
        let (matches, degraded) = split_outcomes(outcomes)?;
        Ok(CountResults {
            count: matches.iter().map(|m| m.count).sum(),
            degraded,
        })
    }

    /// Whether any document matches `request`.
    ///
    /// Segments are visited in order and the first match stops the search.
    /// Degraded segments count as having no match.
    pub fn exists(&self, version: &IndexVersion, request: &SearchRequest) -> Result<bool> {
        let plan = Plan::compile(&request.query, &request.budget)?;
        if request.query.is_empty() {
            return Ok(false);
        }

        for (index, segment) in version.segments().iter().enumerate() {
            let base = version.segment_base(index);
            match self.evaluate_segment(&plan, request, segment, base, None) {
                Ok(matches) if matches.count > 0 => return Ok(true),
                Ok(_) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!("segment {} skipped while probing: {e}", segment.id()),
            }
        }
        Ok(false)
    }

    fn evaluate_all(
        &self,
        version: &IndexVersion,
        plan: &Plan<'_>,
        request: &SearchRequest,
        limit: Option<usize>,
    ) -> Vec<(SegmentId, Result<SegmentMatches>)> {
        let evaluate = |(index, segment): (usize, &Arc<Segment>)| {
            let base = version.segment_base(index);
            (
                segment.id(),
                self.evaluate_segment(plan, request, segment, base, limit),
            )
        };

        if version.len() > 1 {
            version.segments().par_iter().enumerate().map(evaluate).collect()
        } else {
            version.segments().iter().enumerate().map(evaluate).collect()
        }
    }

    /// Matches of one segment. With a limit, the best `limit` hits are
    /// scored and kept; without one, matches are only counted.
    fn evaluate_segment(
        &self,
        plan: &Plan<'_>,
        request: &SearchRequest,
        segment: &Segment,
        base: u64,
        limit: Option<usize>,
    ) -> Result<SegmentMatches> {
        let mut evaluator = SegmentEvaluator::new(plan, segment);
        let candidates = evaluator.eval(plan.query, true)?;
        let mut matched = evaluator.matched;
        matched.sort_by(|a, b| a.0.cmp(b.0));
        matched.dedup_by(|a, b| a.0 == b.0);

        let avg_lengths: AHashMap<&str, f32> = matched
            .iter()
            .map(|(term, _)| (term.field(), average_field_length(segment, term.field())))
            .collect();

        let mut count = 0u64;
        let mut hits = Vec::new();
        let mut terms = Vec::with_capacity(matched.len());
        for docid in candidates.iter() {
            let row_id = segment.row_id(docid);
            if !request.accepts_row_id(row_id) {
                continue;
            }
            count += 1;
            if limit.is_none() {
                continue;
            }

            terms.clear();
            for &(term, posting) in &matched {
                let term_freq = segment.posting(posting).term_frequency(docid);
                if term_freq > 0 {
                    terms.push(MatchedTerm {
                        term,
                        term_freq,
                        doc_freq: posting.doc_freq,
                        field_length: segment.field_length(term.field(), docid),
                        avg_field_length: avg_lengths.get(term.field()).copied().unwrap_or(0.0),
                    });
                }
            }
            let score = self.scorer.score(&ScoringContext {
                segment_id: segment.id(),
                segment_max_doc: segment.max_doc(),
                docid,
                terms: &terms,
            })?;
            hits.push(Hit {
                docid: base + docid,
                score,
                row_id,
                segment_id: segment.id(),
            });
        }

        if let Some(limit) = limit {
            hits.sort_by(rank_order);
            hits.truncate(limit);
        }
        Ok(SegmentMatches { hits, count })
    }
}

/// Descending score, then ascending global docid.
fn rank_order(a: &Hit, b: &Hit) -> Ordering {
    b.score.total_cmp(&a.score).then(a.docid.cmp(&b.docid))
}

fn average_field_length(segment: &Segment, field: &str) -> f32 {
    match segment.field_lengths().get(field) {
        Some(lengths) if !lengths.is_empty() => {
            lengths.iter().map(|&l| l as u64).sum::<u64>() as f32 / lengths.len() as f32
        }
        _ => 0.0,
    }
}

fn split_outcomes(
    outcomes: Vec<(SegmentId, Result<SegmentMatches>)>,
) -> Result<(Vec<SegmentMatches>, Vec<DegradedSegment>)> {
    let mut matches = Vec::with_capacity(outcomes.len());
    let mut degraded = Vec::new();
    for (segment_id, outcome) in outcomes {
        match outcome {
            Ok(m) => matches.push(m),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!("segment {segment_id} degraded: {e}");
                degraded.push(DegradedSegment {
                    segment_id,
                    error: e.to_string(),
                });
            }
        }
    }
    Ok((matches, degraded))
}

#[derive(Debug, Default)]
struct SegmentMatches {
    hits: Vec<Hit>,
    count: u64,
}

/// A query ready to run: regexes compiled and the clock started.
struct Plan<'a> {
    query: &'a Query,
    budget: &'a SearchBudget,
    regexes: AHashMap<&'a str, Regex>,
    started: Instant,
}

impl<'a> Plan<'a> {
    fn compile(query: &'a Query, budget: &'a SearchBudget) -> Result<Self> {
        let mut regexes = AHashMap::new();
        collect_regexes(query, &mut regexes)?;
        Ok(Plan {
            query,
            budget,
            regexes,
            started: Instant::now(),
        })
    }

    fn regex(&self, pattern: &str) -> Result<&Regex> {
        self.regexes
            .get(pattern)
            .ok_or_else(|| StrataError::invariant(format!("regex /{pattern}/ was not compiled")))
    }

    /// Fails once the query was cancelled or ran out of time.
    fn check_budget(&self) -> Result<()> {
        if self.budget.is_cancelled() {
            return Err(StrataError::cancelled("query was cancelled"));
        }
        if let Some(time_budget) = self.budget.time_budget
            && self.started.elapsed() >= time_budget
        {
            return Err(StrataError::cancelled(format!(
                "query exceeded its time budget of {time_budget:?}"
            )));
        }
        Ok(())
    }

    fn check_candidates(&self, candidates: u64) -> Result<()> {
        match self.budget.max_candidates {
            Some(max) if candidates > max => Err(StrataError::cancelled(format!(
                "query produced {candidates} candidates, more than the limit of {max}"
            ))),
            _ => Ok(()),
        }
    }
}

fn collect_regexes<'a>(query: &'a Query, regexes: &mut AHashMap<&'a str, Regex>) -> Result<()> {
    match query {
        Query::Regex { pattern, .. } => {
            if !regexes.contains_key(pattern.as_str()) {
                let regex = Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|e| StrataError::query(format!("invalid regex /{pattern}/: {e}")))?;
                regexes.insert(pattern.as_str(), regex);
            }
        }
        Query::And(children) | Query::Or(children) => {
            for child in children {
                collect_regexes(child, regexes)?;
            }
        }
        Query::Not(child) => collect_regexes(child, regexes)?,
        _ => {}
    }
    Ok(())
}

/// Evaluation state of one segment.
struct SegmentEvaluator<'a> {
    plan: &'a Plan<'a>,
    segment: &'a Segment,
    /// Taken once so every node sees the same deletes.
    tombstones: Bitmap,
    live: Option<Bitmap>,
    /// Dictionary entries of the terms that count towards the score.
    matched: Vec<(&'a Term, PostingRef)>,
}

impl<'a> SegmentEvaluator<'a> {
    fn new(plan: &'a Plan<'a>, segment: &'a Segment) -> Self {
        SegmentEvaluator {
            plan,
            segment,
            tombstones: segment.tombstones(),
            live: None,
            matched: Vec::new(),
        }
    }

    /// Docids matching `query`, tombstones removed. Terms under an odd
    /// number of `Not`s are not `positive` and do not score.
    fn eval(&mut self, query: &'a Query, positive: bool) -> Result<Bitmap> {
        self.plan.check_budget()?;
        let segment = self.segment;
        let width = segment.width();

        let result = match query {
            Query::Term(term) => match segment.dictionary().lookup(term) {
                Some(posting) => {
                    if positive {
                        self.matched.push((term, posting));
                    }
                    segment.posting(posting).docids().clone()
                }
                None => Bitmap::new(width),
            },
            Query::And(children) => {
                let mut children = children.iter();
                match children.next() {
                    None => Bitmap::new(width),
                    Some(first) => {
                        let mut acc = self.eval(first, positive)?;
                        for child in children {
                            if acc.is_empty() {
                                break;
                            }
                            acc = acc.intersect(&self.eval(child, positive)?);
                        }
                        acc
                    }
                }
            }
            Query::Or(children) => {
                let mut acc = Bitmap::new(width);
                for child in children {
                    acc = acc.union(&self.eval(child, positive)?);
                }
                acc
            }
            Query::Not(child) => {
                let excluded = self.eval(child, !positive)?;
                let live = match self.live.take() {
                    Some(live) => live,
                    None => Bitmap::full(width, segment.max_doc())?.difference(&self.tombstones),
                };
                let result = live.difference(&excluded);
                self.live = Some(live);
                result
            }
            Query::Range { field, low, high } => {
                let (low, high) = (Term::new(field, low), Term::new(field, high));
                self.union_terms(segment.dictionary().range(&low, &high), positive)
            }
            Query::Prefix(prefix) => self.union_terms(segment.dictionary().prefix(prefix), positive),
            Query::Regex { field, pattern } => {
                let plan = self.plan;
                let regex = plan.regex(pattern)?;
                let entries = segment
                    .dictionary()
                    .field_terms(field)
                    .filter(|(term, _)| regex.is_match(term.token()));
                self.union_terms(entries, positive)
            }
            Query::Empty => Bitmap::new(width),
        };

        let result = result.difference(&self.tombstones);
        self.plan.check_candidates(result.cardinality())?;
        Ok(result)
    }

    fn union_terms<I>(&mut self, entries: I, positive: bool) -> Bitmap
    where
        I: Iterator<Item = (&'a Term, PostingRef)>,
    {
        let mut acc = Bitmap::new(self.segment.width());
        for (term, posting) in entries {
            if positive {
                self.matched.push((term, posting));
            }
            acc = acc.union(self.segment.posting(posting).docids());
        }
        acc
    }
}
