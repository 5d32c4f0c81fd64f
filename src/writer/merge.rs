//! Segment merging.
//!
//! A merge snapshots the tombstones of its inputs, assigns fresh contiguous
//! docids to the surviving documents in input order and rebuilds every
//! posting list through that mapping. Deletes that reach the inputs while the
//! merge runs are carried over to the merged segment when it is published.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rayon::prelude::*;

use crate::bitmap::{Bitmap, DocIdWidth};
use crate::document::Term;
use crate::error::{Result, StrataError};
use crate::index::IndexVersion;
use crate::segment::{PostingList, Segment, SegmentId, SegmentParts};
use crate::writer::merge_policy::MergeReason;

/// Lifecycle of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Selected, not started.
    Candidate,
    /// Running; its sources are excluded from new candidates.
    Merging,
    /// Published.
    Merged,
}

/// One merge of `sources` into `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOperation {
    pub target: SegmentId,
    pub sources: Vec<SegmentId>,
    pub reason: MergeReason,
    pub state: MergeState,
}

impl MergeOperation {
    pub fn new(target: SegmentId, sources: Vec<SegmentId>, reason: MergeReason) -> Self {
        MergeOperation {
            target,
            sources,
            reason,
            state: MergeState::Candidate,
        }
    }

    /// Move to the next state. States only advance one step at a time.
    pub fn transition(&mut self, next: MergeState) -> Result<()> {
        let allowed = matches!(
            (self.state, next),
            (MergeState::Candidate, MergeState::Merging) | (MergeState::Merging, MergeState::Merged)
        );
        if !allowed {
            return Err(StrataError::invariant(format!(
                "merge into segment {} cannot go from {:?} to {next:?}",
                self.target, self.state
            )));
        }
        self.state = next;
        Ok(())
    }
}

/// Old `(input, docid)` to new docid.
#[derive(Debug, Clone, Default)]
pub struct DocIdMap {
    inputs: Vec<Vec<Option<u64>>>,
    live: u64,
}

impl DocIdMap {
    /// Number all documents of `inputs` not in `snapshots` consecutively.
    pub fn build(inputs: &[Arc<Segment>], snapshots: &[Bitmap]) -> Self {
        let mut next = 0u64;
        let inputs = inputs
            .iter()
            .zip(snapshots)
            .map(|(segment, deleted)| {
                (0..segment.max_doc())
                    .map(|docid| {
                        if deleted.contains(docid) {
                            None
                        } else {
                            next += 1;
                            Some(next - 1)
                        }
                    })
                    .collect()
            })
            .collect();
        DocIdMap { inputs, live: next }
    }

    /// New docid of `docid` in input `input`; `None` for purged documents.
    pub fn get(&self, input: usize, docid: u64) -> Option<u64> {
        self.inputs
            .get(input)
            .and_then(|map| map.get(docid as usize))
            .copied()
            .flatten()
    }

    /// Number of documents in the merged segment.
    pub fn live(&self) -> u64 {
        self.live
    }
}

/// Result of [`merge_segments`].
#[derive(Debug)]
pub struct MergeOutput {
    /// `None` when every input document was deleted.
    pub segment: Option<Segment>,
    pub doc_id_map: DocIdMap,
    /// Input tombstones the merge purged.
    pub snapshots: Vec<Bitmap>,
}

/// Merge `inputs` into a new segment with id `target`.
///
/// Per-term work runs on the current rayon pool.
pub fn merge_segments(
    inputs: &[Arc<Segment>],
    target: SegmentId,
    width: DocIdWidth,
) -> Result<MergeOutput> {
    let snapshots: Vec<Bitmap> = inputs.iter().map(|s| s.tombstones()).collect();
    let doc_id_map = DocIdMap::build(inputs, &snapshots);
    let max_doc = doc_id_map.live();

    if max_doc == 0 {
        return Ok(MergeOutput {
            segment: None,
            doc_id_map,
            snapshots,
        });
    }
    width.check(max_doc - 1)?;

    let terms: BTreeSet<&Term> = inputs
        .iter()
        .flat_map(|segment| segment.dictionary().iter().map(|(term, _)| term))
        .collect();
    let terms: Vec<&Term> = terms.into_iter().collect();

    let merged_terms = terms
        .par_iter()
        .map(|&term| merge_term(inputs, &doc_id_map, term, width))
        .collect::<Result<Vec<_>>>()?;

    let mut row_ids = Vec::with_capacity(max_doc as usize);
    for (input, segment) in inputs.iter().enumerate() {
        for docid in 0..segment.max_doc() {
            if doc_id_map.get(input, docid).is_some() {
                row_ids.push(segment.row_id(docid));
            }
        }
    }

    let fields: BTreeSet<&String> = inputs
        .iter()
        .flat_map(|segment| segment.field_lengths().keys())
        .collect();
    let mut field_lengths = BTreeMap::new();
    for field in fields {
        let mut lengths = Vec::with_capacity(max_doc as usize);
        for (input, segment) in inputs.iter().enumerate() {
            for docid in 0..segment.max_doc() {
                if doc_id_map.get(input, docid).is_some() {
                    lengths.push(segment.field_length(field, docid));
                }
            }
        }
        field_lengths.insert(field.clone(), lengths);
    }

    let segment = Segment::from_parts(SegmentParts {
        id: target,
        width,
        max_doc,
        terms: merged_terms.into_iter().flatten().collect(),
        row_ids,
        field_lengths,
        tombstones: Bitmap::new(width),
    })?;

    Ok(MergeOutput {
        segment: Some(segment),
        doc_id_map,
        snapshots,
    })
}

fn merge_term(
    inputs: &[Arc<Segment>],
    doc_id_map: &DocIdMap,
    term: &Term,
    width: DocIdWidth,
) -> Result<Option<(Term, PostingList)>> {
    let mut docids = Vec::new();
    let mut freqs = Vec::new();
    for (input, segment) in inputs.iter().enumerate() {
        let Some(posting) = segment.dictionary().lookup(term) else {
            continue;
        };
        for (docid, tf) in segment.posting(posting).iter() {
            if let Some(new_docid) = doc_id_map.get(input, docid) {
                docids.push(new_docid);
                freqs.push(tf);
            }
        }
    }

    if docids.is_empty() {
        return Ok(None);
    }
    let docids = Bitmap::from_ids(width, docids)?;
    Ok(Some((term.clone(), PostingList::new(docids, freqs)?)))
}

/// Copy deletes that reached the inputs after their snapshot onto `merged`.
pub fn reapply_deletes(
    inputs: &[Arc<Segment>],
    snapshots: &[Bitmap],
    doc_id_map: &DocIdMap,
    merged: &Segment,
) -> Result<u64> {
    let mut late = Vec::new();
    for (input, (segment, snapshot)) in inputs.iter().zip(snapshots).enumerate() {
        for docid in segment.tombstones().difference(snapshot).iter() {
            if let Some(new_docid) = doc_id_map.get(input, docid) {
                late.push(new_docid);
            }
        }
    }
    if late.is_empty() {
        return Ok(0);
    }
    merged.mark_deleted_all(&Bitmap::from_ids(merged.width(), late)?)
}

/// Segment list of `version` with `sources` replaced by `merged`.
///
/// The merged segment takes the position of the first source.
pub fn replace_sources(
    version: &IndexVersion,
    sources: &[SegmentId],
    merged: Option<Arc<Segment>>,
) -> Result<Vec<Arc<Segment>>> {
    for id in sources {
        if version.find_segment(*id).is_none() {
            return Err(StrataError::invariant(format!(
                "merge source segment {id} is no longer live"
            )));
        }
    }

    let mut merged = merged;
    let mut segments = Vec::with_capacity(version.len());
    for segment in version.segments() {
        if sources.contains(&segment.id()) {
            if let Some(merged) = merged.take() {
                segments.push(merged);
            }
        } else {
            segments.push(Arc::clone(segment));
        }
    }
    Ok(segments)
}
