//! Immutable segments.
//!
//! A [`Segment`] owns a docid range `[0, max_doc)`, a term dictionary, the
//! posting list of every term, per-document metadata and a tombstone bitmap.
//! After a segment has been built only its tombstones change, and they only
//! grow. Segments are shared between index versions through `Arc`.

pub mod builder;
pub mod codec;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashSet;
use parking_lot::RwLock;
use serde::Serialize;

use crate::bitmap::{Bitmap, DocIdWidth};
use crate::dictionary::{PostingRef, TermDictionary};
use crate::document::Term;
use crate::error::{Result, StrataError};

pub use self::builder::SegmentBuilder;

/// Identifier of a segment, unique within an index.
pub type SegmentId = u64;

/// Storage name of a segment blob.
pub fn segment_file_name(id: SegmentId) -> String {
    format!("segment_{id:016x}.seg")
}

/// Storage name of the tombstones persisted for a segment after it was written.
pub fn tombstone_file_name(id: SegmentId) -> String {
    format!("segment_{id:016x}.del")
}

/// Docids of one term plus the term frequency of each docid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingList {
    docids: Bitmap,
    /// Aligned with `docids` in ascending docid order.
    freqs: Vec<u32>,
}

impl PostingList {
    pub fn new(docids: Bitmap, freqs: Vec<u32>) -> Result<Self> {
        if docids.cardinality() != freqs.len() as u64 {
            return Err(StrataError::invariant(format!(
                "posting list has {} docids but {} frequencies",
                docids.cardinality(),
                freqs.len()
            )));
        }
        Ok(PostingList { docids, freqs })
    }

    pub fn docids(&self) -> &Bitmap {
        &self.docids
    }

    pub fn freqs(&self) -> &[u32] {
        &self.freqs
    }

    /// Term frequency of `docid`, zero when the docid is not in the list.
    pub fn term_frequency(&self, docid: u64) -> u32 {
        if !self.docids.contains(docid) {
            return 0;
        }
        self.freqs[self.docids.rank(docid) as usize]
    }

    pub fn total_freq(&self) -> u64 {
        self.freqs.iter().map(|&f| f as u64).sum()
    }

    /// `(docid, tf)` pairs in ascending docid order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.docids.iter().zip(self.freqs.iter().copied())
    }
}

/// Everything needed to assemble a segment.
#[derive(Debug)]
pub(crate) struct SegmentParts {
    pub id: SegmentId,
    pub width: DocIdWidth,
    pub max_doc: u64,
    /// Strictly ascending by term.
    pub terms: Vec<(Term, PostingList)>,
    /// One entry per docid.
    pub row_ids: Vec<Option<u64>>,
    /// One vector of `max_doc` token counts per field.
    pub field_lengths: BTreeMap<String, Vec<u32>>,
    pub tombstones: Bitmap,
}

/// Summary of a segment, as reported by `stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentStats {
    pub segment_id: SegmentId,
    pub max_doc: u64,
    pub live_docs: u64,
    pub deleted_docs: u64,
    pub term_count: usize,
    pub deletion_ratio: f64,
}

/// An immutable segment with a growing tombstone set.
#[derive(Debug)]
pub struct Segment {
    id: SegmentId,
    width: DocIdWidth,
    max_doc: u64,
    dictionary: TermDictionary,
    postings: Vec<PostingList>,
    row_ids: Vec<Option<u64>>,
    field_lengths: BTreeMap<String, Vec<u32>>,
    tombstones: RwLock<Bitmap>,
    /// Tombstones changed since they were last persisted.
    dirty: AtomicBool,
}

impl Segment {
    /// Assemble a segment, checking that every part agrees with `max_doc`.
    pub(crate) fn from_parts(parts: SegmentParts) -> Result<Self> {
        let SegmentParts {
            id,
            width,
            max_doc,
            terms,
            row_ids,
            field_lengths,
            tombstones,
        } = parts;

        if max_doc > 0 {
            width.check(max_doc - 1)?;
        }
        if row_ids.len() as u64 != max_doc {
            return Err(StrataError::invariant(format!(
                "segment {id} has {} row ids for {max_doc} documents",
                row_ids.len()
            )));
        }
        for (field, lengths) in &field_lengths {
            if lengths.len() as u64 != max_doc {
                return Err(StrataError::invariant(format!(
                    "field '{field}' of segment {id} has {} lengths for {max_doc} documents",
                    lengths.len()
                )));
            }
        }
        if tombstones.max().is_some_and(|max| max >= max_doc) {
            return Err(StrataError::invariant(format!(
                "segment {id} has a tombstone beyond max_doc {max_doc}"
            )));
        }

        let mut entries = Vec::with_capacity(terms.len());
        let mut postings = Vec::with_capacity(terms.len());
        for (ordinal, (term, posting)) in terms.into_iter().enumerate() {
            if posting.docids.max().is_some_and(|max| max >= max_doc) {
                return Err(StrataError::invariant(format!(
                    "posting list of '{term}' in segment {id} exceeds max_doc {max_doc}"
                )));
            }
            entries.push((
                term,
                PostingRef {
                    ordinal: ordinal as u32,
                    doc_freq: posting.docids.cardinality(),
                    total_freq: posting.total_freq(),
                },
            ));
            postings.push(posting);
        }
        let dictionary = TermDictionary::from_sorted(entries)?;

        Ok(Segment {
            id,
            width,
            max_doc,
            dictionary,
            postings,
            row_ids,
            field_lengths,
            tombstones: RwLock::new(tombstones),
            dirty: AtomicBool::new(false),
        })
    }

    /// Decode a segment blob.
    ///
    /// Unknown format versions fail with `UnsupportedFormat`; bad magic,
    /// checksum or structure fail with `Corrupted`.
    pub fn open(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }

    /// Encode this segment, including a snapshot of its tombstones.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn width(&self) -> DocIdWidth {
        self.width
    }

    /// One past the largest docid.
    pub fn max_doc(&self) -> u64 {
        self.max_doc
    }

    /// Number of live (not deleted) documents.
    pub fn num_docs(&self) -> u64 {
        self.max_doc - self.deleted_count()
    }

    pub fn dictionary(&self) -> &TermDictionary {
        &self.dictionary
    }

    /// Posting list addressed by a dictionary entry of this segment.
    pub fn posting(&self, posting: PostingRef) -> &PostingList {
        &self.postings[posting.ordinal as usize]
    }

    /// Docids containing `term`, tombstones included. Empty when absent.
    pub fn postings_for(&self, term: &Term) -> Bitmap {
        match self.dictionary.lookup(term) {
            Some(posting) => self.posting(posting).docids.clone(),
            None => Bitmap::new(self.width),
        }
    }

    pub fn term_frequency(&self, term: &Term, docid: u64) -> u32 {
        self.dictionary
            .lookup(term)
            .map_or(0, |posting| self.posting(posting).term_frequency(docid))
    }

    /// `[0, max_doc)` minus tombstones.
    pub fn live_docids(&self) -> Result<Bitmap> {
        Ok(Bitmap::full(self.width, self.max_doc)?.difference(&self.tombstones.read()))
    }

    /// Tombstone `docid`. Returns `false` when it was already deleted.
    pub fn mark_deleted(&self, docid: u64) -> Result<bool> {
        if docid >= self.max_doc {
            return Err(StrataError::invariant(format!(
                "docid {docid} is outside segment {} (max_doc {})",
                self.id, self.max_doc
            )));
        }
        let inserted = self.tombstones.write().insert(docid)?;
        if inserted {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(inserted)
    }

    /// Tombstone every docid of `docids`; returns how many were newly deleted.
    pub fn mark_deleted_all(&self, docids: &Bitmap) -> Result<u64> {
        if docids.max().is_some_and(|max| max >= self.max_doc) {
            return Err(StrataError::invariant(format!(
                "tombstones exceed segment {} (max_doc {})",
                self.id, self.max_doc
            )));
        }
        let mut tombstones = self.tombstones.write();
        let before = tombstones.cardinality();
        *tombstones = tombstones.union(docids);
        let added = tombstones.cardinality() - before;
        if added > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(added)
    }

    /// Snapshot of the tombstones.
    pub fn tombstones(&self) -> Bitmap {
        self.tombstones.read().clone()
    }

    pub fn is_deleted(&self, docid: u64) -> bool {
        self.tombstones.read().contains(docid)
    }

    pub fn deleted_count(&self) -> u64 {
        self.tombstones.read().cardinality()
    }

    /// Deleted fraction of `max_doc`; zero for an empty segment.
    pub fn deletion_ratio(&self) -> f64 {
        if self.max_doc == 0 {
            return 0.0;
        }
        self.deleted_count() as f64 / self.max_doc as f64
    }

    /// Whether tombstones changed since the last [`Segment::take_dirty`].
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn row_id(&self, docid: u64) -> Option<u64> {
        self.row_ids.get(docid as usize).copied().flatten()
    }

    /// First docid carrying `row_id`.
    pub fn find_row_id(&self, row_id: u64) -> Option<u64> {
        self.row_ids
            .iter()
            .position(|r| *r == Some(row_id))
            .map(|docid| docid as u64)
    }

    /// Every docid whose row id is in `row_ids`.
    pub fn docids_for_row_ids(&self, row_ids: &AHashSet<u64>) -> Result<Bitmap> {
        let docids = self
            .row_ids
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_some_and(|r| row_ids.contains(&r)))
            .map(|(docid, _)| docid as u64);
        Bitmap::from_ids(self.width, docids)
    }

    pub(crate) fn row_ids(&self) -> &[Option<u64>] {
        &self.row_ids
    }

    /// Token count of `field` in `docid`; zero for unknown fields.
    pub fn field_length(&self, field: &str, docid: u64) -> u32 {
        self.field_lengths
            .get(field)
            .and_then(|lengths| lengths.get(docid as usize))
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn field_lengths(&self) -> &BTreeMap<String, Vec<u32>> {
        &self.field_lengths
    }

    pub fn stats(&self) -> SegmentStats {
        let deleted_docs = self.deleted_count();
        SegmentStats {
            segment_id: self.id,
            max_doc: self.max_doc,
            live_docs: self.max_doc - deleted_docs,
            deleted_docs,
            term_count: self.dictionary.len(),
            deletion_ratio: self.deletion_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn segment() -> Segment {
        let mut builder = SegmentBuilder::new(DocIdWidth::U32);
        builder
            .add_document(
                &Document::builder()
                    .row_id(10)
                    .add_tokens("body", ["cat", "dog", "cat"])
                    .build(),
            )
            .unwrap();
        builder
            .add_document(&Document::builder().row_id(11).add_tokens("body", ["dog"]).build())
            .unwrap();
        builder
            .add_document(&Document::builder().add_tokens("title", ["bird"]).build())
            .unwrap();
        builder.build(7).unwrap()
    }

    #[test]
    fn test_postings_and_frequencies() {
        let segment = segment();
        assert_eq!(segment.id(), 7);
        assert_eq!(segment.max_doc(), 3);

        let dog = Term::new("body", "dog");
        assert_eq!(segment.postings_for(&dog).iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(segment.term_frequency(&Term::new("body", "cat"), 0), 2);
        assert_eq!(segment.term_frequency(&dog, 2), 0);
        assert!(segment.postings_for(&Term::new("body", "fish")).is_empty());

        assert_eq!(segment.field_length("body", 0), 3);
        assert_eq!(segment.field_length("body", 2), 0);
        assert_eq!(segment.field_length("title", 2), 1);
        assert_eq!(segment.row_id(1), Some(11));
        assert_eq!(segment.row_id(2), None);
        assert_eq!(segment.find_row_id(11), Some(1));
    }

    #[test]
    fn test_mark_deleted_is_idempotent() {
        let segment = segment();
        assert!(segment.mark_deleted(1).unwrap());
        let before = segment.tombstones();
        assert!(!segment.mark_deleted(1).unwrap());
        assert_eq!(segment.tombstones(), before);
        assert_eq!(segment.deleted_count(), 1);
        assert_eq!(segment.num_docs(), 2);
        assert!(segment.take_dirty());
        assert!(!segment.take_dirty());
    }

    #[test]
    fn test_mark_deleted_out_of_range() {
        let segment = segment();
        let err = segment.mark_deleted(3).unwrap_err();
        assert!(matches!(err, StrataError::Invariant(_)));
        assert_eq!(segment.deleted_count(), 0);
    }

    #[test]
    fn test_live_docids_and_ratio() {
        let segment = segment();
        segment.mark_deleted(0).unwrap();
        assert_eq!(segment.live_docids().unwrap().iter().collect::<Vec<_>>(), vec![1, 2]);
        assert!((segment.deletion_ratio() - 1.0 / 3.0).abs() < 1e-9);

        let stats = segment.stats();
        assert_eq!(stats.live_docs, 2);
        assert_eq!(stats.deleted_docs, 1);
        assert_eq!(stats.term_count, 3);
    }

    #[test]
    fn test_docids_for_row_ids() {
        let segment = segment();
        let wanted: AHashSet<u64> = [11, 99].into_iter().collect();
        let docids = segment.docids_for_row_ids(&wanted).unwrap();
        assert_eq!(docids.iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(segment.mark_deleted_all(&docids).unwrap(), 1);
        assert_eq!(segment.mark_deleted_all(&docids).unwrap(), 0);
    }

    #[test]
    fn test_file_names() {
        assert_eq!(segment_file_name(255), "segment_00000000000000ff.seg");
        assert_eq!(tombstone_file_name(255), "segment_00000000000000ff.del");
    }
}
