//! In-memory segment under construction.

use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};

use crate::bitmap::{Bitmap, DocIdWidth};
use crate::document::{Document, Term};
use crate::error::{Result, StrataError};
use crate::segment::{PostingList, Segment, SegmentId, SegmentParts};

/// Accumulates documents and turns them into an immutable [`Segment`].
///
/// Docids are assigned in insertion order starting at zero. Buffered
/// documents can be deleted before the segment is built; they are carried
/// into the segment as tombstones.
#[derive(Debug)]
pub struct SegmentBuilder {
    width: DocIdWidth,
    max_doc: u64,
    /// Term to `(docid, tf)` in ascending docid order.
    postings: AHashMap<Term, Vec<(u64, u32)>>,
    row_ids: Vec<Option<u64>>,
    field_lengths: AHashMap<String, Vec<u32>>,
    deleted: Bitmap,
}

impl SegmentBuilder {
    pub fn new(width: DocIdWidth) -> Self {
        SegmentBuilder {
            width,
            max_doc: 0,
            postings: AHashMap::new(),
            row_ids: Vec::new(),
            field_lengths: AHashMap::new(),
            deleted: Bitmap::new(width),
        }
    }

    /// Add a document and return its local docid.
    pub fn add_document(&mut self, document: &Document) -> Result<u64> {
        document.validate()?;
        let docid = self.max_doc;
        self.width.check(docid)?;

        let mut term_freqs: AHashMap<Term, u32> = AHashMap::new();
        let mut lengths: AHashMap<&str, u32> = AHashMap::new();
        for field in &document.fields {
            *lengths.entry(field.name.as_str()).or_default() += field.tokens.len() as u32;
            for token in &field.tokens {
                *term_freqs
                    .entry(Term::new(field.name.as_str(), token.as_str()))
                    .or_default() += 1;
            }
        }

        for (term, tf) in term_freqs {
            self.postings.entry(term).or_default().push((docid, tf));
        }
        for (field, length) in lengths {
            let column = self
                .field_lengths
                .entry(field.to_string())
                .or_insert_with(Vec::new);
            column.resize(docid as usize, 0);
            column.push(length);
        }
        self.row_ids.push(document.row_id);
        self.max_doc += 1;

        Ok(docid)
    }

    /// Number of buffered documents, deleted ones included.
    pub fn max_doc(&self) -> u64 {
        self.max_doc
    }

    /// Number of buffered documents that are not deleted.
    pub fn num_docs(&self) -> u64 {
        self.max_doc - self.deleted.cardinality()
    }

    pub fn is_empty(&self) -> bool {
        self.max_doc == 0
    }

    /// Delete buffered documents by row id; returns how many were deleted.
    pub fn delete_row_ids(&mut self, row_ids: &AHashSet<u64>) -> Result<usize> {
        let mut deleted = 0;
        for (docid, row_id) in self.row_ids.iter().enumerate() {
            if row_id.is_some_and(|r| row_ids.contains(&r)) && self.deleted.insert(docid as u64)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Delete buffered documents containing `term`.
    pub fn delete_term(&mut self, term: &Term) -> Result<usize> {
        let Some(docs) = self.postings.get(term) else {
            return Ok(0);
        };
        let mut deleted = 0;
        for &(docid, _) in docs {
            if self.deleted.insert(docid)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Freeze the buffered documents into a segment and reset the builder.
    pub fn build(&mut self, segment_id: SegmentId) -> Result<Segment> {
        let max_doc = self.max_doc;
        let mut terms: Vec<(Term, Vec<(u64, u32)>)> = std::mem::take(&mut self.postings).into_iter().collect();
        terms.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let terms = terms
            .into_iter()
            .map(|(term, docs)| {
                let docids = Bitmap::from_ids(self.width, docs.iter().map(|&(docid, _)| docid))?;
                let freqs = docs.into_iter().map(|(_, tf)| tf).collect();
                Ok((term, PostingList::new(docids, freqs)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let field_lengths: BTreeMap<String, Vec<u32>> = std::mem::take(&mut self.field_lengths)
            .into_iter()
            .map(|(field, mut lengths)| {
                lengths.resize(max_doc as usize, 0);
                (field, lengths)
            })
            .collect();

        let parts = SegmentParts {
            id: segment_id,
            width: self.width,
            max_doc,
            terms,
            row_ids: std::mem::take(&mut self.row_ids),
            field_lengths,
            tombstones: std::mem::replace(&mut self.deleted, Bitmap::new(self.width)),
        };
        self.max_doc = 0;

        Segment::from_parts(parts).map_err(|e| match e {
            StrataError::Invariant(msg) => {
                StrataError::invariant(format!("failed to build segment {segment_id}: {msg}"))
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(row_id: u64, tokens: &[&str]) -> Document {
        Document::builder()
            .row_id(row_id)
            .add_tokens("body", tokens.iter().copied())
            .build()
    }

    #[test]
    fn test_docids_are_sequential() {
        let mut builder = SegmentBuilder::new(DocIdWidth::U32);
        assert_eq!(builder.add_document(&doc(1, &["a"])).unwrap(), 0);
        assert_eq!(builder.add_document(&doc(2, &["b"])).unwrap(), 1);
        assert_eq!(builder.max_doc(), 2);

        let segment = builder.build(1).unwrap();
        assert_eq!(segment.max_doc(), 2);
        assert!(builder.is_empty());
        assert_eq!(builder.add_document(&doc(3, &["c"])).unwrap(), 0);
    }

    #[test]
    fn test_delete_buffered_by_row_id() {
        let mut builder = SegmentBuilder::new(DocIdWidth::U32);
        builder.add_document(&doc(5, &["a"])).unwrap();
        builder.add_document(&doc(6, &["a"])).unwrap();

        let row_ids: AHashSet<u64> = [6].into_iter().collect();
        assert_eq!(builder.delete_row_ids(&row_ids).unwrap(), 1);
        assert_eq!(builder.delete_row_ids(&row_ids).unwrap(), 0);
        assert_eq!(builder.num_docs(), 1);

        let segment = builder.build(2).unwrap();
        assert!(segment.is_deleted(1));
        assert_eq!(segment.num_docs(), 1);
    }

    #[test]
    fn test_delete_buffered_by_term() {
        let mut builder = SegmentBuilder::new(DocIdWidth::U32);
        builder.add_document(&doc(1, &["a", "b"])).unwrap();
        builder.add_document(&doc(2, &["b"])).unwrap();
        builder.add_document(&doc(3, &["c"])).unwrap();

        assert_eq!(builder.delete_term(&Term::new("body", "b")).unwrap(), 2);
        assert_eq!(builder.delete_term(&Term::new("body", "zzz")).unwrap(), 0);
        assert_eq!(builder.num_docs(), 1);
    }

    #[test]
    fn test_rejects_invalid_document() {
        let mut builder = SegmentBuilder::new(DocIdWidth::U32);
        let bad = Document::builder().add_tokens("", ["a"]).build();
        assert!(builder.add_document(&bad).is_err());
        assert!(builder.is_empty());
    }
}
