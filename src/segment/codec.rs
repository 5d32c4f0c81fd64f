//! Binary segment format.
//!
//! ```text
//! magic "STRS" | format_version u32 | docid_width u8 | segment_id u64 | max_doc u64
//! | term_count u64 | (field str, token str, doc_freq u64, total_freq u64, bitmap, u32 * doc_freq)*
//! | row id presence bitmap | u64 per present row id
//! | field_count u64 | (field str, u32 * max_doc)*
//! | tombstone bitmap
//! | crc32 u32
//! ```
//!
//! All integers are little-endian and strings are a `u32` length followed by
//! UTF-8 bytes. The version is checked before the checksum so that blobs from
//! a newer writer report `UnsupportedFormat` rather than `Corrupted`.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::bitmap::{Bitmap, DocIdWidth};
use crate::document::Term;
use crate::error::{Result, StrataError};
use crate::segment::{PostingList, Segment, SegmentParts};

pub const MAGIC: &[u8; 4] = b"STRS";
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;
const CHECKSUM_LEN: usize = 4;

/// Largest `max_doc` accepted for a segment without field data, whose
/// documents are all empty and take no bytes in the blob.
const MAX_FIELDLESS_DOCS: u64 = 1 << 20;

/// Encode a segment with a snapshot of its current tombstones.
pub fn encode(segment: &Segment) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_all(MAGIC)?;
    out.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    out.write_u8(segment.width().bits())?;
    out.write_u64::<LittleEndian>(segment.id())?;
    out.write_u64::<LittleEndian>(segment.max_doc())?;

    let dictionary = segment.dictionary();
    out.write_u64::<LittleEndian>(dictionary.len() as u64)?;
    for (term, posting) in dictionary.iter() {
        let list = segment.posting(posting);
        write_str(&mut out, term.field())?;
        write_str(&mut out, term.token())?;
        out.write_u64::<LittleEndian>(posting.doc_freq)?;
        out.write_u64::<LittleEndian>(posting.total_freq)?;
        list.docids().serialize_into(&mut out)?;
        for &tf in list.freqs() {
            out.write_u32::<LittleEndian>(tf)?;
        }
    }

    let row_ids = segment.row_ids();
    let present = Bitmap::from_ids(
        segment.width(),
        row_ids
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_some())
            .map(|(docid, _)| docid as u64),
    )?;
    present.serialize_into(&mut out)?;
    for row_id in row_ids.iter().flatten() {
        out.write_u64::<LittleEndian>(*row_id)?;
    }

    let field_lengths = segment.field_lengths();
    out.write_u64::<LittleEndian>(field_lengths.len() as u64)?;
    for (field, lengths) in field_lengths {
        write_str(&mut out, field)?;
        for &length in lengths {
            out.write_u32::<LittleEndian>(length)?;
        }
    }

    segment.tombstones().serialize_into(&mut out)?;

    let checksum = crc32fast::hash(&out);
    out.write_u32::<LittleEndian>(checksum)?;
    Ok(out)
}

/// Decode a segment blob written by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Segment> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(StrataError::corrupted(format!(
            "segment blob is truncated ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[..4] != MAGIC {
        return Err(StrataError::corrupted("bad segment magic"));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(StrataError::UnsupportedFormat { version });
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(StrataError::corrupted(format!(
            "segment checksum mismatch: expected {expected:08x}, found {actual:08x}"
        )));
    }

    let mut reader = Cursor::new(&body[HEADER_LEN..]);
    let parts = read_parts(&mut reader).map_err(|e| match e {
        StrataError::Io(e) => StrataError::corrupted(format!("segment blob is truncated: {e}")),
        StrataError::Invariant(msg) => StrataError::corrupted(msg),
        other => other,
    })?;
    if reader.position() as usize != body.len() - HEADER_LEN {
        return Err(StrataError::corrupted("trailing bytes after segment body"));
    }

    Segment::from_parts(parts).map_err(|e| match e {
        StrataError::Invariant(msg) => StrataError::corrupted(msg),
        other => other,
    })
}

fn read_parts<R: Read>(reader: &mut R) -> Result<SegmentParts> {
    let bits = reader.read_u8()?;
    let width = DocIdWidth::from_bits(bits)
        .ok_or_else(|| StrataError::corrupted(format!("invalid docid width {bits}")))?;
    let id = reader.read_u64::<LittleEndian>()?;
    let max_doc = reader.read_u64::<LittleEndian>()?;

    let term_count = reader.read_u64::<LittleEndian>()?;
    let mut terms = Vec::new();
    for _ in 0..term_count {
        let field = read_str(reader)?;
        let token = read_str(reader)?;
        let term = Term::new(field, token);
        let doc_freq = reader.read_u64::<LittleEndian>()?;
        let total_freq = reader.read_u64::<LittleEndian>()?;
        let docids = read_bitmap(reader, width)?;
        if docids.cardinality() != doc_freq {
            return Err(StrataError::corrupted(format!(
                "doc_freq of '{term}' is {doc_freq} but its bitmap holds {}",
                docids.cardinality()
            )));
        }
        let freqs = (0..doc_freq)
            .map(|_| reader.read_u32::<LittleEndian>())
            .collect::<std::io::Result<Vec<u32>>>()?;
        let posting = PostingList::new(docids, freqs)?;
        if posting.total_freq() != total_freq {
            return Err(StrataError::corrupted(format!(
                "total_freq of '{term}' does not match its frequencies"
            )));
        }
        terms.push((term, posting));
    }

    let present = read_bitmap(reader, width)?;
    if present.max().is_some_and(|max| max >= max_doc) {
        return Err(StrataError::corrupted("row id beyond max_doc"));
    }
    // Vectors grow with what is actually read, never with `max_doc` alone.
    let mut present_rows = Vec::new();
    for docid in present.iter() {
        present_rows.push((docid, reader.read_u64::<LittleEndian>()?));
    }

    let field_count = reader.read_u64::<LittleEndian>()?;
    let mut field_lengths = BTreeMap::new();
    for _ in 0..field_count {
        let field = read_str(reader)?;
        let mut lengths = Vec::new();
        for _ in 0..max_doc {
            lengths.push(reader.read_u32::<LittleEndian>()?);
        }
        field_lengths.insert(field, lengths);
    }
    if field_count == 0 && max_doc > MAX_FIELDLESS_DOCS {
        return Err(StrataError::corrupted(format!(
            "max_doc {max_doc} is not backed by any field data"
        )));
    }

    let tombstones = read_bitmap(reader, width)?;

    let mut row_ids = vec![None; max_doc as usize];
    for (docid, row_id) in present_rows {
        row_ids[docid as usize] = Some(row_id);
    }

    Ok(SegmentParts {
        id,
        width,
        max_doc,
        terms,
        row_ids,
        field_lengths,
        tombstones,
    })
}

fn read_bitmap<R: Read>(reader: &mut R, width: DocIdWidth) -> Result<Bitmap> {
    let bitmap = Bitmap::deserialize_from(reader)?;
    if bitmap.width() != width {
        return Err(StrataError::corrupted(format!(
            "bitmap width {} does not match segment width {width}",
            bitmap.width()
        )));
    }
    Ok(bitmap)
}

fn write_str<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    writer.write_u32::<LittleEndian>(value.len() as u32)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_str<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(StrataError::corrupted("string is truncated"));
    }
    String::from_utf8(buf).map_err(|e| StrataError::corrupted(format!("invalid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::segment::SegmentBuilder;

    fn sample(width: DocIdWidth) -> Segment {
        let mut builder = SegmentBuilder::new(width);
        for (row_id, tokens) in [
            (Some(100), vec!["alpha", "beta"]),
            (None, vec!["beta", "beta", "gamma"]),
            (Some(102), vec!["delta"]),
        ] {
            let mut doc = Document::new();
            doc.row_id = row_id;
            doc.add_tokens("body", tokens);
            doc.add_tokens("tag", ["x"]);
            builder.add_document(&doc).unwrap();
        }
        let segment = builder.build(42).unwrap();
        segment.mark_deleted(2).unwrap();
        segment
    }

    #[test]
    fn test_roundtrip_preserves_everything() {
        for width in [DocIdWidth::U32, DocIdWidth::U64] {
            let segment = sample(width);
            let bytes = segment.serialize().unwrap();
            let decoded = Segment::open(&bytes).unwrap();

            assert_eq!(decoded.id(), 42);
            assert_eq!(decoded.width(), width);
            assert_eq!(decoded.max_doc(), 3);
            assert_eq!(decoded.tombstones(), segment.tombstones());
            assert_eq!(decoded.dictionary().len(), segment.dictionary().len());
            for (term, posting) in segment.dictionary().iter() {
                let other = decoded.dictionary().lookup(term).unwrap();
                assert_eq!(other, posting);
                assert_eq!(decoded.posting(other), segment.posting(posting));
            }
            assert_eq!(decoded.row_id(0), Some(100));
            assert_eq!(decoded.row_id(1), None);
            assert_eq!(decoded.field_length("body", 1), 3);
            assert_eq!(decoded.serialize().unwrap(), bytes);
        }
    }

    #[test]
    fn test_unknown_version() {
        let mut bytes = sample(DocIdWidth::U32).serialize().unwrap();
        bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
        match Segment::open(&bytes) {
            Err(StrataError::UnsupportedFormat { version }) => assert_eq!(version, 7),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = sample(DocIdWidth::U32).serialize().unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xff;
        assert!(matches!(Segment::open(&bytes), Err(StrataError::Corrupted(_))));
    }

    #[test]
    fn test_truncated_and_bad_magic() {
        let bytes = sample(DocIdWidth::U32).serialize().unwrap();
        assert!(matches!(Segment::open(&bytes[..6]), Err(StrataError::Corrupted(_))));
        assert!(matches!(
            Segment::open(&bytes[..bytes.len() - 1]),
            Err(StrataError::Corrupted(_))
        ));

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(Segment::open(&bad), Err(StrataError::Corrupted(_))));
    }

    /// A blob with a valid checksum around the given body.
    fn blob(max_doc: u64, field: Option<(&str, u32)>) -> Vec<u8> {
        let width = DocIdWidth::U64;
        let mut out = Vec::new();
        out.write_all(MAGIC).unwrap();
        out.write_u32::<LittleEndian>(FORMAT_VERSION).unwrap();
        out.write_u8(width.bits()).unwrap();
        out.write_u64::<LittleEndian>(7).unwrap();
        out.write_u64::<LittleEndian>(max_doc).unwrap();
        out.write_u64::<LittleEndian>(0).unwrap();
        Bitmap::new(width).serialize_into(&mut out).unwrap();
        match field {
            Some((name, lengths)) => {
                out.write_u64::<LittleEndian>(1).unwrap();
                write_str(&mut out, name).unwrap();
                for _ in 0..lengths {
                    out.write_u32::<LittleEndian>(1).unwrap();
                }
            }
            None => out.write_u64::<LittleEndian>(0).unwrap(),
        }
        Bitmap::new(width).serialize_into(&mut out).unwrap();
        let checksum = crc32fast::hash(&out);
        out.write_u32::<LittleEndian>(checksum).unwrap();
        out
    }

    #[test]
    fn test_huge_max_doc_is_rejected() {
        let decoded = Segment::open(&blob(3, Some(("body", 3)))).unwrap();
        assert_eq!(decoded.max_doc(), 3);
        assert_eq!(Segment::open(&blob(5, None)).unwrap().max_doc(), 5);

        for bytes in [blob(u64::MAX >> 1, None), blob(u64::MAX >> 1, Some(("body", 3)))] {
            assert!(matches!(Segment::open(&bytes), Err(StrataError::Corrupted(_))));
        }
    }

    #[test]
    fn test_empty_segment_roundtrip() {
        let segment = SegmentBuilder::new(DocIdWidth::U32).build(1).unwrap();
        let decoded = Segment::open(&segment.serialize().unwrap()).unwrap();
        assert_eq!(decoded.max_doc(), 0);
        assert!(decoded.dictionary().is_empty());
    }
}
