//! Reopening file-backed indexes.

use std::sync::Arc;

use strata::config::IndexConfig;
use strata::document::Document;
use strata::error::Result;
use strata::index::SegmentIndex;
use strata::query::{Query, QueryExecutor, SearchRequest};
use strata::segment::segment_file_name;
use strata::storage::Storage;
use strata::storage::file::{FileStorage, FileStorageConfig};
use strata::writer::IndexWriter;
use tempfile::TempDir;

fn file_storage(dir: &TempDir) -> Result<Arc<dyn Storage>> {
    Ok(Arc::new(FileStorage::new(FileStorageConfig::new(dir.path()))?))
}

fn doc(row_id: u64, text: &str) -> Document {
    Document::builder()
        .row_id(row_id)
        .add_tokens("text", text.split_whitespace())
        .build()
}

fn count(index: &SegmentIndex, token: &str) -> Result<u64> {
    let request = SearchRequest::new(Query::term("text", token));
    Ok(QueryExecutor::new()
        .count(&index.current_version(), &request)?
        .count)
}

#[test]
fn test_reload_keeps_documents_and_deletes() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();

    // 1. Write two segments and a delete
    {
        let index = Arc::new(SegmentIndex::open(file_storage(&temp_dir)?)?);
        let mut writer = IndexWriter::new(Arc::clone(&index), IndexConfig::default())?;
        writer.add_document(doc(1, "red apple"))?;
        writer.add_document(doc(2, "green apple"))?;
        writer.commit()?;
        writer.add_document(doc(3, "red cherry"))?;
        writer.delete_by_row_id(2)?;
        writer.close()?;
    }

    // 2. Reopen
    let index = Arc::new(SegmentIndex::open(file_storage(&temp_dir)?)?);
    assert!(index.skipped_segments().is_empty());
    let version = index.current_version();
    assert_eq!(version.len(), 2);
    assert_eq!(version.num_docs(), 2);
    assert_eq!(count(&index, "apple")?, 1);
    assert_eq!(count(&index, "red")?, 2);

    let meta = index.last_commit().unwrap();
    assert_eq!(meta.generation, version.generation());
    assert_eq!(meta.segments, version.segment_ids());

    // 3. New segments don't reuse committed ids
    let mut writer = IndexWriter::new(Arc::clone(&index), meta.config.clone())?;
    writer.add_document(doc(4, "red plum"))?;
    let version = writer.commit()?;
    let mut ids = version.segment_ids();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(count(&index, "red")?, 3);
    Ok(())
}

#[test]
fn test_uncommitted_documents_are_lost() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    {
        let index = Arc::new(SegmentIndex::open(file_storage(&temp_dir)?)?);
        let mut writer = IndexWriter::new(index, IndexConfig::default())?;
        writer.add_document(doc(1, "kept"))?;
        writer.commit()?;
        writer.add_document(doc(2, "kept"))?;
        writer.flush()?;
    }

    let index = SegmentIndex::open(file_storage(&temp_dir)?)?;
    assert_eq!(count(&index, "kept")?, 1);
    Ok(())
}

#[test]
fn test_corrupted_segment_is_skipped() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let storage = file_storage(&temp_dir)?;
    let broken = {
        let index = Arc::new(SegmentIndex::open(Arc::clone(&storage))?);
        let mut writer = IndexWriter::new(index, IndexConfig::default())?;
        writer.add_document(doc(1, "first"))?;
        writer.commit()?;
        writer.add_document(doc(2, "second"))?;
        let version = writer.commit()?;
        writer.close()?;
        version.segment_ids()[1]
    };

    storage.write_file_atomic(&segment_file_name(broken), b"not a segment")?;

    let index = SegmentIndex::open(storage)?;
    assert_eq!(index.skipped_segments().len(), 1);
    assert_eq!(index.skipped_segments()[0].segment_id, broken);
    assert_eq!(index.current_version().len(), 1);
    assert_eq!(count(&index, "first")?, 1);
    assert_eq!(count(&index, "second")?, 0);
    Ok(())
}

#[test]
fn test_missing_segment_file_fails_open() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let storage = file_storage(&temp_dir)?;
    let id = {
        let index = Arc::new(SegmentIndex::open(Arc::clone(&storage))?);
        let mut writer = IndexWriter::new(index, IndexConfig::default())?;
        writer.add_document(doc(1, "only"))?;
        let version = writer.commit()?;
        writer.close()?;
        version.segment_ids()[0]
    };

    storage.delete_file(&segment_file_name(id))?;
    assert!(SegmentIndex::open(storage).is_err());
    Ok(())
}
