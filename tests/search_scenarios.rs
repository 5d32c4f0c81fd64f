//! End-to-end search scenarios over a writer, an index and an executor.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use strata::config::IndexConfig;
use strata::document::Document;
use strata::error::{Result, StrataError};
use strata::index::{IndexVersion, SegmentIndex};
use strata::query::{Query, QueryExecutor, QueryParser, SearchBudget, SearchRequest};
use strata::segment::segment_file_name;
use strata::storage::Storage;
use strata::storage::memory::{MemoryStorage, MemoryStorageConfig};
use strata::writer::IndexWriter;

fn memory_writer(config: IndexConfig) -> Result<(Arc<dyn Storage>, IndexWriter)> {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
    let index = Arc::new(SegmentIndex::with_storage(Arc::clone(&storage)));
    let writer = IndexWriter::new(index, config)?;
    Ok((storage, writer))
}

fn doc(row_id: u64, text: &str) -> Document {
    Document::builder()
        .row_id(row_id)
        .add_tokens("text", text.split_whitespace())
        .build()
}

fn rows(version: &IndexVersion, query: &str) -> Result<Vec<u64>> {
    let parser = QueryParser::new().with_default_field("text");
    let request = SearchRequest::new(parser.parse(query)?).with_limit(100);
    let results = QueryExecutor::new().search(version, &request)?;
    let mut rows: Vec<u64> = results.hits.iter().filter_map(|hit| hit.row_id).collect();
    rows.sort_unstable();
    Ok(rows)
}

#[test]
fn test_three_document_scenario() -> Result<()> {
    let (_storage, mut writer) = memory_writer(IndexConfig::default())?;
    writer.add_document(doc(1, "cat dog"))?;
    writer.add_document(doc(2, "dog bird"))?;
    writer.add_document(doc(3, "cat bird"))?;
    let version = writer.commit()?;

    assert_eq!(rows(&version, "cat")?, vec![1, 3]);
    assert_eq!(rows(&version, "cat AND dog")?, vec![1]);
    assert_eq!(rows(&version, "cat OR bird")?, vec![1, 2, 3]);
    assert_eq!(rows(&version, "NOT dog")?, vec![3]);
    assert_eq!(rows(&version, "cat -bird")?, vec![1]);
    assert!(rows(&version, "fish")?.is_empty());

    // Delete doc 3
    assert_eq!(writer.delete_by_row_id(3)?, 1);
    let version = writer.commit()?;
    assert!(rows(&version, "NOT dog")?.is_empty());
    assert_eq!(rows(&version, "cat")?, vec![1]);
    assert_eq!(version.num_docs(), 2);
    Ok(())
}

#[test]
fn test_single_document_segments_are_merged() -> Result<()> {
    let (_storage, mut writer) = memory_writer(IndexConfig {
        merge_threshold: 3,
        ..Default::default()
    })?;

    for row_id in 1..=5 {
        writer.add_document(doc(row_id, "shared"))?;
        writer.commit()?;
    }

    let version = writer.current_version();
    assert!(version.len() <= 2, "got {} segments", version.len());
    assert_eq!(version.num_docs(), 5);
    assert_eq!(rows(&version, "shared")?, vec![1, 2, 3, 4, 5]);
    assert!(writer.stats().merges_completed >= 1);
    Ok(())
}

#[test]
fn test_readers_keep_their_version() -> Result<()> {
    let (storage, mut writer) = memory_writer(IndexConfig::default())?;
    writer.add_document(doc(1, "alpha"))?;
    writer.commit()?;
    writer.add_document(doc(2, "alpha beta"))?;
    let old = writer.commit()?;
    let old_ids = old.segment_ids();
    assert_eq!(old_ids.len(), 2);

    writer.add_document(doc(3, "alpha"))?;
    writer.commit()?;
    let ids = writer.current_version().segment_ids();
    writer.merge(&ids)?;
    writer.commit()?;

    // The old handle still sees two segments and two documents.
    assert_eq!(old.len(), 2);
    assert_eq!(rows(&old, "alpha")?, vec![1, 2]);
    assert_eq!(rows(&writer.current_version(), "alpha")?, vec![1, 2, 3]);
    for id in &old_ids {
        assert!(storage.file_exists(&segment_file_name(*id)));
    }

    // Releasing the last reader frees the merged-away segments.
    let collected = writer.index().release(old);
    for id in &old_ids {
        assert!(collected.contains(id));
        assert!(!storage.file_exists(&segment_file_name(*id)));
    }
    Ok(())
}

#[test]
fn test_generation_increases_on_publish() -> Result<()> {
    let (_storage, mut writer) = memory_writer(IndexConfig::default())?;
    let first = writer.current_version().generation();
    writer.add_document(doc(1, "x"))?;
    let second = writer.commit()?.generation();
    writer.add_document(doc(2, "y"))?;
    let third = writer.commit()?.generation();
    assert!(first < second && second < third);
    Ok(())
}

#[test]
fn test_cancelled_search_returns_error() -> Result<()> {
    let (_storage, mut writer) = memory_writer(IndexConfig::default())?;
    for row_id in 0..20 {
        writer.add_document(doc(row_id, "common word"))?;
    }
    let version = writer.commit()?;

    let flag = Arc::new(AtomicBool::new(false));
    let budget = SearchBudget::new().with_cancel_flag(Arc::clone(&flag));
    budget.cancel();
    let request = SearchRequest::new(Query::term("text", "common")).with_budget(budget);
    let result = QueryExecutor::new().search(&version, &request);
    assert!(matches!(result, Err(StrataError::Cancelled(_))));

    let capped = SearchRequest::new(Query::term("text", "common"))
        .with_budget(SearchBudget::new().with_max_candidates(5));
    let result = QueryExecutor::new().count(&version, &capped);
    assert!(result.is_err_and(|e| e.is_cancelled()));

    let unlimited = SearchRequest::new(Query::term("text", "common"));
    assert_eq!(QueryExecutor::new().count(&version, &unlimited)?.count, 20);
    Ok(())
}

#[test]
fn test_row_id_range_filters_hits() -> Result<()> {
    let (_storage, mut writer) = memory_writer(IndexConfig {
        max_in_memory_docs: 4,
        ..Default::default()
    })?;
    for row_id in 100..110 {
        writer.add_document(doc(row_id, "entry"))?;
    }
    let version = writer.commit()?;
    assert!(version.len() > 1);

    let request = SearchRequest::new(Query::term("text", "entry"))
        .with_limit(100)
        .with_row_id_range(103, 106);
    let executor = QueryExecutor::new();
    let results = executor.search(&version, &request)?;
    let mut found: Vec<u64> = results.hits.iter().filter_map(|hit| hit.row_id).collect();
    found.sort_unstable();
    assert_eq!(found, vec![103, 104, 105, 106]);
    assert_eq!(executor.count(&version, &request)?.count, 4);
    assert!(executor.exists(&version, &request)?);

    let outside = SearchRequest::new(Query::term("text", "entry")).with_row_id_range(0, 99);
    assert!(!executor.exists(&version, &outside)?);
    Ok(())
}
