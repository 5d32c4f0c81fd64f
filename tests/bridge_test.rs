//! The host-facing facade under concurrent use and across reopen.

use std::thread;

use strata::bridge::{SearchIndex, SearchRequestPayload};
use strata::config::IndexConfig;
use strata::error::Result;
use tempfile::TempDir;

#[test]
fn test_concurrent_searches_while_writing() -> Result<()> {
    let index = SearchIndex::in_memory(IndexConfig {
        max_in_memory_docs: 16,
        merge_threshold: 4,
        ..Default::default()
    })?;
    index.index_text(0, "seed document")?;
    index.commit()?;

    thread::scope(|scope| {
        let writer = scope.spawn(|| -> Result<()> {
            for row_id in 1..=200 {
                index.index_text(row_id, &format!("document number{row_id}"))?;
                if row_id % 50 == 0 {
                    index.commit()?;
                }
            }
            Ok(())
        });

        for _ in 0..4 {
            scope.spawn(|| {
                let mut last = 0;
                for _ in 0..50 {
                    let count = index.count_in_rowid_range("document", 0, u64::MAX, false).unwrap();
                    // Committed documents never disappear.
                    assert!(count >= last);
                    last = count;
                }
            });
        }

        writer.join().unwrap()
    })?;

    index.commit()?;
    assert_eq!(index.count_in_rowid_range("document", 0, u64::MAX, false)?, 201);
    assert!(index.current_version().len() < 16);
    Ok(())
}

#[test]
fn test_file_index_round_trip_with_background_merge() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index");

    {
        let index = SearchIndex::create(
            &path,
            IndexConfig {
                background_merge: true,
                merge_threshold: 3,
                ..Default::default()
            },
        )?;
        for row_id in 1..=6 {
            index.index_text(row_id, &format!("log line level{}", row_id % 3))?;
            index.commit()?;
        }
        index.delete_row_ids(&[6])?;
        index.close()?;
    }

    assert!(SearchIndex::create(&path, IndexConfig::default()).is_err());

    let index = SearchIndex::open(&path)?;
    let stats = index.stats();
    assert_eq!(stats.num_docs, 5);
    assert!(stats.skipped.is_empty());

    assert_eq!(index.count_in_rowid_range("level0", 0, 100, false)?, 1);
    assert_eq!(index.count_in_rowid_range("level[12]", 0, 100, true)?, 4);
    assert!(index.search_in_rowid_range("log AND line", 5, 5, false)?);
    assert!(!index.search_in_rowid_range("log", 6, 6, false)?);

    let mut payload = SearchRequestPayload::new("level1 OR level2");
    payload.limit = 2;
    let response = index.search(&payload)?;
    assert_eq!(response.total_hits, 4);
    assert_eq!(response.hits.len(), 2);
    assert!(response.degraded.is_empty());
    Ok(())
}

#[test]
fn test_open_without_index_fails() {
    let temp_dir = TempDir::new().unwrap();
    let err = SearchIndex::open(temp_dir.path().join("nothing")).unwrap_err();
    assert!(err.to_string().contains("no index"));
}
