//! Command implementations for the strata CLI.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Instant;

use log::{info, warn};

use crate::bitmap::DocIdWidth;
use crate::bridge::{IndexDocRequest, SearchIndex, SearchRequestPayload};
use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::IndexConfig;
use crate::error::{Result, StrataError};

/// Execute a CLI command.
pub fn execute_command(args: StrataArgs) -> Result<()> {
    match &args.command {
        Command::Create(create_args) => create_index(create_args.clone(), &args),
        Command::Index(index_args) => index_documents(index_args.clone(), &args),
        Command::Search(search_args) => search_index(search_args.clone(), &args),
        Command::Count(count_args) => count_matches(count_args.clone(), &args),
        Command::Delete(delete_args) => delete_documents(delete_args.clone(), &args),
        Command::Merge(merge_args) => merge_segments(merge_args.clone(), &args),
        Command::Stats(stats_args) => show_stats(stats_args.clone(), &args),
    }
}

/// Create a new index.
fn create_index(args: CreateArgs, cli_args: &StrataArgs) -> Result<()> {
    let mut config = match &args.config_file {
        Some(path) => IndexConfig::from_json_file(path)?,
        None => IndexConfig::default(),
    };
    if let Some(threshold) = args.merge_threshold {
        config.merge_threshold = threshold;
    }
    if let Some(bits) = args.docid_width {
        config.docid_width = DocIdWidth::from_bits(bits)
            .ok_or_else(|| StrataError::config(format!("unsupported docid width: {bits}")))?;
    }
    if args.background_merge {
        config.background_merge = true;
    }
    if let Some(name) = &args.tokenizer {
        config.tokenizer = name.parse()?;
    }
    config.validate()?;

    let index = SearchIndex::create(&args.index_path, config.clone())?;
    index.close()?;

    let result = IndexCreationResult {
        path: args.index_path.display().to_string(),
        merge_threshold: config.merge_threshold,
        docid_width: config.docid_width.bits(),
        tokenizer: config.tokenizer.to_string(),
    };
    output_result("Index created successfully", &result, cli_args)
}

/// Index documents from a JSON lines file.
fn index_documents(args: IndexArgs, cli_args: &StrataArgs) -> Result<()> {
    let start = Instant::now();
    let index = SearchIndex::open(&args.index_path)?;
    let reader = BufReader::new(File::open(&args.document_file)?);

    let mut added = 0;
    let mut skipped = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: IndexDocRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("skipping line {}: {e}", line_no + 1);
                skipped += 1;
                continue;
            }
        };
        index.index_document(&request)?;
        added += 1;
        if args.batch_size > 0 && added % args.batch_size == 0 {
            info!("indexed {added} documents");
        }
    }

    if args.should_commit() {
        index.commit()?;
    }
    index.close()?;

    let elapsed = start.elapsed();
    let result = DocumentAdditionResult {
        documents_added: added,
        lines_skipped: skipped,
        committed: args.should_commit(),
        duration_ms: elapsed.as_millis() as u64,
        docs_per_second: added as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    };
    output_result("Documents indexed", &result, cli_args)
}

/// Search an index.
fn search_index(args: SearchArgs, cli_args: &StrataArgs) -> Result<()> {
    let index = SearchIndex::open(&args.index_path)?;

    let mut payload = SearchRequestPayload::new(args.query.as_str());
    payload.limit = args.limit;
    payload.row_id_range = args.rows.range();
    payload.use_regex = args.regex;
    payload.time_budget_ms = args.timeout_ms;

    let start = Instant::now();
    let response = index.search(&payload)?;
    let result = SearchOutput {
        hits: response.hits,
        total_hits: response.total_hits,
        degraded: response.degraded,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    output_result(&format!("Results for: {}", args.query), &result, cli_args)
}

/// Count matching documents.
fn count_matches(args: CountArgs, cli_args: &StrataArgs) -> Result<()> {
    let index = SearchIndex::open(&args.index_path)?;

    let mut payload = SearchRequestPayload::new(args.query.as_str());
    payload.row_id_range = args.rows.range();
    payload.use_regex = args.regex;

    let response = index.count(&payload)?;
    let result = CountOutput {
        count: response.count,
        degraded: response.degraded,
    };
    output_result(&format!("Matches for: {}", args.query), &result, cli_args)
}

/// Delete documents by row id and commit.
fn delete_documents(args: DeleteArgs, cli_args: &StrataArgs) -> Result<()> {
    let index = SearchIndex::open(&args.index_path)?;
    let deleted = index.delete_row_ids(&args.row_ids)?;
    index.commit()?;
    index.close()?;

    let result = DeleteResult {
        requested: args.row_ids.len(),
        deleted,
    };
    output_result("Documents deleted", &result, cli_args)
}

/// Merge every segment into one.
fn merge_segments(args: MergeArgs, cli_args: &StrataArgs) -> Result<()> {
    let start = Instant::now();
    let index = SearchIndex::open(&args.index_path)?;
    let segments_before = index.current_version().len();
    let merged = index.merge_all()?;
    index.commit()?;
    index.close()?;

    let result = MergeResult {
        segments_before,
        segments_after: merged.len(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    output_result("Segments merged", &result, cli_args)
}

/// Show index statistics.
fn show_stats(args: StatsArgs, cli_args: &StrataArgs) -> Result<()> {
    let index = SearchIndex::open(&args.index_path)?;
    let stats = index.stats();
    output_result(
        &format!("Index: {}", args.index_path.display()),
        &stats,
        cli_args,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::TokenizerKind;
    use clap::Parser;
    use std::io::Write;

    fn run(argv: &[&str]) -> Result<()> {
        let mut full = vec!["strata", "-q", "--format", "json"];
        full.extend_from_slice(argv);
        execute_command(StrataArgs::try_parse_from(full).unwrap())
    }

    #[test]
    fn test_create_index_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("idx");
        let index_str = index_path.to_str().unwrap();

        let docs_path = dir.path().join("docs.jsonl");
        let mut docs = File::create(&docs_path).unwrap();
        writeln!(docs, r#"{{"rowId": 1, "text": "cat dog"}}"#).unwrap();
        writeln!(docs, "not json").unwrap();
        writeln!(docs, r#"{{"rowId": 2, "text": "dog bird"}}"#).unwrap();

        run(&["create", index_str, "--merge-threshold", "4"]).unwrap();
        assert!(run(&["create", index_str]).is_err());

        run(&["index", index_str, docs_path.to_str().unwrap()]).unwrap();
        run(&["search", index_str, "dog"]).unwrap();
        run(&["delete", index_str, "2"]).unwrap();
        run(&["merge", index_str]).unwrap();
        run(&["stats", index_str]).unwrap();

        let index = SearchIndex::open(&index_path).unwrap();
        assert_eq!(index.count_in_rowid_range("dog", 0, 10, false).unwrap(), 1);
        assert_eq!(index.stats().num_docs, 1);
    }

    #[test]
    fn test_open_missing_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(run(&["stats", missing.to_str().unwrap()]).is_err());
    }

    #[test]
    fn test_create_rejects_bad_width() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("idx");
        assert!(run(&["create", index_path.to_str().unwrap(), "--docid-width", "16"]).is_err());
    }

    #[test]
    fn test_create_with_tokenizer() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("idx");
        let index_str = index_path.to_str().unwrap();

        assert!(run(&["create", index_str, "--tokenizer", "klingon"]).is_err());
        run(&["create", index_str, "--tokenizer", "whitespace"]).unwrap();

        let index = SearchIndex::open(&index_path).unwrap();
        assert_eq!(index.tokenizer_kind(), TokenizerKind::Whitespace);
        index.index_text(1, "state-of-the-art design").unwrap();
        index.commit().unwrap();
        assert_eq!(index.count_in_rowid_range("state-of-the-art", 0, 10, false).unwrap(), 1);
        assert_eq!(index.count_in_rowid_range("state", 0, 10, false).unwrap(), 0);
    }
}
