//! Output formatting for CLI commands.

use serde::Serialize;

use crate::bridge::IndexStats;
use crate::cli::args::{OutputFormat, StrataArgs};
use crate::error::Result;
use crate::query::{DegradedSegment, Hit};

/// A command result that can print itself for humans.
pub trait Report: Serialize {
    fn print_human(&self);
}

/// Result structure for index creation.
#[derive(Debug, Serialize)]
pub struct IndexCreationResult {
    pub path: String,
    pub merge_threshold: usize,
    pub docid_width: u8,
    pub tokenizer: String,
}

/// Result structure for document addition.
#[derive(Debug, Serialize)]
pub struct DocumentAdditionResult {
    pub documents_added: usize,
    pub lines_skipped: usize,
    pub committed: bool,
    pub duration_ms: u64,
    pub docs_per_second: f64,
}

/// Result structure for search operations.
#[derive(Debug, Serialize)]
pub struct SearchOutput {
    pub hits: Vec<Hit>,
    pub total_hits: u64,
    pub degraded: Vec<DegradedSegment>,
    pub duration_ms: u64,
}

/// Result structure for count operations.
#[derive(Debug, Serialize)]
pub struct CountOutput {
    pub count: u64,
    pub degraded: Vec<DegradedSegment>,
}

/// Result structure for deletes.
#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub requested: usize,
    pub deleted: usize,
}

/// Result structure for merges.
#[derive(Debug, Serialize)]
pub struct MergeResult {
    pub segments_before: usize,
    pub segments_after: usize,
    pub duration_ms: u64,
}

/// Output a result in the specified format.
pub fn output_result<T: Report>(message: &str, result: &T, args: &StrataArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 0 {
                println!("{message}");
                println!();
            }
            result.print_human();
            Ok(())
        }
        OutputFormat::Json => output_json(result, args),
    }
}

fn output_json<T: Serialize>(result: &T, args: &StrataArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}

fn print_degraded(degraded: &[DegradedSegment]) {
    if degraded.is_empty() {
        return;
    }
    println!();
    println!("Degraded segments:");
    for segment in degraded {
        println!("  {:016x}: {}", segment.segment_id, segment.error);
    }
}

impl Report for IndexCreationResult {
    fn print_human(&self) {
        println!("Path: {}", self.path);
        println!("Merge threshold: {}", self.merge_threshold);
        println!("Docid width: {} bits", self.docid_width);
        println!("Tokenizer: {}", self.tokenizer);
    }
}

impl Report for DocumentAdditionResult {
    fn print_human(&self) {
        println!("Documents added: {}", self.documents_added);
        if self.lines_skipped > 0 {
            println!("Lines skipped: {}", self.lines_skipped);
        }
        println!("Committed: {}", if self.committed { "yes" } else { "no" });
        println!("Time: {}ms ({:.1} docs/s)", self.duration_ms, self.docs_per_second);
    }
}

impl Report for SearchOutput {
    fn print_human(&self) {
        println!("Search Results:");
        println!("═══════════════");
        for (i, hit) in self.hits.iter().enumerate() {
            let row = hit
                .row_id
                .map_or_else(|| "-".to_string(), |row_id| row_id.to_string());
            println!(
                "{:>4}. row {row} (docid {}, segment {:016x}) score {:.3}",
                i + 1,
                hit.docid,
                hit.segment_id,
                hit.score
            );
        }
        println!();
        println!("Total hits: {}", self.total_hits);
        println!("Search time: {}ms", self.duration_ms);
        print_degraded(&self.degraded);
    }
}

impl Report for CountOutput {
    fn print_human(&self) {
        println!("Count: {}", self.count);
        print_degraded(&self.degraded);
    }
}

impl Report for DeleteResult {
    fn print_human(&self) {
        println!("Deleted {} documents for {} row ids", self.deleted, self.requested);
    }
}

impl Report for MergeResult {
    fn print_human(&self) {
        println!(
            "Segments: {} -> {} in {}ms",
            self.segments_before, self.segments_after, self.duration_ms
        );
    }
}

impl Report for IndexStats {
    fn print_human(&self) {
        println!("Index Statistics:");
        println!("════════════════");
        println!("Generation: {}", self.generation);
        println!("Live documents: {}", self.num_docs);
        println!("Documents incl. deleted: {}", self.max_doc);
        println!("Tokenizer: {}", self.tokenizer);
        println!("Segments: {}", self.segments.len());
        for segment in &self.segments {
            println!(
                "  {:016x}: {} docs, {} deleted ({:.1}%), {} terms",
                segment.segment_id,
                segment.live_docs,
                segment.deleted_docs,
                segment.deletion_ratio * 100.0,
                segment.term_count
            );
        }
        if !self.skipped.is_empty() {
            println!();
            println!("Skipped segments:");
            for skipped in &self.skipped {
                println!("  {:016x}: {}", skipped.segment_id, skipped.reason);
            }
        }
    }
}
