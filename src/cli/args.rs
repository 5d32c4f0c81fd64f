//! Command line argument parsing for the strata CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// strata - full-text search over bitmap-indexed segments
#[derive(Parser, Debug, Clone)]
#[command(name = "strata")]
#[command(about = "Full-text search over bitmap-indexed segments")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct StrataArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl StrataArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a new index
    Create(CreateArgs),

    /// Index documents from a JSON lines file
    Index(IndexArgs),

    /// Search an index
    Search(SearchArgs),

    /// Count matching documents
    Count(CountArgs),

    /// Delete documents by row id
    Delete(DeleteArgs),

    /// Merge all segments into one
    Merge(MergeArgs),

    /// Show index statistics
    Stats(StatsArgs),
}

/// Arguments for creating an index
#[derive(Parser, Debug, Clone)]
pub struct CreateArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Index configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Segment count that triggers a merge
    #[arg(long)]
    pub merge_threshold: Option<usize>,

    /// Docid width in bits (32 or 64)
    #[arg(long)]
    pub docid_width: Option<u8>,

    /// Merge segments on a background thread
    #[arg(long)]
    pub background_merge: bool,

    /// Tokenizer for indexed text and queries (word, whitespace, keyword)
    #[arg(long)]
    pub tokenizer: Option<String>,
}

/// Arguments for indexing documents
#[derive(Parser, Debug, Clone)]
pub struct IndexArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Document file, one `{"rowId": .., "text": ..}` object per line
    #[arg(value_name = "DOCUMENT_FILE")]
    pub document_file: PathBuf,

    /// Report progress every this many documents
    #[arg(short, long, default_value = "1000")]
    pub batch_size: usize,

    /// Don't commit after adding documents
    #[arg(long)]
    pub no_commit: bool,
}

impl IndexArgs {
    /// Check if commit should be performed
    pub fn should_commit(&self) -> bool {
        !self.no_commit
    }
}

/// Row id bounds shared by search and count.
#[derive(Parser, Debug, Clone, Default)]
pub struct RowIdRangeArgs {
    /// Smallest row id to match (inclusive)
    #[arg(long)]
    pub from_row: Option<u64>,

    /// Largest row id to match (inclusive)
    #[arg(long)]
    pub to_row: Option<u64>,
}

impl RowIdRangeArgs {
    /// The inclusive range, if either bound is given.
    pub fn range(&self) -> Option<(u64, u64)> {
        match (self.from_row, self.to_row) {
            (None, None) => None,
            (low, high) => Some((low.unwrap_or(0), high.unwrap_or(u64::MAX))),
        }
    }
}

/// Arguments for searching
#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Query string
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Maximum number of results to return
    #[arg(short, long, default_value = "10")]
    pub limit: usize,

    #[command(flatten)]
    pub rows: RowIdRangeArgs,

    /// Treat the query as a regular expression over tokens
    #[arg(long)]
    pub regex: bool,

    /// Abort the search after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

/// Arguments for counting
#[derive(Parser, Debug, Clone)]
pub struct CountArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Query string
    #[arg(value_name = "QUERY")]
    pub query: String,

    #[command(flatten)]
    pub rows: RowIdRangeArgs,

    /// Treat the query as a regular expression over tokens
    #[arg(long)]
    pub regex: bool,
}

/// Arguments for deleting documents
#[derive(Parser, Debug, Clone)]
pub struct DeleteArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Row ids to delete (comma-separated)
    #[arg(value_name = "ROW_IDS", value_delimiter = ',', required = true)]
    pub row_ids: Vec<u64>,
}

/// Arguments for merging
#[derive(Parser, Debug, Clone)]
pub struct MergeArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,
}

/// Arguments for index statistics
#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,
}

/// Output formats for CLI
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
