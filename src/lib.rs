//! # Strata
//!
//! A segmented full-text index whose posting lists are compressed bitmaps.
//!
//! ## Features
//!
//! - Immutable segments with per-segment tombstones
//! - Versioned segment sets with snapshot isolation for readers
//! - Inline or background merging driven by a merge policy
//! - Boolean, range, prefix and regex queries with pluggable scoring
//! - Search budgets, cancellation and per-segment degradation
//! - A JSON/C bridge for hosts in other languages

pub mod analysis;
pub mod bitmap;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod dictionary;
pub mod document;
pub mod error;
pub mod index;
pub mod query;
pub mod segment;
pub mod storage;
pub mod writer;

pub mod prelude {
    pub use crate::bitmap::{Bitmap, DocIdWidth};
    pub use crate::bridge::SearchIndex;
    pub use crate::config::IndexConfig;
    pub use crate::document::{Document, Term};
    pub use crate::error::{Result, StrataError};
    pub use crate::index::{SegmentIndex, VersionHandle};
    pub use crate::query::{Query, QueryExecutor, QueryParser, SearchRequest, SearchResults};
    pub use crate::writer::IndexWriter;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
