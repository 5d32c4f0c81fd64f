//! Error types for the Strata library.
//!
//! All fallible operations return [`StrataError`]. The variants separate
//! retryable I/O failures from fatal format and invariant failures so that
//! callers can decide on a retry policy without inspecting messages.
//!
//! # Examples
//!
//! ```
//! use strata::error::{Result, StrataError};
//!
//! fn example_operation() -> Result<()> {
//!     Err(StrataError::invariant("docid 42 is out of range"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => assert!(e.is_fatal()),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    /// I/O errors while loading or flushing segments.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage backend errors (missing files, closed storage, ...).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A segment blob written by an unknown format version.
    #[error("Unsupported segment format version: {version}")]
    UnsupportedFormat { version: u32 },

    /// A segment blob that fails magic, checksum or structural checks.
    #[error("Corrupted segment: {0}")]
    Corrupted(String),

    /// Programming or usage error, e.g. an out-of-range docid.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Query evaluation was cancelled by its budget.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Query parsing errors.
    #[error("Query error: {0}")]
    Query(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

impl StrataError {
    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        StrataError::Storage(msg.into())
    }

    /// Create a new corruption error.
    pub fn corrupted<S: Into<String>>(msg: S) -> Self {
        StrataError::Corrupted(msg.into())
    }

    /// Create a new invariant error.
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        StrataError::Invariant(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        StrataError::Cancelled(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        StrataError::Query(msg.into())
    }

    /// Create a new parse error.
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        StrataError::Query(msg.into()) // Parse errors are treated as query errors
    }

    /// Create a new invalid config error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        StrataError::Config(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        StrataError::Other(msg.into())
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        StrataError::Storage(format!("Not found: {}", msg.into()))
    }

    /// Whether the failed operation may succeed if the caller retries it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StrataError::Io(_) | StrataError::Storage(_))
    }

    /// Whether the error is a format or invariant failure that retrying
    /// cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StrataError::UnsupportedFormat { .. }
                | StrataError::Corrupted(_)
                | StrataError::Invariant(_)
        )
    }

    /// Whether this is a query cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StrataError::Cancelled(_))
    }
}
