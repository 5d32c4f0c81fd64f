//! Index configuration.
//!
//! ```
//! use strata::config::IndexConfig;
//!
//! let config = IndexConfig::from_json_str(r#"{ "mergeThreshold": 3, "docidWidth": 64 }"#).unwrap();
//! assert_eq!(config.merge_threshold, 3);
//! assert_eq!(config.max_in_memory_docs, 10_000);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::analysis::TokenizerKind;
use crate::bitmap::DocIdWidth;
use crate::error::{Result, StrataError};

/// Configuration for index creation and management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Segment count above which all segments are merged.
    pub merge_threshold: usize,

    /// Deletion ratio above which a segment is merged on its own.
    pub tombstone_ratio: f64,

    /// Buffered documents that trigger an automatic flush.
    pub max_in_memory_docs: usize,

    /// Width of document ids, 32 or 64 bits.
    pub docid_width: DocIdWidth,

    /// Run merges on a background worker instead of inline in `commit`.
    pub background_merge: bool,

    /// Threads used for per-term merge work and parallel segment evaluation.
    pub merge_threads: usize,

    /// Tokenizer for raw text, applied both when indexing and to query values.
    pub tokenizer: TokenizerKind,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            merge_threshold: 8,
            tombstone_ratio: 0.3,
            max_in_memory_docs: 10_000,
            docid_width: DocIdWidth::U32,
            background_merge: false,
            merge_threads: num_cpus::get(),
            tokenizer: TokenizerKind::Word,
        }
    }
}

impl IndexConfig {
    /// Parse and validate a JSON configuration. Missing keys take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: IndexConfig = serde_json::from_str(json)
            .map_err(|e| StrataError::config(format!("invalid index configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StrataError::config(format!(
                "failed to read configuration {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.merge_threshold == 0 {
            return Err(StrataError::config("mergeThreshold must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.tombstone_ratio) {
            return Err(StrataError::config(format!(
                "tombstoneRatio must be within [0, 1], got {}",
                self.tombstone_ratio
            )));
        }
        if self.max_in_memory_docs == 0 {
            return Err(StrataError::config("maxInMemoryDocs must be at least 1"));
        }
        if self.merge_threads == 0 {
            return Err(StrataError::config("mergeThreads must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.merge_threshold, 8);
        assert_eq!(config.tombstone_ratio, 0.3);
        assert_eq!(config.max_in_memory_docs, 10_000);
        assert_eq!(config.docid_width, DocIdWidth::U32);
        assert!(!config.background_merge);
        assert!(config.merge_threads >= 1);
        assert_eq!(config.tokenizer, TokenizerKind::Word);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = IndexConfig {
            merge_threshold: 3,
            docid_width: DocIdWidth::U64,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert!(json.contains("\"mergeThreshold\": 3"));
        assert!(json.contains("\"docidWidth\": 64"));
        assert_eq!(IndexConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_tokenizer_selection() {
        let config = IndexConfig::from_json_str(r#"{ "tokenizer": "whitespace" }"#).unwrap();
        assert_eq!(config.tokenizer, TokenizerKind::Whitespace);
        assert!(config.to_json().unwrap().contains("\"tokenizer\": \"whitespace\""));
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = IndexConfig::from_json_str(r#"{ "tombstoneRatio": 1.5 }"#).unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));

        assert!(IndexConfig::from_json_str(r#"{ "mergeThreshold": 0 }"#).is_err());
        assert!(IndexConfig::from_json_str(r#"{ "docidWidth": 16 }"#).is_err());
        assert!(IndexConfig::from_json_str(r#"{ "unknownKey": 1 }"#).is_err());
        assert!(IndexConfig::from_json_str(r#"{ "tokenizer": "klingon" }"#).is_err());
    }
}
