//! Data-only surface for hosts in other languages.
//!
//! [`SearchIndex`] bundles an index, its writer and a query executor behind
//! methods that take and return plain request/response structs. The C ABI
//! in [`ffi`] exchanges those structs as JSON; Rust callers can use the
//! facade directly.

pub mod ffi;

use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::analysis::{Tokenizer, TokenizerKind, text_document};
use crate::config::IndexConfig;
use crate::document::Document;
use crate::error::{Result, StrataError};
use crate::index::{META_FILE_NAME, SegmentIndex, SkippedSegment, VersionHandle};
use crate::query::{
    DegradedSegment, Hit, Query, QueryExecutor, QueryParser, SearchBudget, SearchRequest,
};
use crate::segment::SegmentStats;
use crate::storage::file::{FileStorage, FileStorageConfig};
use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};
use crate::storage::Storage;
use crate::writer::IndexWriter;

/// Field that raw text is indexed into and queried from.
pub const DEFAULT_FIELD: &str = "text";

/// A document to index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocRequest {
    pub row_id: u64,
    pub text: String,
}

fn default_limit() -> usize {
    SearchRequest::DEFAULT_LIMIT
}

/// A search as sent by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequestPayload {
    /// Query string, or a regular expression when `use_regex` is set.
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Inclusive row id bounds.
    #[serde(default)]
    pub row_id_range: Option<(u64, u64)>,
    /// Match `query` as a regular expression against whole tokens.
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default)]
    pub max_candidates: Option<u64>,
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
}

impl SearchRequestPayload {
    pub fn new<S: Into<String>>(query: S) -> Self {
        SearchRequestPayload {
            query: query.into(),
            limit: default_limit(),
            row_id_range: None,
            use_regex: false,
            max_candidates: None,
            time_budget_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
    pub total_hits: u64,
    pub degraded: Vec<DegradedSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub count: u64,
    pub degraded: Vec<DegradedSegment>,
}

/// Index summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub generation: u64,
    pub num_docs: u64,
    pub max_doc: u64,
    pub tokenizer: TokenizerKind,
    pub segments: Vec<SegmentStats>,
    pub skipped: Vec<SkippedSegment>,
}

/// Envelope of every JSON answer crossing the C ABI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct BridgeResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    /// Whether the caller may retry the failed operation.
    #[serde(default)]
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<T>,
}

impl<T> BridgeResponse<T> {
    pub fn ok(data: T) -> Self {
        BridgeResponse {
            ok: true,
            error: None,
            retryable: false,
            data: Some(data),
        }
    }

    pub fn error(error: &StrataError) -> Self {
        BridgeResponse {
            ok: false,
            error: Some(error.to_string()),
            retryable: error.is_retryable(),
            data: None,
        }
    }
}

impl<T> From<Result<T>> for BridgeResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => BridgeResponse::ok(data),
            Err(e) => BridgeResponse::error(&e),
        }
    }
}

impl<T: Serialize> BridgeResponse<T> {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({
                "ok": false,
                "error": format!("failed to serialize response: {e}"),
                "retryable": false,
            })
            .to_string()
        })
    }
}

/// An index with its writer, searchable from any thread.
#[derive(Debug)]
pub struct SearchIndex {
    index: Arc<SegmentIndex>,
    /// `None` once closed.
    writer: Mutex<Option<IndexWriter>>,
    executor: QueryExecutor,
    parser: QueryParser,
    tokenizer_kind: TokenizerKind,
    tokenizer: Arc<dyn Tokenizer>,
}

impl SearchIndex {
    /// Create a new index in `dir`. Fails if `dir` already holds one.
    pub fn create<P: AsRef<Path>>(dir: P, config: IndexConfig) -> Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(FileStorageConfig::new(&dir))?);
        if storage.file_exists(META_FILE_NAME) {
            return Err(StrataError::config(format!(
                "an index already exists in {}",
                dir.as_ref().display()
            )));
        }
        let search_index = Self::with_storage(storage, config)?;
        // An empty commit marks the directory as an index.
        search_index.commit()?;
        info!("created index in {}", dir.as_ref().display());
        Ok(search_index)
    }

    /// Open the index in `dir` with the configuration of its last commit.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(FileStorageConfig::new(&dir))?);
        if !storage.file_exists(META_FILE_NAME) {
            return Err(StrataError::not_found(format!(
                "no index in {}",
                dir.as_ref().display()
            )));
        }
        Self::open_storage(storage)
    }

    /// Open whatever `storage` holds, using the committed configuration.
    pub fn open_storage(storage: Arc<dyn Storage>) -> Result<Self> {
        let index = SegmentIndex::open(storage)?;
        let config = index
            .last_commit()
            .map(|meta| meta.config)
            .unwrap_or_default();
        Self::from_index(Arc::new(index), config)
    }

    /// An index kept entirely in memory.
    pub fn in_memory(config: IndexConfig) -> Result<Self> {
        let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        Self::with_storage(storage, config)
    }

    fn with_storage(storage: Arc<dyn Storage>, config: IndexConfig) -> Result<Self> {
        Self::from_index(Arc::new(SegmentIndex::with_storage(storage)), config)
    }

    fn from_index(index: Arc<SegmentIndex>, config: IndexConfig) -> Result<Self> {
        let tokenizer_kind = config.tokenizer;
        let tokenizer = tokenizer_kind.build();
        let writer = IndexWriter::new(Arc::clone(&index), config)?;
        Ok(SearchIndex {
            index,
            writer: Mutex::new(Some(writer)),
            executor: QueryExecutor::new(),
            parser: QueryParser::new()
                .with_default_field(DEFAULT_FIELD)
                .with_tokenizer(Arc::clone(&tokenizer)),
            tokenizer_kind,
            tokenizer,
        })
    }

    /// Tokenizer applied to indexed text and to query values.
    pub fn tokenizer_kind(&self) -> TokenizerKind {
        self.tokenizer_kind
    }

    /// Use `executor` for searches.
    pub fn with_executor(mut self, executor: QueryExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn index(&self) -> &Arc<SegmentIndex> {
        &self.index
    }

    pub fn current_version(&self) -> VersionHandle {
        self.index.current_version()
    }

    fn with_writer<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut IndexWriter) -> Result<T>,
    {
        let mut writer = self.writer.lock();
        match writer.as_mut() {
            Some(writer) => f(writer),
            None => Err(StrataError::invariant("index is closed")),
        }
    }

    /// Tokenize `text` into the default field and buffer it.
    pub fn index_text(&self, row_id: u64, text: &str) -> Result<u64> {
        let document = text_document(self.tokenizer.as_ref(), Some(row_id), DEFAULT_FIELD, text);
        if document.token_count() == 0 {
            debug!("row {row_id} has no tokens and is not indexed");
            return self.with_writer(|writer| Ok(writer.opstamp()));
        }
        self.add_document(document)
    }

    pub fn index_document(&self, request: &IndexDocRequest) -> Result<u64> {
        self.index_text(request.row_id, &request.text)
    }

    /// Buffer an already tokenized document.
    pub fn add_document(&self, document: Document) -> Result<u64> {
        self.with_writer(|writer| writer.add_document(document))
    }

    pub fn delete_row_ids(&self, row_ids: &[u64]) -> Result<usize> {
        self.with_writer(|writer| writer.delete_by_row_ids(row_ids))
    }

    /// Commit and return the committed generation.
    pub fn commit(&self) -> Result<u64> {
        self.with_writer(|writer| writer.commit().map(|version| version.generation()))
    }

    /// Merge every live segment into one.
    pub fn merge_all(&self) -> Result<VersionHandle> {
        self.with_writer(|writer| {
            let ids = writer.current_version().segment_ids();
            if ids.len() < 2 {
                return Ok(writer.current_version());
            }
            writer.merge(&ids)
        })
    }

    /// Build the query for a host query string.
    ///
    /// Term values are split by the index tokenizer, so searching for the
    /// text that was indexed finds it.
    pub fn build_query(&self, query: &str, use_regex: bool) -> Result<Query> {
        if use_regex {
            Ok(Query::regex(DEFAULT_FIELD, query))
        } else {
            self.parser.parse(query)
        }
    }

    fn request(&self, payload: &SearchRequestPayload) -> Result<SearchRequest> {
        let mut budget = SearchBudget::new();
        budget.max_candidates = payload.max_candidates;
        budget.time_budget = payload.time_budget_ms.map(std::time::Duration::from_millis);

        let mut request = SearchRequest::new(self.build_query(&payload.query, payload.use_regex)?)
            .with_limit(payload.limit)
            .with_budget(budget);
        request.row_id_range = payload.row_id_range;
        Ok(request)
    }

    /// Search the current version.
    pub fn search(&self, payload: &SearchRequestPayload) -> Result<SearchResponse> {
        let request = self.request(payload)?;
        let version = self.index.current_version();
        let results = self.executor.search(&version, &request)?;
        Ok(SearchResponse {
            hits: results.hits,
            total_hits: results.total_hits,
            degraded: results.degraded,
        })
    }

    /// Count matches of the current version, without scoring.
    pub fn count(&self, payload: &SearchRequestPayload) -> Result<CountResponse> {
        let request = self.request(payload)?;
        let version = self.index.current_version();
        let results = self.executor.count(&version, &request)?;
        Ok(CountResponse {
            count: results.count,
            degraded: results.degraded,
        })
    }

    /// Number of documents with a row id in `[low, high]` matching `query`.
    pub fn count_in_rowid_range(&self, query: &str, low: u64, high: u64, use_regex: bool) -> Result<u64> {
        let mut payload = SearchRequestPayload::new(query);
        payload.row_id_range = Some((low, high));
        payload.use_regex = use_regex;
        Ok(self.count(&payload)?.count)
    }

    /// Whether a document with a row id in `[low, high]` matches `query`.
    pub fn search_in_rowid_range(&self, query: &str, low: u64, high: u64, use_regex: bool) -> Result<bool> {
        let request = SearchRequest::new(self.build_query(query, use_regex)?).with_row_id_range(low, high);
        let version = self.index.current_version();
        self.executor.exists(&version, &request)
    }

    pub fn stats(&self) -> IndexStats {
        let version = self.index.current_version();
        IndexStats {
            generation: version.generation(),
            num_docs: version.num_docs(),
            max_doc: version.max_doc(),
            tokenizer: self.tokenizer_kind,
            segments: version.stats(),
            skipped: self.index.skipped_segments().to_vec(),
        }
    }

    /// Wait for merges, commit and release the writer. Searching keeps
    /// working; writes fail afterwards.
    pub fn close(&self) -> Result<()> {
        let Some(mut writer) = self.writer.lock().take() else {
            return Ok(());
        };
        writer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SearchIndex {
        let search_index = SearchIndex::in_memory(IndexConfig::default()).unwrap();
        for (row_id, text) in [(1, "Cat and dog"), (2, "dog, bird"), (3, "CAT bird")] {
            search_index.index_text(row_id, text).unwrap();
        }
        search_index.commit().unwrap();
        search_index
    }

    #[test]
    fn test_search_and_count() {
        let search_index = index();
        let response = search_index.search(&SearchRequestPayload::new("cat")).unwrap();
        assert_eq!(response.total_hits, 2);

        let mut payload = SearchRequestPayload::new("cat OR bird");
        payload.row_id_range = Some((2, 3));
        assert_eq!(search_index.count(&payload).unwrap().count, 2);

        assert_eq!(search_index.count_in_rowid_range("cat", 2, 3, false).unwrap(), 1);
        assert!(search_index.search_in_rowid_range("b.*d", 1, 2, true).unwrap());
        assert!(!search_index.search_in_rowid_range("b.*d", 1, 1, true).unwrap());
    }

    #[test]
    fn test_delete_and_stats() {
        let search_index = index();
        assert_eq!(search_index.delete_row_ids(&[3, 99]).unwrap(), 1);
        assert_eq!(search_index.count_in_rowid_range("cat", 0, 10, false).unwrap(), 1);

        let stats = search_index.stats();
        assert_eq!(stats.num_docs, 2);
        assert_eq!(stats.max_doc, 3);
    }

    #[test]
    fn test_blank_text_is_skipped() {
        let search_index = SearchIndex::in_memory(IndexConfig::default()).unwrap();
        search_index.index_text(1, " ,, ").unwrap();
        search_index.commit().unwrap();
        assert_eq!(search_index.stats().num_docs, 0);
    }

    #[test]
    fn test_closed_index_rejects_writes() {
        let search_index = index();
        search_index.close().unwrap();
        assert!(search_index.index_text(4, "eel").is_err());
        assert_eq!(search_index.count_in_rowid_range("cat", 0, 10, false).unwrap(), 2);
        assert!(search_index.close().is_ok());
    }

    #[test]
    fn test_response_envelope() {
        let ok: BridgeResponse<u64> = Ok(3).into();
        assert_eq!(ok.to_json(), r#"{"ok":true,"retryable":false,"data":3}"#);

        let err: BridgeResponse<u64> = Err(StrataError::storage("disk full")).into();
        assert!(!err.ok);
        assert!(err.retryable);
        assert!(err.error.unwrap().contains("disk full"));
    }

    #[test]
    fn test_query_values_are_tokenized_like_text() {
        let search_index = SearchIndex::in_memory(IndexConfig::default()).unwrap();
        search_index.index_text(1, "state-of-the-art design").unwrap();
        search_index.index_text(2, "Hello, world").unwrap();
        search_index.commit().unwrap();

        assert_eq!(search_index.count_in_rowid_range("state-of-the-art", 0, 10, false).unwrap(), 1);
        assert_eq!(search_index.count_in_rowid_range("world,", 0, 10, false).unwrap(), 1);
        assert_eq!(search_index.count_in_rowid_range("\"Hello, world\"", 0, 10, false).unwrap(), 1);
        assert_eq!(search_index.count_in_rowid_range("Hello", 0, 10, false).unwrap(), 1);
        assert_eq!(search_index.count_in_rowid_range("art-deco", 0, 10, false).unwrap(), 0);
        // Punctuation alone yields no token and matches nothing.
        assert_eq!(search_index.count_in_rowid_range("--", 0, 10, false).unwrap(), 0);
        assert_eq!(search_index.count_in_rowid_range("NOT ,", 0, 10, false).unwrap(), 0);
    }

    #[test]
    fn test_keyword_tokenizer_matches_whole_text() {
        let search_index = SearchIndex::in_memory(IndexConfig {
            tokenizer: TokenizerKind::Keyword,
            ..Default::default()
        })
        .unwrap();
        search_index.index_text(1, "New York").unwrap();
        search_index.commit().unwrap();

        assert_eq!(search_index.tokenizer_kind(), TokenizerKind::Keyword);
        assert_eq!(search_index.count_in_rowid_range("\"new york\"", 0, 10, false).unwrap(), 1);
        assert_eq!(search_index.count_in_rowid_range("york", 0, 10, false).unwrap(), 0);
    }

    #[test]
    fn test_serialization_failure_is_valid_json() {
        struct Unserializable;

        impl Serialize for Unserializable {
            fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("bad \"value\""))
            }
        }

        let json = BridgeResponse::ok(Unserializable).to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["ok"], false);
        assert!(value["error"].as_str().unwrap().contains("bad \"value\""));
    }

    #[test]
    fn test_payload_defaults() {
        let payload: SearchRequestPayload = serde_json::from_str(r#"{"query":"cat"}"#).unwrap();
        assert_eq!(payload, SearchRequestPayload::new("cat"));

        let payload: SearchRequestPayload =
            serde_json::from_str(r#"{"query":"c.t","limit":5,"rowIdRange":[1,2],"useRegex":true}"#)
                .unwrap();
        assert_eq!(payload.limit, 5);
        assert_eq!(payload.row_id_range, Some((1, 2)));
        assert!(payload.use_regex);
    }
}
