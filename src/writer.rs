//! Index writer.
//!
//! The writer buffers documents in a [`SegmentBuilder`], flushes them into
//! immutable segments, records deletes as tombstones, and merges segments
//! according to a [`MergePolicy`]. Every change becomes visible to readers by
//! publishing a new version on the shared [`SegmentIndex`].
//!
//! Writer methods take `&mut self`; hosts that share a writer wrap it in a
//! mutex.

pub mod merge;
pub mod merge_policy;
pub mod scheduler;

use std::sync::Arc;

use ahash::AHashSet;
use chrono::Utc;
use log::{debug, info, warn};

use crate::bitmap::DocIdWidth;
use crate::config::IndexConfig;
use crate::document::{Document, Term};
use crate::error::{Result, StrataError};
use crate::index::{IndexMeta, SegmentIndex, VersionHandle};
use crate::segment::{Segment, SegmentBuilder, SegmentId, segment_file_name, tombstone_file_name};
use crate::storage::Storage;

use self::merge::{
    MergeOperation, MergeOutput, MergeState, merge_segments, reapply_deletes, replace_sources,
};
use self::merge_policy::{MergePolicy, MergeReason, SegmentInfo, ThresholdMergePolicy};
use self::scheduler::{MergeScheduler, MergeTask, MergeTaskResult};

/// What the writer is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Accepting documents.
    Open,
    /// Turning the buffer into a segment.
    Flushing,
    /// Closed; every operation fails.
    Closed,
}

/// Statistics about the writing process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Number of documents added.
    pub docs_added: u64,
    /// Number of documents newly tombstoned.
    pub docs_deleted: u64,
    /// Number of segments flushed.
    pub segments_flushed: u64,
    /// Number of merges published.
    pub merges_completed: u64,
    /// Number of commits.
    pub commits: u64,
}

/// Writes documents and deletes into a [`SegmentIndex`].
pub struct IndexWriter {
    config: IndexConfig,
    index: Arc<SegmentIndex>,
    storage: Arc<dyn Storage>,
    builder: SegmentBuilder,
    /// Built segments whose blob has not been written yet.
    unpersisted: Vec<Segment>,
    state: WriterState,
    opstamp: u64,
    next_segment_id: SegmentId,
    merge_policy: Box<dyn MergePolicy>,
    /// Merges submitted to the scheduler and not yet published.
    merges: Vec<MergeOperation>,
    scheduler: Option<MergeScheduler>,
    pool: Arc<rayon::ThreadPool>,
    stats: WriterStats,
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("opstamp", &self.opstamp)
            .field("next_segment_id", &self.next_segment_id)
            .field("buffered_docs", &self.builder.max_doc())
            .field("merge_policy", &self.merge_policy)
            .field("merges", &self.merges)
            .field("stats", &self.stats)
            .finish()
    }
}

impl IndexWriter {
    /// Create a writer for `index`, which must have storage attached.
    pub fn new(index: Arc<SegmentIndex>, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let storage = index
            .storage()
            .cloned()
            .ok_or_else(|| StrataError::config("index writer needs an index with storage"))?;

        let version = index.current_version();
        for segment in version.segments() {
            if segment.width() > config.docid_width {
                return Err(StrataError::config(format!(
                    "segment {} uses {} docids but the writer is configured for {}",
                    segment.id(),
                    segment.width(),
                    config.docid_width
                )));
            }
        }
        let next_segment_id = index
            .last_commit()
            .map(|meta| meta.next_segment_id)
            .into_iter()
            .chain(version.segments().iter().map(|s| s.id() + 1))
            .chain(index.skipped_segments().iter().map(|s| s.segment_id + 1))
            .max()
            .unwrap_or(1);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.merge_threads)
            .thread_name(|i| format!("strata-worker-{i}"))
            .build()
            .map_err(|e| StrataError::other(format!("failed to build thread pool: {e}")))?;
        let pool = Arc::new(pool);

        let scheduler = if config.background_merge {
            Some(MergeScheduler::start(Arc::clone(&storage), Arc::clone(&pool))?)
        } else {
            None
        };

        Ok(IndexWriter {
            builder: SegmentBuilder::new(config.docid_width),
            merge_policy: Box::new(ThresholdMergePolicy::from_config(&config)),
            config,
            index,
            storage,
            unpersisted: Vec::new(),
            state: WriterState::Open,
            opstamp: 0,
            next_segment_id,
            merges: Vec::new(),
            scheduler,
            pool,
            stats: WriterStats::default(),
        })
    }

    /// Replace the merge policy.
    pub fn with_merge_policy(mut self, policy: Box<dyn MergePolicy>) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<SegmentIndex> {
        &self.index
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Stamp of the last operation.
    pub fn opstamp(&self) -> u64 {
        self.opstamp
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Number of buffered documents, deleted ones included.
    pub fn pending_docs(&self) -> u64 {
        self.builder.max_doc()
    }

    /// Merges submitted to the background worker and not yet published.
    pub fn pending_merges(&self) -> &[MergeOperation] {
        &self.merges
    }

    /// The version readers currently see.
    pub fn current_version(&self) -> VersionHandle {
        self.index.current_version()
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            state => Err(StrataError::invariant(format!("writer is {state:?}"))),
        }
    }

    fn next_opstamp(&mut self) -> u64 {
        self.opstamp += 1;
        self.opstamp
    }

    fn allocate_segment_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }

    /// Buffer a document. Flushes when the buffer reaches `max_in_memory_docs`.
    ///
    /// Returns the operation stamp. Once this returns `Ok` the document is
    /// owned by the writer: a failed automatic flush is only logged, the
    /// built segment stays pending and the error surfaces from the next
    /// [`flush`](Self::flush) or [`commit`](Self::commit) that still fails.
    pub fn add_document(&mut self, document: Document) -> Result<u64> {
        self.check_open()?;
        self.builder.add_document(&document)?;
        self.stats.docs_added += 1;
        let opstamp = self.next_opstamp();

        if self.builder.max_doc() >= self.config.max_in_memory_docs as u64
            && let Err(e) = self.flush()
        {
            warn!("automatic flush failed, documents stay pending: {e}");
        }
        Ok(opstamp)
    }

    /// Delete every document carrying `row_id`.
    pub fn delete_by_row_id(&mut self, row_id: u64) -> Result<usize> {
        self.delete_by_row_ids(&[row_id])
    }

    /// Delete every document carrying one of `row_ids`, buffered or published.
    ///
    /// Returns the number of documents newly deleted.
    pub fn delete_by_row_ids(&mut self, row_ids: &[u64]) -> Result<usize> {
        self.check_open()?;
        let row_ids: AHashSet<u64> = row_ids.iter().copied().collect();

        let mut deleted = self.builder.delete_row_ids(&row_ids)? as u64;
        for segment in &self.unpersisted {
            deleted += segment.mark_deleted_all(&segment.docids_for_row_ids(&row_ids)?)?;
        }
        for segment in self.index.current_version().segments() {
            deleted += segment.mark_deleted_all(&segment.docids_for_row_ids(&row_ids)?)?;
        }

        self.next_opstamp();
        self.stats.docs_deleted += deleted;
        debug!("deleted {deleted} documents by row id");
        Ok(deleted as usize)
    }

    /// Delete every document containing `term`.
    pub fn delete_term(&mut self, term: &Term) -> Result<usize> {
        self.check_open()?;

        let mut deleted = self.builder.delete_term(term)? as u64;
        for segment in &self.unpersisted {
            deleted += segment.mark_deleted_all(&segment.postings_for(term))?;
        }
        for segment in self.index.current_version().segments() {
            deleted += segment.mark_deleted_all(&segment.postings_for(term))?;
        }

        self.next_opstamp();
        self.stats.docs_deleted += deleted;
        debug!("deleted {deleted} documents containing '{term}'");
        Ok(deleted as usize)
    }

    /// Discard buffered documents that were not flushed yet.
    pub fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        self.builder = SegmentBuilder::new(self.config.docid_width);
        Ok(())
    }

    /// Turn buffered documents into a segment, persist it and publish it.
    ///
    /// Returns the new version, or `None` when nothing was buffered. On
    /// failure nothing is published and the built segment is retried by the
    /// next flush.
    pub fn flush(&mut self) -> Result<Option<VersionHandle>> {
        self.check_open()?;
        self.state = WriterState::Flushing;
        let result = self.flush_inner();
        self.state = WriterState::Open;
        result
    }

    fn flush_inner(&mut self) -> Result<Option<VersionHandle>> {
        if !self.builder.is_empty() {
            if self.builder.num_docs() == 0 {
                debug!(
                    "dropping {} buffered documents that were all deleted",
                    self.builder.max_doc()
                );
                self.builder = SegmentBuilder::new(self.config.docid_width);
            } else {
                let id = self.allocate_segment_id();
                let segment = self.builder.build(id)?;
                self.unpersisted.push(segment);
            }
        }

        if self.unpersisted.is_empty() {
            return Ok(None);
        }

        while let Some(segment) = self.unpersisted.first() {
            persist_segment(self.storage.as_ref(), segment)?;
            // Tombstones are in the blob.
            segment.take_dirty();
            let segment = self.unpersisted.remove(0);
            debug!(
                "flushed segment {} with {} documents",
                segment.id(),
                segment.max_doc()
            );
            let id = segment.id();
            let segment = Arc::new(segment);
            let published = self.index.update(|version| {
                let mut segments = version.segments().to_vec();
                segments.push(Arc::clone(&segment));
                Ok(segments)
            });
            if let Err(e) = published {
                let _ = self.storage.delete_file(&segment_file_name(id));
                return Err(e);
            }
            self.stats.segments_flushed += 1;
        }

        Ok(Some(self.index.current_version()))
    }

    /// Make everything written so far durable.
    ///
    /// Flushes the buffer, publishes finished background merges, runs the
    /// merge policy, persists tombstones and writes `meta.json`.
    pub fn commit(&mut self) -> Result<VersionHandle> {
        self.commit_inner(true)
    }

    fn commit_inner(&mut self, run_merge_policy: bool) -> Result<VersionHandle> {
        self.flush()?;
        self.merge_results()?;
        if run_merge_policy {
            self.maybe_merge()?;
        }

        let version = self.index.current_version();
        for segment in version.segments() {
            if segment.take_dirty() {
                let bytes = segment.tombstones().to_bytes();
                if let Err(e) = self
                    .storage
                    .write_file_atomic(&tombstone_file_name(segment.id()), &bytes)
                {
                    segment.mark_dirty();
                    return Err(e);
                }
            }
        }

        let meta = IndexMeta {
            generation: version.generation(),
            next_segment_id: self.next_segment_id,
            segments: version.segment_ids(),
            committed_at: Utc::now(),
            config: self.config.clone(),
        };
        meta.save(self.storage.as_ref())?;
        self.index.record_commit(meta);
        self.stats.commits += 1;
        info!(
            "committed generation {} with {} segments and {} live documents",
            version.generation(),
            version.len(),
            version.num_docs()
        );

        self.index.collect_garbage();
        Ok(version)
    }

    fn is_merging(&self, id: SegmentId) -> bool {
        self.merges.iter().any(|op| op.sources.contains(&id))
    }

    /// Ask the merge policy for a merge and run or schedule it.
    ///
    /// Returns whether a merge was started.
    pub fn maybe_merge(&mut self) -> Result<bool> {
        self.check_open()?;
        let version = self.index.current_version();
        let infos = SegmentInfo::from_version(&version, |id| self.is_merging(id));
        let Some(candidate) = self.merge_policy.select_merge(&infos) else {
            return Ok(false);
        };

        debug!(
            "merge policy selected {:?} ({:?})",
            candidate.segments, candidate.reason
        );
        self.start_merge(candidate.segments, candidate.reason)?;
        Ok(true)
    }

    /// Merge the given segments into one, inline.
    pub fn merge(&mut self, segment_ids: &[SegmentId]) -> Result<VersionHandle> {
        self.check_open()?;
        if segment_ids.is_empty() {
            return Err(StrataError::invariant("merge needs at least one segment"));
        }
        let inputs = self.resolve_inputs(segment_ids)?;
        let operation = MergeOperation::new(
            self.allocate_segment_id(),
            segment_ids.to_vec(),
            MergeReason::Explicit,
        );
        self.merge_inline(operation, inputs)?;
        Ok(self.index.current_version())
    }

    fn resolve_inputs(&self, segment_ids: &[SegmentId]) -> Result<Vec<Arc<Segment>>> {
        let version = self.index.current_version();
        segment_ids
            .iter()
            .map(|&id| {
                if self.is_merging(id) {
                    return Err(StrataError::invariant(format!(
                        "segment {id} is already being merged"
                    )));
                }
                version
                    .find_segment(id)
                    .map(|(_, segment)| Arc::clone(segment))
                    .ok_or_else(|| StrataError::invariant(format!("segment {id} is not live")))
            })
            .collect()
    }

    fn start_merge(&mut self, segment_ids: Vec<SegmentId>, reason: MergeReason) -> Result<()> {
        let inputs = self.resolve_inputs(&segment_ids)?;
        let operation = MergeOperation::new(self.allocate_segment_id(), segment_ids, reason);

        match self.scheduler.as_mut() {
            Some(scheduler) => {
                let mut operation = operation;
                operation.transition(MergeState::Merging)?;
                self.merges.push(operation.clone());
                let submitted = scheduler.submit(MergeTask {
                    operation,
                    inputs,
                    width: self.config.docid_width,
                });
                if submitted.is_err() {
                    self.merges.pop();
                }
                submitted
            }
            None => self.merge_inline(operation, inputs),
        }
    }

    fn merge_inline(&mut self, mut operation: MergeOperation, inputs: Vec<Arc<Segment>>) -> Result<()> {
        operation.transition(MergeState::Merging)?;
        let output = run_merge(
            self.storage.as_ref(),
            &self.pool,
            &inputs,
            operation.target,
            self.config.docid_width,
        );
        self.finish_merge(MergeTaskResult {
            operation,
            inputs,
            output,
        })
        .map(|_| ())
    }

    /// Publish a finished merge.
    fn finish_merge(&mut self, result: MergeTaskResult) -> Result<MergeOperation> {
        let MergeTaskResult {
            mut operation,
            inputs,
            output,
        } = result;
        self.merges.retain(|op| op.target != operation.target);

        let MergeOutput {
            segment,
            doc_id_map,
            snapshots,
        } = output?;
        let merged = segment.map(Arc::new);

        let published = self.index.update(|version| {
            if let Some(segment) = &merged {
                reapply_deletes(&inputs, &snapshots, &doc_id_map, segment)?;
            }
            replace_sources(version, &operation.sources, merged.clone())
        });

        if let Err(e) = published {
            if merged.is_some() {
                let _ = self.storage.delete_file(&segment_file_name(operation.target));
            }
            warn!(
                "merge of {:?} into segment {} was not published: {e}",
                operation.sources, operation.target
            );
            return Err(e);
        }

        operation.transition(MergeState::Merged)?;
        self.stats.merges_completed += 1;
        info!(
            "merged segments {:?} into segment {} ({} documents)",
            operation.sources,
            operation.target,
            merged.as_ref().map_or(0, |s| s.max_doc())
        );
        Ok(operation)
    }

    /// Publish background merges that have finished, without blocking.
    pub fn merge_results(&mut self) -> Result<Vec<MergeOperation>> {
        let results = match self.scheduler.as_mut() {
            Some(scheduler) => scheduler.try_results(),
            None => return Ok(Vec::new()),
        };
        self.publish_results(results)
    }

    /// Block until every background merge has finished and publish them.
    pub fn wait_merging_threads(&mut self) -> Result<Vec<MergeOperation>> {
        let mut results = Vec::new();
        if let Some(scheduler) = self.scheduler.as_mut() {
            while let Some(result) = scheduler.wait_result() {
                results.push(result);
            }
        }
        self.merges.clear();
        self.publish_results(results)
    }

    fn publish_results(&mut self, results: Vec<MergeTaskResult>) -> Result<Vec<MergeOperation>> {
        let mut published = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match self.finish_merge(result) {
                Ok(operation) => published.push(operation),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(published),
        }
    }

    /// Commit, wait for background merges and stop accepting operations.
    pub fn close(&mut self) -> Result<()> {
        if self.state == WriterState::Closed {
            return Ok(());
        }
        self.wait_merging_threads()?;
        self.commit_inner(false)?;
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
        self.state = WriterState::Closed;
        Ok(())
    }
}

/// Write a segment blob under its final name.
fn persist_segment(storage: &dyn Storage, segment: &Segment) -> Result<()> {
    let bytes = segment.serialize()?;
    storage.write_file_atomic(&segment_file_name(segment.id()), &bytes)
}

/// Merge `inputs` on `pool` and persist the result.
pub(crate) fn run_merge(
    storage: &dyn Storage,
    pool: &rayon::ThreadPool,
    inputs: &[Arc<Segment>],
    target: SegmentId,
    width: DocIdWidth,
) -> Result<MergeOutput> {
    let output = pool.install(|| merge_segments(inputs, target, width))?;
    if let Some(segment) = &output.segment {
        persist_segment(storage, segment)?;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};
    use crate::storage::{StorageInput, StorageOutput};

    fn writer(config: IndexConfig) -> IndexWriter {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let index = Arc::new(SegmentIndex::with_storage(storage));
        IndexWriter::new(index, config).unwrap()
    }

    fn doc(row_id: u64, tokens: &[&str]) -> Document {
        Document::builder()
            .row_id(row_id)
            .add_tokens("body", tokens.iter().copied())
            .build()
    }

    #[test]
    fn test_flush_publishes_segment() {
        let mut writer = writer(IndexConfig::default());
        assert_eq!(writer.add_document(doc(1, &["a"])).unwrap(), 1);
        assert_eq!(writer.add_document(doc(2, &["b"])).unwrap(), 2);
        assert_eq!(writer.current_version().num_docs(), 0);

        let version = writer.flush().unwrap().unwrap();
        assert_eq!(version.len(), 1);
        assert_eq!(version.num_docs(), 2);
        assert!(writer.flush().unwrap().is_none());
        assert_eq!(writer.state(), WriterState::Open);
    }

    #[test]
    fn test_auto_flush() {
        let mut writer = writer(IndexConfig {
            max_in_memory_docs: 2,
            ..Default::default()
        });
        for i in 0..5 {
            writer.add_document(doc(i, &["x"])).unwrap();
        }
        assert_eq!(writer.current_version().len(), 2);
        assert_eq!(writer.pending_docs(), 1);
    }

    #[derive(Debug)]
    struct FlakyStorage {
        inner: MemoryStorage,
        failing: AtomicBool,
    }

    impl FlakyStorage {
        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StrataError::storage("disk unavailable"));
            }
            Ok(())
        }
    }

    impl Storage for FlakyStorage {
        fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
            self.inner.open_input(name)
        }

        fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
            self.check()?;
            self.inner.create_output(name)
        }

        fn file_exists(&self, name: &str) -> bool {
            self.inner.file_exists(name)
        }

        fn delete_file(&self, name: &str) -> Result<()> {
            self.inner.delete_file(name)
        }

        fn list_files(&self) -> Result<Vec<String>> {
            self.inner.list_files()
        }

        fn file_size(&self, name: &str) -> Result<u64> {
            self.inner.file_size(name)
        }

        fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
            self.check()?;
            self.inner.rename_file(old_name, new_name)
        }

        fn sync(&self) -> Result<()> {
            self.inner.sync()
        }
    }

    #[test]
    fn test_failed_auto_flush_keeps_document_once() {
        let storage = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(MemoryStorageConfig::default()),
            failing: AtomicBool::new(true),
        });
        let index = Arc::new(SegmentIndex::with_storage(Arc::clone(&storage) as Arc<dyn Storage>));
        let mut writer = IndexWriter::new(
            index,
            IndexConfig {
                max_in_memory_docs: 2,
                ..Default::default()
            },
        )
        .unwrap();

        writer.add_document(doc(1, &["a"])).unwrap();
        // Reaches the flush threshold while the storage is failing.
        writer.add_document(doc(2, &["b"])).unwrap();
        assert_eq!(writer.current_version().num_docs(), 0);
        assert!(writer.flush().is_err());
        assert_eq!(writer.state(), WriterState::Open);

        storage.failing.store(false, Ordering::SeqCst);
        let version = writer.commit().unwrap();
        assert_eq!(version.num_docs(), 2);
        assert_eq!(writer.stats().docs_added, 2);
    }

    #[test]
    fn test_delete_buffered_and_published() {
        let mut writer = writer(IndexConfig::default());
        writer.add_document(doc(1, &["a"])).unwrap();
        writer.flush().unwrap();
        writer.add_document(doc(2, &["a"])).unwrap();

        assert_eq!(writer.delete_by_row_ids(&[1, 2]).unwrap(), 2);
        assert_eq!(writer.delete_by_row_id(1).unwrap(), 0);

        // The buffer only held deleted documents.
        assert!(writer.flush().unwrap().is_none());
        assert_eq!(writer.current_version().num_docs(), 0);
    }

    #[test]
    fn test_explicit_merge() {
        let mut writer = writer(IndexConfig::default());
        for i in 0..3 {
            writer.add_document(doc(i, &["x", "y"])).unwrap();
            writer.flush().unwrap();
        }
        writer.delete_term(&Term::new("body", "x")).unwrap();
        writer.add_document(doc(9, &["z"])).unwrap();
        writer.flush().unwrap();

        let ids = writer.current_version().segment_ids();
        let version = writer.merge(&ids).unwrap();
        assert_eq!(version.len(), 1);
        assert_eq!(version.num_docs(), 1);
        assert_eq!(version.max_doc(), 1);
        assert_eq!(writer.stats().merges_completed, 1);

        assert!(writer.merge(&[12345]).is_err());
    }

    #[test]
    fn test_merging_everything_deleted_drops_segments() {
        let mut writer = writer(IndexConfig::default());
        writer.add_document(doc(1, &["a"])).unwrap();
        writer.flush().unwrap();
        writer.delete_by_row_id(1).unwrap();

        let ids = writer.current_version().segment_ids();
        let version = writer.merge(&ids).unwrap();
        assert!(version.is_empty());
    }

    #[test]
    fn test_commit_runs_merge_policy() {
        let mut writer = writer(IndexConfig {
            merge_threshold: 2,
            ..Default::default()
        });
        for i in 0..3 {
            writer.add_document(doc(i, &["x"])).unwrap();
            writer.commit().unwrap();
        }
        let version = writer.current_version();
        assert!(version.len() <= 2);
        assert_eq!(version.num_docs(), 3);

        let meta = writer.index().last_commit().unwrap();
        assert_eq!(meta.segments, version.segment_ids());
    }

    #[test]
    fn test_background_merge() {
        let mut writer = writer(IndexConfig {
            background_merge: true,
            ..Default::default()
        });
        for i in 0..4 {
            writer.add_document(doc(i, &["x"])).unwrap();
            writer.flush().unwrap();
        }
        let ids = writer.current_version().segment_ids();
        writer.start_merge(ids, MergeReason::Explicit).unwrap();
        assert_eq!(writer.pending_merges().len(), 1);
        assert!(writer.maybe_merge().is_ok());

        // Deleted while the merge may still be running.
        writer.delete_by_row_id(2).unwrap();

        let merged = writer.wait_merging_threads().unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].state, MergeState::Merged);

        let version = writer.current_version();
        assert_eq!(version.len(), 1);
        assert_eq!(version.num_docs(), 3);
        assert!(writer.pending_merges().is_empty());
    }

    #[test]
    fn test_closed_writer_rejects_operations() {
        let mut writer = writer(IndexConfig::default());
        writer.add_document(doc(1, &["a"])).unwrap();
        writer.close().unwrap();
        assert_eq!(writer.state(), WriterState::Closed);
        assert!(writer.add_document(doc(2, &["b"])).is_err());
        assert!(writer.close().is_ok());
    }
}
