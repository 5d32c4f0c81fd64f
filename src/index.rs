//! Versioned list of live segments.
//!
//! An [`IndexVersion`] is an immutable, ordered list of segments. Readers
//! take a [`VersionHandle`] and keep searching it for as long as they like;
//! the writer installs new versions through [`SegmentIndex::publish`] or
//! [`SegmentIndex::update`], which swap a single pointer under a write lock.
//!
//! Segments dropped from the live list are retired. Once no version refers
//! to a retired segment any more, [`SegmentIndex::collect_garbage`] removes its
//! files from storage, unless the last committed metadata still lists it.

use std::sync::{Arc, Weak};

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;
use crate::config::IndexConfig;
use crate::error::{Result, StrataError};
use crate::segment::{Segment, SegmentId, SegmentStats, segment_file_name, tombstone_file_name};
use crate::storage::Storage;

/// Name of the commit metadata file.
pub const META_FILE_NAME: &str = "meta.json";

/// Shared reference to an immutable index version.
pub type VersionHandle = Arc<IndexVersion>;

/// Immutable ordered list of segments.
#[derive(Debug, Default)]
pub struct IndexVersion {
    generation: u64,
    segments: Vec<Arc<Segment>>,
    /// Global docid of the first document of each segment.
    bases: Vec<u64>,
}

impl IndexVersion {
    pub(crate) fn new(generation: u64, segments: Vec<Arc<Segment>>) -> Self {
        let mut bases = Vec::with_capacity(segments.len());
        let mut base = 0u64;
        for segment in &segments {
            bases.push(base);
            base += segment.max_doc();
        }
        IndexVersion {
            generation,
            segments,
            bases,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().map(|s| s.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Live documents across all segments.
    pub fn num_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.num_docs()).sum()
    }

    /// Documents across all segments, deleted ones included.
    pub fn max_doc(&self) -> u64 {
        self.segments.iter().map(|s| s.max_doc()).sum()
    }

    /// Global docid of the first document of the segment at `index`.
    pub fn segment_base(&self, index: usize) -> u64 {
        self.bases[index]
    }

    pub fn find_segment(&self, id: SegmentId) -> Option<(usize, &Arc<Segment>)> {
        self.segments.iter().enumerate().find(|(_, s)| s.id() == id)
    }

    /// Segment position and local docid of a global docid.
    pub fn locate(&self, global: u64) -> Option<(usize, u64)> {
        let index = self.bases.partition_point(|&base| base <= global).checked_sub(1)?;
        let local = global - self.bases[index];
        (local < self.segments[index].max_doc()).then_some((index, local))
    }

    pub fn stats(&self) -> Vec<SegmentStats> {
        self.segments.iter().map(|s| s.stats()).collect()
    }
}

/// Contents of `meta.json`, written by every commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    pub generation: u64,
    pub next_segment_id: SegmentId,
    pub segments: Vec<SegmentId>,
    pub committed_at: DateTime<Utc>,
    #[serde(default)]
    pub config: IndexConfig,
}

impl IndexMeta {
    /// Read `meta.json`, or `None` for a storage that was never committed.
    pub fn load(storage: &dyn Storage) -> Result<Option<Self>> {
        if !storage.file_exists(META_FILE_NAME) {
            return Ok(None);
        }
        let bytes = storage.read_file(META_FILE_NAME)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn save(&self, storage: &dyn Storage) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        storage.write_file_atomic(META_FILE_NAME, &json)?;
        storage.sync()
    }
}

/// A segment left out when an index was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedSegment {
    pub segment_id: SegmentId,
    pub reason: String,
}

/// Holder of the current [`IndexVersion`].
#[derive(Debug, Default)]
pub struct SegmentIndex {
    current: RwLock<VersionHandle>,
    storage: Option<Arc<dyn Storage>>,
    retired: Mutex<Vec<(SegmentId, Weak<Segment>)>>,
    last_commit: Mutex<Option<IndexMeta>>,
    skipped: Vec<SkippedSegment>,
}

impl SegmentIndex {
    /// An empty in-memory index with no storage attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty index whose retired segment files live in `storage`.
    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        SegmentIndex {
            storage: Some(storage),
            ..Default::default()
        }
    }

    /// Load the last commit from `storage`.
    ///
    /// Segments whose blob or tombstone file is corrupted or written by an
    /// unknown format are skipped and reported by
    /// [`SegmentIndex::skipped_segments`]. Other errors fail the open.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let Some(meta) = IndexMeta::load(storage.as_ref())? else {
            return Ok(Self::with_storage(storage));
        };

        let mut segments = Vec::with_capacity(meta.segments.len());
        let mut skipped = Vec::new();
        for &id in &meta.segments {
            match load_segment(storage.as_ref(), id) {
                Ok(segment) => segments.push(Arc::new(segment)),
                Err(e) if e.is_fatal() => {
                    warn!("skipping segment {id:016x}: {e}");
                    skipped.push(SkippedSegment {
                        segment_id: id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "opened index generation {} with {} segments ({} skipped)",
            meta.generation,
            segments.len(),
            skipped.len()
        );

        Ok(SegmentIndex {
            current: RwLock::new(Arc::new(IndexVersion::new(meta.generation, segments))),
            storage: Some(storage),
            retired: Mutex::new(Vec::new()),
            last_commit: Mutex::new(Some(meta)),
            skipped,
        })
    }

    pub fn storage(&self) -> Option<&Arc<dyn Storage>> {
        self.storage.as_ref()
    }

    /// Take a handle on the current version.
    pub fn current_version(&self) -> VersionHandle {
        Arc::clone(&self.current.read())
    }

    /// Install `segments` as the next version.
    pub fn publish(&self, segments: Vec<Arc<Segment>>) -> VersionHandle {
        let mut current = self.current.write();
        self.install(&mut current, segments)
    }

    /// Derive the next version from the current one under a single lock hold.
    ///
    /// Nothing is published when `f` fails.
    pub fn update<F>(&self, f: F) -> Result<VersionHandle>
    where
        F: FnOnce(&IndexVersion) -> Result<Vec<Arc<Segment>>>,
    {
        let mut current = self.current.write();
        let segments = f(&current)?;
        Ok(self.install(&mut current, segments))
    }

    fn install(&self, current: &mut VersionHandle, segments: Vec<Arc<Segment>>) -> VersionHandle {
        let kept: AHashSet<SegmentId> = segments.iter().map(|s| s.id()).collect();
        let mut retired = self.retired.lock();
        for segment in current.segments() {
            if !kept.contains(&segment.id()) {
                retired.push((segment.id(), Arc::downgrade(segment)));
            }
        }

        let next = Arc::new(IndexVersion::new(current.generation() + 1, segments));
        debug!(
            "published generation {} with {} segments",
            next.generation(),
            next.len()
        );
        *current = Arc::clone(&next);
        next
    }

    /// Drop a reader's handle and collect segments it kept alive.
    pub fn release(&self, handle: VersionHandle) -> Vec<SegmentId> {
        drop(handle);
        self.collect_garbage()
    }

    /// Forget retired segments that nothing references any more.
    ///
    /// Returns their ids. Their files are deleted from storage unless the
    /// last commit still lists them.
    pub fn collect_garbage(&self) -> Vec<SegmentId> {
        let committed: AHashSet<SegmentId> = self
            .last_commit
            .lock()
            .as_ref()
            .map(|meta| meta.segments.iter().copied().collect())
            .unwrap_or_default();

        let mut collected = Vec::new();
        self.retired.lock().retain(|(id, weak)| {
            if weak.strong_count() > 0 || committed.contains(id) {
                return true;
            }
            if let Some(storage) = &self.storage {
                for name in [segment_file_name(*id), tombstone_file_name(*id)] {
                    if let Err(e) = storage.delete_file(&name) {
                        warn!("failed to delete {name}: {e}");
                    }
                }
            }
            collected.push(*id);
            false
        });

        if !collected.is_empty() {
            debug!("collected {} retired segments", collected.len());
        }
        collected
    }

    /// Segments skipped by [`SegmentIndex::open`].
    pub fn skipped_segments(&self) -> &[SkippedSegment] {
        &self.skipped
    }

    /// Metadata of the last commit, if any.
    pub fn last_commit(&self) -> Option<IndexMeta> {
        self.last_commit.lock().clone()
    }

    pub(crate) fn record_commit(&self, meta: IndexMeta) {
        *self.last_commit.lock() = Some(meta);
    }
}

/// Read a segment blob and apply its persisted tombstones.
fn load_segment(storage: &dyn Storage, id: SegmentId) -> Result<Segment> {
    let segment = Segment::open(&storage.read_file(&segment_file_name(id))?)?;
    if segment.id() != id {
        return Err(StrataError::corrupted(format!(
            "file {} holds segment {:016x}",
            segment_file_name(id),
            segment.id()
        )));
    }

    let del_name = tombstone_file_name(id);
    if storage.file_exists(&del_name) {
        let bytes = storage.read_file(&del_name)?;
        let tombstones = Bitmap::deserialize_from(&mut bytes.as_slice())
            .map_err(|e| StrataError::corrupted(format!("{del_name}: {e}")))?;
        segment
            .mark_deleted_all(&tombstones)
            .map_err(|e| StrataError::corrupted(format!("{del_name}: {e}")))?;
        segment.take_dirty();
    }
    Ok(segment)
}
