//! Merge policies for segment management.
//!
//! A policy looks at the live segments and proposes at most one set of
//! segments to merge per call.

use crate::config::IndexConfig;
use crate::index::IndexVersion;
use crate::segment::SegmentId;

/// What the policy knows about a live segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub segment_id: SegmentId,
    pub max_doc: u64,
    pub live_docs: u64,
    pub deletion_ratio: f64,
    /// Already part of an in-flight merge.
    pub is_merging: bool,
}

impl SegmentInfo {
    /// Describe every segment of `version`; `is_merging` tells which ones are
    /// already being merged.
    pub fn from_version<F>(version: &IndexVersion, is_merging: F) -> Vec<SegmentInfo>
    where
        F: Fn(SegmentId) -> bool,
    {
        version
            .segments()
            .iter()
            .map(|segment| SegmentInfo {
                segment_id: segment.id(),
                max_doc: segment.max_doc(),
                live_docs: segment.num_docs(),
                deletion_ratio: segment.deletion_ratio(),
                is_merging: is_merging(segment.id()),
            })
            .collect()
    }
}

/// Why a merge was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReason {
    /// Too many live segments.
    SegmentCount,
    /// A segment carries too many tombstones.
    Tombstones,
    /// Requested explicitly by the caller.
    Explicit,
}

/// A set of segments to merge into one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCandidate {
    pub segments: Vec<SegmentId>,
    pub reason: MergeReason,
}

/// Trait for defining merge policies.
pub trait MergePolicy: Send + Sync + std::fmt::Debug {
    /// Propose at most one merge. Segments with `is_merging` set must not be
    /// selected.
    fn select_merge(&self, segments: &[SegmentInfo]) -> Option<MergeCandidate>;

    /// Check if a merge operation should be triggered.
    fn should_merge(&self, segments: &[SegmentInfo]) -> bool {
        self.select_merge(segments).is_some()
    }
}

/// Merges everything once the segment count passes a threshold, and
/// rewrites single segments whose deletion ratio passes a limit.
#[derive(Debug, Clone)]
pub struct ThresholdMergePolicy {
    /// Segment count above which all idle segments are merged.
    pub merge_threshold: usize,

    /// Deletion ratio above which a segment is rewritten.
    pub tombstone_ratio: f64,
}

impl Default for ThresholdMergePolicy {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

impl ThresholdMergePolicy {
    pub fn from_config(config: &IndexConfig) -> Self {
        ThresholdMergePolicy {
            merge_threshold: config.merge_threshold,
            tombstone_ratio: config.tombstone_ratio,
        }
    }
}

impl MergePolicy for ThresholdMergePolicy {
    fn select_merge(&self, segments: &[SegmentInfo]) -> Option<MergeCandidate> {
        let idle: Vec<&SegmentInfo> = segments.iter().filter(|s| !s.is_merging).collect();

        if segments.len() > self.merge_threshold && idle.len() >= 2 {
            return Some(MergeCandidate {
                segments: idle.iter().map(|s| s.segment_id).collect(),
                reason: MergeReason::SegmentCount,
            });
        }

        idle.iter()
            .find(|s| s.deletion_ratio > self.tombstone_ratio)
            .map(|s| MergeCandidate {
                segments: vec![s.segment_id],
                reason: MergeReason::Tombstones,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(segment_id: SegmentId, deletion_ratio: f64, is_merging: bool) -> SegmentInfo {
        SegmentInfo {
            segment_id,
            max_doc: 10,
            live_docs: (10.0 * (1.0 - deletion_ratio)) as u64,
            deletion_ratio,
            is_merging,
        }
    }

    fn policy() -> ThresholdMergePolicy {
        ThresholdMergePolicy {
            merge_threshold: 3,
            tombstone_ratio: 0.3,
        }
    }

    #[test]
    fn test_no_merge_at_threshold() {
        let segments: Vec<_> = (1..=3).map(|id| info(id, 0.0, false)).collect();
        assert!(!policy().should_merge(&segments));
    }

    #[test]
    fn test_count_trigger_selects_idle_segments() {
        let segments = vec![
            info(1, 0.0, false),
            info(2, 0.0, true),
            info(3, 0.0, false),
            info(4, 0.0, false),
        ];
        let candidate = policy().select_merge(&segments).unwrap();
        assert_eq!(candidate.reason, MergeReason::SegmentCount);
        assert_eq!(candidate.segments, vec![1, 3, 4]);
    }

    #[test]
    fn test_tombstone_trigger() {
        let segments = vec![info(1, 0.1, false), info(2, 0.5, false)];
        let candidate = policy().select_merge(&segments).unwrap();
        assert_eq!(candidate.reason, MergeReason::Tombstones);
        assert_eq!(candidate.segments, vec![2]);

        let segments = vec![info(1, 0.1, false), info(2, 0.5, true)];
        assert!(policy().select_merge(&segments).is_none());
    }

    #[test]
    fn test_ratio_must_be_exceeded() {
        let segments = vec![info(1, 0.3, false)];
        assert!(policy().select_merge(&segments).is_none());
    }
}
