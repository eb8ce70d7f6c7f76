//! Candidate selection for automatic compaction.

use crate::config::DEFAULT_SEGMENT_CAPACITY;
use crate::error::{CoreError, CoreResult};
use crate::segment::{SegmentInfo, SegmentStatus};
use crate::types::SegmentId;

/// Which segments [`auto_compact`](super::CompactionProcessor::auto_compact)
/// merges.
///
/// A segment is a candidate when it is active and holds fewer than
/// `small_segment_rows` live rows. A run happens only when at least
/// `min_segments` candidates exist, and merges at most
/// `max_segments_per_run` of them, lowest ids first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Live-row threshold below which a segment is worth merging.
    pub small_segment_rows: u64,
    /// Fewest candidates that justify a run.
    pub min_segments: usize,
    /// Most segments merged in one run.
    pub max_segments_per_run: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            small_segment_rows: (DEFAULT_SEGMENT_CAPACITY / 2) as u64,
            min_segments: 4,
            max_segments_per_run: 256,
        }
    }
}

impl CompactionPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the small-segment threshold.
    #[must_use]
    pub const fn small_segment_rows(mut self, rows: u64) -> Self {
        self.small_segment_rows = rows;
        self
    }

    /// Sets the minimum number of candidates.
    #[must_use]
    pub const fn min_segments(mut self, count: usize) -> Self {
        self.min_segments = count;
        self
    }

    /// Sets the maximum number of segments per run.
    #[must_use]
    pub const fn max_segments_per_run(mut self, count: usize) -> Self {
        self.max_segments_per_run = count;
        self
    }

    /// Checks the policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `min_segments` is zero or exceeds
    /// `max_segments_per_run`.
    pub fn validate(&self) -> CoreResult<()> {
        if self.min_segments == 0 {
            return Err(CoreError::invalid_argument(
                "compaction min_segments must be positive",
            ));
        }
        if self.max_segments_per_run < self.min_segments {
            return Err(CoreError::invalid_argument(format!(
                "compaction max_segments_per_run {} is below min_segments {}",
                self.max_segments_per_run, self.min_segments
            )));
        }
        Ok(())
    }

    /// Picks the segments to merge, or nothing if there are too few
    /// candidates.
    #[must_use]
    pub fn select(&self, segments: &[SegmentInfo]) -> Vec<SegmentId> {
        let mut candidates: Vec<SegmentId> = segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Active)
            .filter(|s| s.actual_row_count < self.small_segment_rows)
            .map(|s| s.segment_id)
            .collect();
        if candidates.len() < self.min_segments {
            return Vec::new();
        }
        candidates.sort_unstable();
        candidates.truncate(self.max_segments_per_run);
        candidates
    }
}
