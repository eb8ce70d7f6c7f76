//! Segment compaction.
//!
//! Compaction merges the live rows of a set of active segments into new,
//! denser segments and retires the sources in one commit.
//!
//! ## Phases
//!
//! 1. **Snapshot**: resolve the table at the compaction transaction's begin
//!    timestamp, bind to that table *instance*, and copy the source segments'
//!    block lists and delete history.
//! 2. **Rewrite**: read the source blocks with no state lock held and append
//!    every row live at the begin timestamp to output segments.
//! 3. **Commit**: the transaction manager re-validates the sources, carries
//!    deletes committed since the begin timestamp onto the output rows, and
//!    swaps the segment sets atomically.
//!
//! A delete that commits after the compaction commits fails with a conflict;
//! one that commits before it is carried over.

mod policy;
mod processor;
mod task;

pub use policy::CompactionPolicy;
pub use processor::{CompactOutcome, CompactionProcessor, SegmentSelection};
pub use task::CompactSummary;
