//! Segments.
//!
//! A segment is an immutable, ordered run of row blocks written by one
//! transaction (an import or a compaction). Rows are addressed by their
//! offset inside the segment. After a segment is published only its delete
//! history and its lifecycle status change:
//!
//! ```text
//! SegmentBuilder --seal--> SealedSegment --commit--> SegmentEntry (Active)
//!                                                         |
//!                                           compaction commit
//!                                                         v
//!                                                  Deprecated
//! ```

mod builder;
mod entry;
mod writer;

pub use builder::{SealedSegment, SegmentBuilder};
pub use entry::{BlockEntry, DeleteBitmap, SegmentEntry, SegmentInfo, SegmentStatus};
pub use writer::SegmentWriter;
