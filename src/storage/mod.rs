//! Storage module
//!
//! Segment storage on disk and persisted download state.

pub mod segment;
pub mod resume;

// Re-export segment types
pub use segment::{split_bytes, segment_count, SegmentStore, DEFAULT_SEGMENT_SIZE};

// Re-export download state types
pub use resume::{unix_now, DownloadRecord, DownloadState, StateFile};
