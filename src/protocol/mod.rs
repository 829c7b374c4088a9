//! Swarm protocol module
//!
//! Message records and framing used between peers and the tracker.

pub mod message;
pub mod wire;

// Re-export main types
pub use message::{
    validate_file_name, Assignment, DownloadMode, DownloadPlan, FileAnnouncement, JoinStatus,
    PeerRequest, PeerResponse, PeerRole, PeerStatus, PeerSummary, PendingPlan, ProgressSummary,
    RecoveryData, StoredFile, TrackerRequest, TrackerResponse, ELIGIBILITY_THRESHOLD,
};
pub use wire::{decode_frame, encode_frame, read_frame, read_json, write_frame, write_json, MAX_FRAME_LEN};
