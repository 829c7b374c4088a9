//! Tracker module
//!
//! Peer discovery, segment allocation and progress bookkeeping.

pub mod registry;
pub mod allocator;
pub mod plan;
pub mod liveness;
pub mod service;
pub mod server;

// Re-export main types
pub use registry::{AnnouncePolicy, EligiblePeer, FilePossession, PeerRecord, SwarmRegistry};
pub use allocator::allocate;
pub use plan::{DownloadProgress, PlanTable, ProgressTable, TransferPlan};
pub use liveness::{sweep, LivenessMonitor, DEFAULT_PEER_TIMEOUT, DEFAULT_SWEEP_INTERVAL};
pub use service::{Tracker, TrackerState};
pub use server::TrackerServer;
