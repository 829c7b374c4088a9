//! swarm-share
//!
//! Segment-swarm file sharing: a tracker that allocates segment ranges
//! across peers, and peers that fetch, store, resume and serve segments.

pub mod error;
pub mod protocol;
pub mod storage;
pub mod transport;
pub mod tracker;
pub mod peer;
pub mod cli;

pub use error::{ErrorKind, SwarmError, SwarmResult};

pub use protocol::{
    Assignment, DownloadMode, DownloadPlan, FileAnnouncement, PeerRequest, PeerResponse,
    TrackerRequest, TrackerResponse,
};
pub use storage::{DownloadState, SegmentStore, StateFile};
pub use transport::{LocalTransport, TcpTransport, Transport};
pub use tracker::{allocate, AnnouncePolicy, LivenessMonitor, Tracker, TrackerServer};
pub use peer::{DownloadEngine, DownloadOutcome, PeerNode, SegmentServer, TrackerClient};
pub use cli::{CliArgs, Command, PeerConfig, ProgressDisplay, TrackerConfig};
