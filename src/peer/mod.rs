//! Peer module
//!
//! Everything that runs on a participating peer: the tracker client, the
//! download engine, the segment server and the node tying them together.

pub mod client;
pub mod engine;
pub mod server;
pub mod node;

// Re-export main types
pub use client::TrackerClient;
pub use engine::{DownloadEngine, DownloadOutcome, DEFAULT_MAX_SOURCES};
pub use server::{respond, SegmentServer};
pub use node::{PeerNode, RECONNECT_ATTEMPTS, RECONNECT_DELAY};
