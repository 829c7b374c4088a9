//! CLI module
//!
//! Command-line interface for the tracker and peer binaries.

pub mod args;
pub mod config;
pub mod progress;

pub use args::{CliArgs, Command, PeerArgs, TrackerArgs};
pub use config::{PeerConfig, TrackerConfig, PEER_PORT_RANGE};
pub use progress::{format_indices, DownloadStats, ProgressDisplay};
