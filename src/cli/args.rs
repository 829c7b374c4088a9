//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::tracker::AnnouncePolicy;

/// CLI arguments for swarm-share
#[derive(Debug, Parser)]
#[command(name = "swarm-share")]
#[command(about = "Segment-swarm file sharing: a tracker and its peers", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the tracker
    Tracker(TrackerArgs),
    /// Run a peer: share files, download files and serve segments
    Peer(PeerArgs),
    /// List the files known to a tracker
    Files {
        /// Tracker address
        #[arg(short, long, value_name = "ADDR")]
        tracker: String,
    },
    /// List the peers known to a tracker
    Peers {
        /// Tracker address
        #[arg(short, long, value_name = "ADDR")]
        tracker: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct TrackerArgs {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:6881")]
    pub listen: String,

    /// Seconds without a heartbeat before a peer is evicted
    #[arg(long, default_value_t = 120)]
    pub peer_timeout: u64,

    /// Seconds between liveness sweeps
    #[arg(long, default_value_t = 30)]
    pub sweep_interval: u64,

    /// How an announce with fewer segments than recorded is treated
    #[arg(long, default_value = "monotonic", value_parser = clap::value_parser!(AnnouncePolicy))]
    pub announce_policy: AnnouncePolicy,
}

#[derive(Debug, Clone, Args)]
pub struct PeerArgs {
    /// Tracker address
    #[arg(short, long, value_name = "ADDR")]
    pub tracker: String,

    /// Address the segment server listens on (random port 6882-6890 when omitted)
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Address other peers should use to reach this one (defaults to the listen address)
    #[arg(long, value_name = "ADDR")]
    pub advertise: Option<String>,

    /// Directory holding segments, finished downloads and download state
    #[arg(short, long, value_name = "DIR", default_value = "./peer-data")]
    pub data_dir: PathBuf,

    /// Segment size in bytes
    #[arg(long, default_value_t = 10240)]
    pub segment_size: usize,

    /// Maximum number of sources fetched from at once
    #[arg(long, default_value_t = 3)]
    pub max_sources: usize,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = 30)]
    pub heartbeat_interval: u64,

    /// Timeout for tracker requests in seconds
    #[arg(long, default_value_t = 10)]
    pub request_timeout: u64,

    /// Timeout for one segment fetch in seconds
    #[arg(long, default_value_t = 30)]
    pub fetch_timeout: u64,

    /// File to share (repeatable)
    #[arg(short, long, value_name = "FILE")]
    pub share: Vec<PathBuf>,

    /// File name to download (repeatable)
    #[arg(short = 'g', long = "download", value_name = "NAME")]
    pub download: Vec<String>,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_defaults() {
        let args = CliArgs::try_parse_from(["swarm-share", "tracker"]).unwrap();
        let Command::Tracker(tracker) = args.command else {
            panic!("expected tracker command");
        };
        assert_eq!(tracker.listen, "0.0.0.0:6881");
        assert_eq!(tracker.peer_timeout, 120);
        assert_eq!(tracker.sweep_interval, 30);
        assert_eq!(tracker.announce_policy, AnnouncePolicy::Monotonic);
    }

    #[test]
    fn test_peer_arguments() {
        let args = CliArgs::try_parse_from([
            "swarm-share",
            "-v",
            "peer",
            "--tracker",
            "127.0.0.1:6881",
            "--listen",
            "127.0.0.1:7001",
            "--share",
            "a.bin",
            "--share",
            "b.bin",
            "--download",
            "c.bin",
            "--max-sources",
            "1",
        ])
        .unwrap();

        assert!(args.is_verbose());
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
        let Command::Peer(peer) = args.command else {
            panic!("expected peer command");
        };
        assert_eq!(peer.tracker, "127.0.0.1:6881");
        assert_eq!(peer.listen.as_deref(), Some("127.0.0.1:7001"));
        assert_eq!(peer.share, vec![PathBuf::from("a.bin"), PathBuf::from("b.bin")]);
        assert_eq!(peer.download, vec!["c.bin".to_string()]);
        assert_eq!(peer.max_sources, 1);
        assert_eq!(peer.segment_size, 10240);
        assert_eq!(peer.data_dir, PathBuf::from("./peer-data"));
    }

    #[test]
    fn test_announce_policy_flag() {
        let args = CliArgs::try_parse_from(["swarm-share", "tracker", "--announce-policy", "overwrite"]).unwrap();
        let Command::Tracker(tracker) = args.command else {
            panic!("expected tracker command");
        };
        assert_eq!(tracker.announce_policy, AnnouncePolicy::Overwrite);
    }

    #[test]
    fn test_quiet_log_level() {
        let args = CliArgs::try_parse_from(["swarm-share", "--quiet", "files", "--tracker", "t:1"]).unwrap();
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
