//! CLI configuration module
//!
//! Validated runtime configuration for the tracker and peer commands.

use crate::cli::args::{PeerArgs, TrackerArgs};
use crate::tracker::AnnouncePolicy;
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::Result;

/// Range the peer picks its listen port from when none is given
pub const PEER_PORT_RANGE: std::ops::RangeInclusive<u16> = 6882..=6890;

/// Configuration for the tracker
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Listen address
    pub listen_addr: String,
    /// Silence after which a peer is evicted
    pub peer_timeout: Duration,
    /// Time between liveness sweeps
    pub sweep_interval: Duration,
    pub announce_policy: AnnouncePolicy,
}

impl TrackerConfig {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &TrackerArgs) -> Self {
        Self {
            listen_addr: args.listen.clone(),
            peer_timeout: Duration::from_secs(args.peer_timeout),
            sweep_interval: Duration::from_secs(args.sweep_interval),
            announce_policy: args.announce_policy,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.trim().is_empty() {
            return Err(anyhow::anyhow!("listen address cannot be empty"));
        }
        if self.peer_timeout.is_zero() {
            return Err(anyhow::anyhow!("peer_timeout must be at least 1 second"));
        }
        if self.sweep_interval.is_zero() {
            return Err(anyhow::anyhow!("sweep_interval must be at least 1 second"));
        }
        Ok(())
    }
}

/// Configuration for a peer
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Tracker address
    pub tracker_addr: String,
    /// Address the segment server binds
    pub listen_addr: String,
    /// Address this peer is known by in the swarm
    pub peer_addr: String,
    /// Root of all on-disk state
    pub data_dir: PathBuf,
    /// Segment size in bytes
    pub segment_size: usize,
    /// Concurrent sources per download
    pub max_sources: usize,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Files to share on startup
    pub share: Vec<PathBuf>,
    /// Files to download on startup
    pub download: Vec<String>,
}

impl PeerConfig {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &PeerArgs) -> Self {
        let listen_addr = args.listen.clone().unwrap_or_else(|| {
            let port = rand::thread_rng().gen_range(PEER_PORT_RANGE);
            format!("127.0.0.1:{}", port)
        });
        let peer_addr = args.advertise.clone().unwrap_or_else(|| listen_addr.clone());

        Self {
            tracker_addr: args.tracker.clone(),
            listen_addr,
            peer_addr,
            data_dir: args.data_dir.clone(),
            segment_size: args.segment_size,
            max_sources: args.max_sources,
            heartbeat_interval: Duration::from_secs(args.heartbeat_interval),
            request_timeout: Duration::from_secs(args.request_timeout),
            fetch_timeout: Duration::from_secs(args.fetch_timeout),
            share: args.share.clone(),
            download: args.download.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.tracker_addr.trim().is_empty() {
            return Err(anyhow::anyhow!("tracker address cannot be empty"));
        }
        if self.peer_addr.trim().is_empty() {
            return Err(anyhow::anyhow!("peer address cannot be empty"));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("data_dir cannot be empty"));
        }
        if self.segment_size == 0 {
            return Err(anyhow::anyhow!("segment_size must be at least 1 byte"));
        }
        if self.max_sources == 0 {
            return Err(anyhow::anyhow!("max_sources must be at least 1"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(anyhow::anyhow!("heartbeat_interval must be at least 1 second"));
        }
        if self.request_timeout.is_zero() || self.fetch_timeout.is_zero() {
            return Err(anyhow::anyhow!("timeouts must be at least 1 second"));
        }
        Ok(())
    }

    /// Directory holding segment directories
    pub fn segments_dir(&self) -> PathBuf {
        self.data_dir.join("segments")
    }

    /// Directory reconstructed files are written to
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    /// Persisted open downloads
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("download_state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_args() -> PeerArgs {
        PeerArgs {
            tracker: "127.0.0.1:6881".into(),
            listen: None,
            advertise: None,
            data_dir: PathBuf::from("./peer-data"),
            segment_size: 10240,
            max_sources: 3,
            heartbeat_interval: 30,
            request_timeout: 10,
            fetch_timeout: 30,
            share: Vec::new(),
            download: Vec::new(),
        }
    }

    #[test]
    fn test_peer_config_from_args() {
        let config = PeerConfig::from_args(&peer_args());

        let port: u16 = config.listen_addr.rsplit(':').next().unwrap().parse().unwrap();
        assert!(PEER_PORT_RANGE.contains(&port));
        assert_eq!(config.peer_addr, config.listen_addr);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.state_path(), PathBuf::from("./peer-data/download_state.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_advertise_overrides_peer_addr() {
        let mut args = peer_args();
        args.listen = Some("0.0.0.0:7000".into());
        args.advertise = Some("10.0.0.5:7000".into());

        let config = PeerConfig::from_args(&args);
        assert_eq!(config.listen_addr, "0.0.0.0:7000");
        assert_eq!(config.peer_addr, "10.0.0.5:7000");
    }

    #[test]
    fn test_peer_config_validate() {
        let mut args = peer_args();
        args.max_sources = 0;
        assert!(PeerConfig::from_args(&args).validate().is_err());

        let mut args = peer_args();
        args.segment_size = 0;
        assert!(PeerConfig::from_args(&args).validate().is_err());

        let mut args = peer_args();
        args.fetch_timeout = 0;
        assert!(PeerConfig::from_args(&args).validate().is_err());
    }

    #[test]
    fn test_tracker_config_validate() {
        let args = TrackerArgs {
            listen: "0.0.0.0:6881".into(),
            peer_timeout: 120,
            sweep_interval: 30,
            announce_policy: AnnouncePolicy::Monotonic,
        };
        let config = TrackerConfig::from_args(&args);
        assert!(config.validate().is_ok());
        assert_eq!(config.peer_timeout, Duration::from_secs(120));

        let invalid = TrackerConfig { sweep_interval: Duration::ZERO, ..config };
        assert!(invalid.validate().is_err());
    }
}
