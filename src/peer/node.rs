//! Peer node
//!
//! Ties a peer's pieces together: tracker membership, sharing local files,
//! heartbeats with reconnection, and the download engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::cli::PeerConfig;
use crate::protocol::{FileAnnouncement, JoinStatus, StoredFile};
use crate::storage::{SegmentStore, StateFile};
use crate::transport::Transport;

use super::client::TrackerClient;
use super::engine::{DownloadEngine, DownloadOutcome};

/// Reconnect attempts after a failed heartbeat
pub const RECONNECT_ATTEMPTS: u32 = 5;
/// Pause between reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// One participant in the swarm
#[derive(Clone)]
pub struct PeerNode {
    client: TrackerClient,
    engine: DownloadEngine,
    store: SegmentStore,
    reconnect_delay: Duration,
}

impl PeerNode {
    pub fn new(config: &PeerConfig, transport: Arc<dyn Transport>) -> Self {
        let client = TrackerClient::new(transport, config.peer_addr.clone());
        let store = SegmentStore::new(config.segments_dir(), config.segment_size);
        let engine = DownloadEngine::new(
            client.clone(),
            store.clone(),
            StateFile::new(config.state_path()),
            config.downloads_dir(),
            config.max_sources,
        );

        Self {
            client,
            engine,
            store,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn peer_addr(&self) -> &str {
        self.client.peer_addr()
    }

    pub fn client(&self) -> &TrackerClient {
        &self.client
    }

    pub fn engine(&self) -> &DownloadEngine {
        &self.engine
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    /// What this peer holds, with open downloads counted against their total
    pub async fn inventory(&self) -> Result<Vec<FileAnnouncement>> {
        let open = self.engine.open_downloads().await;
        let files = self.store.files().await?;

        Ok(files
            .into_iter()
            .map(|file| {
                let total = open
                    .iter()
                    .find(|(name, _)| *name == file.file_name)
                    .map(|(_, record)| record.total_segments)
                    .unwrap_or(file.segments);
                FileAnnouncement {
                    current_segments: file.segments.min(total),
                    num_segments: total,
                    file_name: file.file_name,
                }
            })
            .collect())
    }

    /// Load persisted state and register with the tracker
    pub async fn join(&self) -> Result<JoinStatus> {
        self.engine.load_state().await?;
        let files = self.inventory().await?;
        let status = self
            .client
            .join(files.clone())
            .await
            .context("Failed to join the tracker")?;

        match status {
            JoinStatus::Accepted => info!("Joined swarm as {} with {} files", self.peer_addr(), files.len()),
            JoinStatus::AlreadyMember => {
                // The tracker kept an older view, possibly offline; bring it back
                self.client.reconnect().await.context("Failed to reconnect to the tracker")?;
                self.client.add_files(files).await?;
                info!("Rejoined swarm as {}", self.peer_addr());
            }
        }
        Ok(status)
    }

    /// Split a local file into segments and announce it
    pub async fn share(&self, path: &Path) -> Result<FileAnnouncement> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("Cannot share {}: no usable file name", path.display()))?;

        let segments = self
            .store
            .import_file(path, &file_name)
            .await
            .with_context(|| format!("Failed to share {}", path.display()))?;
        let announcement = FileAnnouncement::complete(file_name, segments);
        self.client.add_files(vec![announcement.clone()]).await?;

        info!("Sharing {} ({} segments)", announcement.file_name, segments);
        Ok(announcement)
    }

    pub async fn download(&self, file_name: &str) -> Result<DownloadOutcome> {
        self.engine.download(file_name).await
    }

    /// Resume every download interrupted by an earlier run
    ///
    /// Plans the tracker still holds for this peer are resumed too, which
    /// covers a lost or deleted state file.
    pub async fn resume_all(&self) -> Vec<(String, DownloadOutcome)> {
        let mut outcomes = self.engine.resume_all().await;

        let plans = match self.client.pending_downloads().await {
            Ok(plans) => plans,
            Err(e) => {
                debug!("Could not list pending downloads: {}", e);
                return outcomes;
            }
        };
        for plan in plans {
            if outcomes.iter().any(|(file_name, _)| *file_name == plan.file_name) {
                continue;
            }
            let Some(total) = plan.entries.iter().map(|a| a.num_segments).max() else {
                continue;
            };
            info!("Tracker holds an open plan for {}, resuming it", plan.file_name);
            match self.engine.resume(&plan.file_name, total).await {
                Ok(outcome) => outcomes.push((plan.file_name, outcome)),
                Err(e) => warn!("Could not resume {}: {:#}", plan.file_name, e),
            }
        }
        outcomes
    }

    /// Files and segment counts held locally
    pub async fn status(&self) -> Result<Vec<StoredFile>> {
        Ok(self.store.files().await?)
    }

    /// Win the tracker back after a failed heartbeat
    ///
    /// Reconnects up to [`RECONNECT_ATTEMPTS`] times; a tracker that forgot
    /// this peer gets a fresh join instead.
    pub async fn recover(&self) -> Result<()> {
        for attempt in 1..=RECONNECT_ATTEMPTS {
            match self.client.reconnect().await {
                Ok(recovered) => {
                    info!(
                        "Reconnected to tracker as {:?} with {} files, {} downloads open",
                        recovered.role,
                        recovered.files.len(),
                        recovered.downloading.len()
                    );
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {
                    info!("Tracker no longer knows {}, joining again", self.peer_addr());
                    self.join().await?;
                    return Ok(());
                }
                Err(e) => {
                    warn!("Reconnect attempt {}/{} failed: {}", attempt, RECONNECT_ATTEMPTS, e);
                    if attempt < RECONNECT_ATTEMPTS {
                        tokio::time::sleep(self.reconnect_delay).await;
                    }
                }
            }
        }
        anyhow::bail!("Could not reach the tracker after {} attempts", RECONNECT_ATTEMPTS)
    }

    /// Heartbeat forever, recovering membership when a heartbeat fails
    pub async fn run_heartbeat_loop(&self, interval: Duration) {
        info!("Starting heartbeat loop (interval: {}s)", interval.as_secs());
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.client.heartbeat().await {
                Ok(()) => debug!("Heartbeat sent"),
                Err(e) => {
                    warn!("Heartbeat failed: {}", e);
                    if let Err(e) = self.recover().await {
                        error!("{:#}", e);
                    }
                }
            }
        }
    }

    /// Persist open downloads and leave the swarm
    pub async fn shutdown(&self) -> Result<()> {
        self.engine.flush().await.context("Failed to save download state")?;
        if let Err(e) = self.client.disconnect().await {
            debug!("Disconnect notice not delivered: {}", e);
        }
        info!("Peer {} stopped", self.peer_addr());
        Ok(())
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.engine.output_path(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PeerStatus;
    use crate::tracker::Tracker;
    use crate::transport::LocalTransport;
    use std::time::Instant;

    fn config(root: &Path, addr: &str) -> PeerConfig {
        PeerConfig {
            tracker_addr: "tracker".into(),
            listen_addr: addr.into(),
            peer_addr: addr.into(),
            data_dir: root.join(addr),
            segment_size: 8,
            max_sources: 3,
            heartbeat_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(30),
            share: Vec::new(),
            download: Vec::new(),
        }
    }

    fn test_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("swarm_node_{}_{}", name, rand::random::<u32>()))
    }

    async fn node(root: &Path, addr: &str, transport: &Arc<LocalTransport>) -> PeerNode {
        let config = config(root, addr);
        let node = PeerNode::new(&config, transport.clone()).with_reconnect_delay(Duration::from_millis(10));
        transport.register_peer(addr, node.store().clone()).await;
        node
    }

    #[tokio::test]
    async fn test_share_and_download() {
        let root = test_root("share");
        let transport = Arc::new(LocalTransport::new(Arc::new(Tracker::default())));

        let seed = node(&root, "seed", &transport).await;
        seed.join().await.unwrap();
        let source = root.join("report.txt");
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(&source, b"twenty-five bytes of text").await.unwrap();
        let shared = seed.share(&source).await.unwrap();
        assert_eq!(shared, FileAnnouncement::complete("report.txt", 4));

        let leech = node(&root, "leech", &transport).await;
        leech.join().await.unwrap();
        let outcome = leech.download("report.txt").await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(
            tokio::fs::read(leech.output_path("report.txt")).await.unwrap(),
            b"twenty-five bytes of text"
        );

        let status = leech.status().await.unwrap();
        assert_eq!(status, vec![StoredFile { file_name: "report.txt".into(), segments: 4 }]);

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_rejoin_announces_inventory() {
        let root = test_root("rejoin");
        let tracker = Arc::new(Tracker::default());
        let transport = Arc::new(LocalTransport::new(tracker.clone()));

        let seed = node(&root, "seed", &transport).await;
        seed.store().store("a.bin", 0, b"abcdefgh").await.unwrap();
        seed.store().store("a.bin", 1, b"ij").await.unwrap();
        seed.join().await.unwrap();

        // Evicted by the liveness sweep
        tracker.sweep(Instant::now() + Duration::from_secs(600), Duration::from_secs(120)).await;
        assert_eq!(tracker.peer_count().await, 0);

        seed.recover().await.unwrap();
        let peers = tracker.list_peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].files, vec![FileAnnouncement::complete("a.bin", 2)]);

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_recover_gives_up_when_tracker_is_down() {
        let root = test_root("down");
        let transport = Arc::new(LocalTransport::new(Arc::new(Tracker::default())));
        let peer = node(&root, "peer", &transport).await;
        peer.join().await.unwrap();

        transport.set_tracker_down(true);
        assert!(peer.recover().await.is_err());

        transport.set_tracker_down(false);
        peer.recover().await.unwrap();

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_shutdown_marks_peer_offline() {
        let root = test_root("shutdown");
        let tracker = Arc::new(Tracker::default());
        let transport = Arc::new(LocalTransport::new(tracker.clone()));
        let peer = node(&root, "peer", &transport).await;
        peer.join().await.unwrap();

        peer.shutdown().await.unwrap();
        let peers = tracker.list_peers().await;
        assert_eq!(peers[0].status, PeerStatus::Offline);

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_resume_all_picks_up_tracker_plans() {
        let root = test_root("pending");
        let tracker = Arc::new(Tracker::default());
        let transport = Arc::new(LocalTransport::new(tracker.clone()));

        let seed = node(&root, "seed", &transport).await;
        seed.join().await.unwrap();
        let source = root.join("b.txt");
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(&source, b"planned but never started").await.unwrap();
        seed.share(&source).await.unwrap();

        // Plan exists on the tracker, no local download record
        let leech = node(&root, "leech", &transport).await;
        leech.join().await.unwrap();
        leech.client().request_download("b.txt").await.unwrap();
        assert!(leech.engine().open_downloads().await.is_empty());

        let outcomes = leech.resume_all().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, "b.txt");
        assert!(outcomes[0].1.is_complete());
        assert!(tracker.pending_downloads("leech").await.is_empty());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_restarted_seed_serves_again() {
        let root = test_root("restart");
        let tracker = Arc::new(Tracker::default());
        let transport = Arc::new(LocalTransport::new(tracker.clone()));

        let seed = node(&root, "seed", &transport).await;
        seed.join().await.unwrap();
        let source = root.join("a.txt");
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(&source, b"restart me please").await.unwrap();
        seed.share(&source).await.unwrap();
        seed.shutdown().await.unwrap();

        // Same address and data dir, before the tracker evicts it
        let restarted = node(&root, "seed", &transport).await;
        assert_eq!(restarted.join().await.unwrap(), JoinStatus::AlreadyMember);
        restarted.client().heartbeat().await.unwrap();
        let peers = tracker.list_peers().await;
        assert_eq!(peers[0].status, PeerStatus::Online);

        let leech = node(&root, "leech", &transport).await;
        leech.join().await.unwrap();
        let outcome = leech.download("a.txt").await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(tokio::fs::read(leech.output_path("a.txt")).await.unwrap(), b"restart me please");

        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
