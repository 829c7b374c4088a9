//! Tracker service
//!
//! Owns all tracker state and answers [`TrackerRequest`]s. Every mutation
//! takes the write lock; queries work on a read-locked snapshot.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{SwarmError, SwarmResult};
use crate::protocol::{
    Assignment, DownloadMode, DownloadPlan, FileAnnouncement, JoinStatus, PeerStatus, PeerSummary,
    PendingPlan, ProgressSummary, RecoveryData, TrackerRequest, TrackerResponse,
};

use super::allocator::allocate;
use super::liveness;
use super::plan::{PlanTable, ProgressTable};
use super::registry::{AnnouncePolicy, EligiblePeer, SwarmRegistry};

/// Everything the tracker knows
#[derive(Debug, Default)]
pub struct TrackerState {
    pub registry: SwarmRegistry,
    pub plans: PlanTable,
    pub progress: ProgressTable,
}

impl TrackerState {
    pub fn new(policy: AnnouncePolicy) -> Self {
        Self {
            registry: SwarmRegistry::new(policy),
            plans: PlanTable::new(),
            progress: ProgressTable::new(),
        }
    }

    /// Eligible sources for `file_name`, never including the requester itself
    fn sources_for(&self, requester: &str, file_name: &str) -> Vec<EligiblePeer> {
        self.registry
            .list_eligible_peers(file_name)
            .into_iter()
            .filter(|p| p.peer_addr != requester)
            .collect()
    }
}

/// Keep only assignments that still cover one of `missing`
fn retain_missing(assignments: Vec<Assignment>, missing: &[u32]) -> Vec<Assignment> {
    assignments
        .into_iter()
        .filter(|a| missing.iter().any(|i| a.indices().contains(i)))
        .collect()
}

/// The coordination authority
#[derive(Debug)]
pub struct Tracker {
    state: RwLock<TrackerState>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(AnnouncePolicy::default())
    }
}

impl Tracker {
    pub fn new(policy: AnnouncePolicy) -> Self {
        Self {
            state: RwLock::new(TrackerState::new(policy)),
        }
    }

    /// Answer one request; failures become `Error` replies
    pub async fn handle(&self, request: TrackerRequest) -> TrackerResponse {
        let name = request.name();
        if let Err(e) = request.validate() {
            warn!("Rejected {} request: {}", name, e);
            return TrackerResponse::error(&e);
        }

        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("{} request failed: {}", name, e);
                TrackerResponse::error(&e)
            }
        }
    }

    async fn dispatch(&self, request: TrackerRequest) -> SwarmResult<TrackerResponse> {
        let response = match request {
            TrackerRequest::Join { peer_addr, files } => TrackerResponse::Joined {
                status: self.join(&peer_addr, &files).await?,
            },
            TrackerRequest::ListPeers => TrackerResponse::Peers {
                peers: self.list_peers().await,
            },
            TrackerRequest::ListFiles => TrackerResponse::Files {
                files: self.list_files().await,
            },
            TrackerRequest::AddFiles { peer_addr, files } => TrackerResponse::Possessions {
                files: self.add_files(&peer_addr, &files).await?,
            },
            TrackerRequest::RequestDownload { peer_addr, file_name } => {
                TrackerResponse::Download(self.request_download(&peer_addr, &file_name).await?)
            }
            TrackerRequest::ReportSegment { peer_addr, file_name, segment_index, source_peer, total_segments } => {
                self.report_segment(&peer_addr, &file_name, segment_index, &source_peer, total_segments)
                    .await?;
                TrackerResponse::Ack
            }
            TrackerRequest::RequestResume { peer_addr, file_name } => {
                match self.request_resume(&peer_addr, &file_name).await? {
                    Some(plan) => TrackerResponse::ResumeAvailable {
                        total_segments: plan.total_segments,
                        missing: plan.missing,
                        assignments: plan.assignments,
                    },
                    None => TrackerResponse::NoResumeData,
                }
            }
            TrackerRequest::SyncFragments { peer_addr, file_name, local_indices, total_segments } => {
                TrackerResponse::Progress(
                    self.sync_fragments(&peer_addr, &file_name, &local_indices, total_segments)
                        .await?,
                )
            }
            TrackerRequest::CompleteDownload { peer_addr, file_name } => {
                self.complete_download(&peer_addr, &file_name).await?;
                TrackerResponse::Ack
            }
            TrackerRequest::Heartbeat { peer_addr } => {
                self.heartbeat(&peer_addr).await?;
                TrackerResponse::Ack
            }
            TrackerRequest::Disconnect { peer_addr } => {
                self.disconnect(&peer_addr).await?;
                TrackerResponse::Ack
            }
            TrackerRequest::Reconnect { peer_addr } => {
                TrackerResponse::Recovered(self.reconnect(&peer_addr).await?)
            }
            TrackerRequest::PendingDownloads { peer_addr } => TrackerResponse::Pending {
                plans: self.pending_downloads(&peer_addr).await,
            },
        };
        Ok(response)
    }

    pub async fn join(&self, peer_addr: &str, files: &[FileAnnouncement]) -> SwarmResult<JoinStatus> {
        let mut state = self.state.write().await;
        state.registry.join(peer_addr, files, Instant::now())
    }

    pub async fn list_peers(&self) -> Vec<PeerSummary> {
        let state = self.state.read().await;
        state.registry.list_peers(Instant::now())
    }

    pub async fn list_files(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.registry.list_files()
    }

    /// Announce more files for a known peer and return everything it holds
    pub async fn add_files(&self, peer_addr: &str, files: &[FileAnnouncement]) -> SwarmResult<Vec<FileAnnouncement>> {
        let mut state = self.state.write().await;
        let now = Instant::now();
        for file in files {
            state.registry.announce(peer_addr, file, now)?;
        }
        info!("Peer {} announced {} files", peer_addr, files.len());
        Ok(state.registry.possessions_of(peer_addr))
    }

    /// Allocate sources for `file_name` and record the plan
    ///
    /// When progress is already recorded for the pair only the missing
    /// indices are handed out.
    pub async fn request_download(&self, requester: &str, file_name: &str) -> SwarmResult<DownloadPlan> {
        let mut state = self.state.write().await;
        let sources = state.sources_for(requester, file_name);
        let assignments = allocate(file_name, &sources)?;
        let total_segments = assignments.iter().map(|a| a.end_segment).max().unwrap_or(0);

        let (mode, missing, assignments) = match state.progress.get(requester, file_name) {
            Some(progress) => {
                let missing: Vec<u32> = (0..total_segments)
                    .filter(|i| !progress.downloaded.contains(i))
                    .collect();
                let assignments = retain_missing(assignments, &missing);
                (DownloadMode::Resume, missing, assignments)
            }
            None => (DownloadMode::New, (0..total_segments).collect(), assignments),
        };

        state.plans.insert(requester, file_name, assignments.clone(), Instant::now());
        info!(
            "Planned {:?} download of {} for {}: {} missing across {} sources",
            mode,
            file_name,
            requester,
            missing.len(),
            assignments.len()
        );

        Ok(DownloadPlan {
            file_name: file_name.to_string(),
            mode,
            total_segments,
            assignments,
            missing,
        })
    }

    /// Record that `requester` stored segment `index` fetched from `source`
    pub async fn report_segment(
        &self,
        requester: &str,
        file_name: &str,
        index: u32,
        source: &str,
        total_segments: u32,
    ) -> SwarmResult<()> {
        let mut state = self.state.write().await;
        let now = Instant::now();

        let count = state
            .progress
            .record(requester, file_name, index, total_segments, now)
            .count();
        state.plans.advance(requester, file_name, source, index);

        if state.registry.contains(requester) {
            let announcement = FileAnnouncement {
                file_name: file_name.to_string(),
                num_segments: total_segments,
                current_segments: count,
            };
            state.registry.announce(requester, &announcement, now)?;
        }

        debug!(
            "Peer {} stored segment {} of {} from {} ({}/{})",
            requester, index, file_name, source, count, total_segments
        );
        Ok(())
    }

    /// Plan for the missing part of a recorded download, if any
    pub async fn request_resume(&self, requester: &str, file_name: &str) -> SwarmResult<Option<DownloadPlan>> {
        let mut state = self.state.write().await;
        let Some(progress) = state.progress.get(requester, file_name) else {
            debug!("No resume data for {} / {}", requester, file_name);
            return Ok(None);
        };
        let total_segments = progress.total_segments;
        let missing = progress.missing();

        let sources = state.sources_for(requester, file_name);
        let assignments = if sources.is_empty() {
            warn!("Resume of {} for {} has no eligible sources", file_name, requester);
            Vec::new()
        } else {
            retain_missing(allocate(file_name, &sources)?, &missing)
        };

        state.plans.insert(requester, file_name, assignments.clone(), Instant::now());
        info!("Resuming {} for {}: {} segments missing", file_name, requester, missing.len());

        Ok(Some(DownloadPlan {
            file_name: file_name.to_string(),
            mode: DownloadMode::Resume,
            total_segments,
            assignments,
            missing,
        }))
    }

    /// Merge a peer's local inventory into its progress record
    pub async fn sync_fragments(
        &self,
        peer_addr: &str,
        file_name: &str,
        local_indices: &[u32],
        total_segments: u32,
    ) -> SwarmResult<ProgressSummary> {
        let mut state = self.state.write().await;
        let now = Instant::now();

        let progress = state
            .progress
            .merge(peer_addr, file_name, local_indices, total_segments, now);
        let summary = progress.summary(file_name);
        let announcement = FileAnnouncement {
            file_name: file_name.to_string(),
            num_segments: progress.total_segments,
            current_segments: progress.count(),
        };

        if state.registry.contains(peer_addr) {
            state.registry.announce(peer_addr, &announcement, now)?;
        }

        debug!(
            "Synced {} local segments of {} for {} ({} missing)",
            local_indices.len(),
            file_name,
            peer_addr,
            summary.missing.len()
        );
        Ok(summary)
    }

    /// Close a finished download and mark the file as fully held
    pub async fn complete_download(&self, peer_addr: &str, file_name: &str) -> SwarmResult<()> {
        let mut state = self.state.write().await;
        let progress = state.progress.remove(peer_addr, file_name);
        state.plans.remove(peer_addr, file_name);

        let total = progress
            .map(|p| p.total_segments)
            .or_else(|| state.registry.possession(peer_addr, file_name).map(|p| p.num_segments));

        if let (Some(total), true) = (total, state.registry.contains(peer_addr)) {
            state
                .registry
                .announce(peer_addr, &FileAnnouncement::complete(file_name, total), Instant::now())?;
        }

        info!("Peer {} completed {}", peer_addr, file_name);
        Ok(())
    }

    pub async fn heartbeat(&self, peer_addr: &str) -> SwarmResult<()> {
        let mut state = self.state.write().await;
        state.registry.touch(peer_addr, Instant::now())
    }

    /// Mark a peer offline; it stays known but is never offered as a source
    pub async fn disconnect(&self, peer_addr: &str) -> SwarmResult<()> {
        let mut state = self.state.write().await;
        state.registry.set_status(peer_addr, PeerStatus::Offline, Instant::now())?;
        info!("Peer {} disconnected", peer_addr);
        Ok(())
    }

    /// Bring a known peer back online and return what it held
    pub async fn reconnect(&self, peer_addr: &str) -> SwarmResult<RecoveryData> {
        let mut state = self.state.write().await;
        if !state.registry.contains(peer_addr) {
            return Err(SwarmError::not_found_with_resource(
                format!("Peer {} is not registered, join again", peer_addr),
                peer_addr.to_string(),
            ));
        }
        state.registry.set_status(peer_addr, PeerStatus::Online, Instant::now())?;
        info!("Peer {} reconnected", peer_addr);

        Ok(RecoveryData {
            role: state.registry.role(peer_addr),
            files: state.registry.possessions_of(peer_addr),
            downloading: state.progress.for_peer(peer_addr),
        })
    }

    pub async fn pending_downloads(&self, peer_addr: &str) -> Vec<PendingPlan> {
        let state = self.state.read().await;
        state.plans.pending_for(peer_addr)
    }

    /// Evict peers idle for longer than `timeout`
    pub async fn sweep(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut state = self.state.write().await;
        liveness::sweep(&mut state, now, timeout)
    }

    pub async fn peer_count(&self) -> usize {
        self.state.read().await.registry.peer_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    async fn tracker_with_seeds(seeds: &[&str], file: &str, segments: u32) -> Tracker {
        let tracker = Tracker::default();
        for seed in seeds {
            tracker
                .join(seed, &[FileAnnouncement::complete(file, segments)])
                .await
                .unwrap();
        }
        tracker
    }

    #[tokio::test]
    async fn test_two_seeds_split_the_file() {
        let tracker = tracker_with_seeds(&["p1", "p2"], "a.bin", 10).await;
        tracker.join("req", &[]).await.unwrap();

        let plan = tracker.request_download("req", "a.bin").await.unwrap();
        assert_eq!(plan.mode, DownloadMode::New);
        assert_eq!(plan.total_segments, 10);
        assert_eq!(plan.missing, (0..10).collect::<Vec<_>>());

        let ranges: Vec<(&str, u32, u32)> = plan
            .assignments
            .iter()
            .map(|a| (a.peer_addr.as_str(), a.start_segment, a.end_segment))
            .collect();
        assert_eq!(ranges, vec![("p1", 0, 5), ("p2", 5, 10)]);
    }

    #[tokio::test]
    async fn test_no_eligible_peers_creates_no_plan() {
        let tracker = Tracker::default();
        tracker
            .join("weak", &[FileAnnouncement { file_name: "a.bin".into(), num_segments: 10, current_segments: 1 }])
            .await
            .unwrap();

        let err = tracker.request_download("req", "a.bin").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(tracker.pending_downloads("req").await.is_empty());
    }

    #[tokio::test]
    async fn test_requester_is_not_its_own_source() {
        let tracker = tracker_with_seeds(&["seed"], "a.bin", 4).await;
        let err = tracker.request_download("seed", "a.bin").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_reports_advance_plan_and_possession() {
        let tracker = tracker_with_seeds(&["p1", "p2"], "a.bin", 4).await;
        tracker.join("req", &[]).await.unwrap();
        tracker.request_download("req", "a.bin").await.unwrap();

        tracker.report_segment("req", "a.bin", 0, "p1", 4).await.unwrap();
        tracker.report_segment("req", "a.bin", 1, "p1", 4).await.unwrap();

        let pending = tracker.pending_downloads("req").await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entries.len(), 1);
        assert_eq!(pending[0].entries[0].peer_addr, "p2");

        // 2 of 4 held: the requester is now an eligible source itself
        let peers = tracker.list_peers().await;
        let req = peers.iter().find(|p| p.peer_addr == "req").unwrap();
        assert_eq!(req.files[0].current_segments, 2);
    }

    #[tokio::test]
    async fn test_second_request_resumes_missing_only() {
        let tracker = tracker_with_seeds(&["seed"], "a.bin", 5).await;
        tracker.join("req", &[]).await.unwrap();
        tracker.request_download("req", "a.bin").await.unwrap();
        for i in 0..3 {
            tracker.report_segment("req", "a.bin", i, "seed", 5).await.unwrap();
        }

        let plan = tracker.request_download("req", "a.bin").await.unwrap();
        assert_eq!(plan.mode, DownloadMode::Resume);
        assert_eq!(plan.missing, vec![3, 4]);
        assert_eq!(plan.assignments.len(), 1);
    }

    #[tokio::test]
    async fn test_request_resume() {
        let tracker = tracker_with_seeds(&["seed"], "a.bin", 5).await;
        tracker.join("req", &[]).await.unwrap();

        assert!(tracker.request_resume("req", "a.bin").await.unwrap().is_none());

        tracker.sync_fragments("req", "a.bin", &[0, 1, 2], 5).await.unwrap();
        let plan = tracker.request_resume("req", "a.bin").await.unwrap().unwrap();
        assert_eq!(plan.missing, vec![3, 4]);
        assert_eq!(plan.total_segments, 5);
        assert_eq!(plan.assignments[0].peer_addr, "seed");
    }

    #[tokio::test]
    async fn test_resume_without_sources_has_no_assignments() {
        let tracker = Tracker::default();
        tracker.join("req", &[]).await.unwrap();
        tracker.sync_fragments("req", "a.bin", &[0], 3).await.unwrap();

        let plan = tracker.request_resume("req", "a.bin").await.unwrap().unwrap();
        assert_eq!(plan.missing, vec![1, 2]);
        assert!(plan.assignments.is_empty());
    }

    #[tokio::test]
    async fn test_complete_download_clears_progress() {
        let tracker = tracker_with_seeds(&["seed"], "a.bin", 2).await;
        tracker.join("req", &[]).await.unwrap();
        tracker.request_download("req", "a.bin").await.unwrap();
        tracker.report_segment("req", "a.bin", 0, "seed", 2).await.unwrap();

        tracker.complete_download("req", "a.bin").await.unwrap();
        assert!(tracker.request_resume("req", "a.bin").await.unwrap().is_none());
        assert!(tracker.pending_downloads("req").await.is_empty());

        let recovered = tracker.reconnect("req").await.unwrap();
        assert_eq!(recovered.files, vec![FileAnnouncement::complete("a.bin", 2)]);
    }

    #[tokio::test]
    async fn test_disconnect_and_reconnect() {
        let tracker = tracker_with_seeds(&["seed"], "a.bin", 4).await;
        tracker.disconnect("seed").await.unwrap();
        assert!(tracker.request_download("req", "a.bin").await.is_err());

        let recovered = tracker.reconnect("seed").await.unwrap();
        assert_eq!(recovered.files.len(), 1);
        assert!(tracker.request_download("req", "a.bin").await.is_ok());

        let err = tracker.reconnect("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_peer() {
        let tracker = Tracker::default();
        assert!(tracker.heartbeat("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_handle_rejects_invalid_request() {
        let tracker = Tracker::default();
        let reply = tracker
            .handle(TrackerRequest::RequestDownload {
                peer_addr: "req".into(),
                file_name: "../secret".into(),
            })
            .await;
        assert!(matches!(reply, TrackerResponse::Error { kind: ErrorKind::Validation, .. }));
    }

    #[tokio::test]
    async fn test_handle_dispatch() {
        let tracker = tracker_with_seeds(&["seed"], "a.bin", 4).await;

        let reply = tracker.handle(TrackerRequest::ListFiles).await;
        assert_eq!(reply, TrackerResponse::Files { files: vec!["a.bin".into()] });

        let reply = tracker
            .handle(TrackerRequest::Join { peer_addr: "seed".into(), files: vec![] })
            .await;
        assert_eq!(reply, TrackerResponse::Joined { status: JoinStatus::AlreadyMember });

        let reply = tracker
            .handle(TrackerRequest::RequestResume { peer_addr: "req".into(), file_name: "a.bin".into() })
            .await;
        assert_eq!(reply, TrackerResponse::NoResumeData);
    }
}
