//! Tracker client
//!
//! Typed wrappers around the tracker requests a peer sends.

use std::sync::Arc;
use tracing::trace;

use crate::error::{SwarmError, SwarmResult};
use crate::protocol::{
    DownloadMode, DownloadPlan, FileAnnouncement, JoinStatus, PeerSummary, PendingPlan,
    ProgressSummary, RecoveryData, TrackerRequest, TrackerResponse,
};
use crate::transport::Transport;

fn unexpected(operation: &str, response: TrackerResponse) -> SwarmError {
    SwarmError::protocol_error(format!("Unexpected reply to {}: {:?}", operation, response))
}

/// Talks to the tracker on behalf of one peer
#[derive(Clone)]
pub struct TrackerClient {
    transport: Arc<dyn Transport>,
    peer_addr: String,
}

impl TrackerClient {
    pub fn new(transport: Arc<dyn Transport>, peer_addr: impl Into<String>) -> Self {
        Self {
            transport,
            peer_addr: peer_addr.into(),
        }
    }

    /// Address this peer is known by
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    async fn call(&self, request: TrackerRequest) -> SwarmResult<TrackerResponse> {
        trace!("{} -> tracker: {}", self.peer_addr, request.name());
        self.transport.call_tracker(request).await?.into_result()
    }

    pub async fn join(&self, files: Vec<FileAnnouncement>) -> SwarmResult<JoinStatus> {
        let request = TrackerRequest::Join {
            peer_addr: self.peer_addr.clone(),
            files,
        };
        match self.call(request).await? {
            TrackerResponse::Joined { status } => Ok(status),
            other => Err(unexpected("join", other)),
        }
    }

    pub async fn list_peers(&self) -> SwarmResult<Vec<PeerSummary>> {
        match self.call(TrackerRequest::ListPeers).await? {
            TrackerResponse::Peers { peers } => Ok(peers),
            other => Err(unexpected("list_peers", other)),
        }
    }

    pub async fn list_files(&self) -> SwarmResult<Vec<String>> {
        match self.call(TrackerRequest::ListFiles).await? {
            TrackerResponse::Files { files } => Ok(files),
            other => Err(unexpected("list_files", other)),
        }
    }

    pub async fn add_files(&self, files: Vec<FileAnnouncement>) -> SwarmResult<Vec<FileAnnouncement>> {
        let request = TrackerRequest::AddFiles {
            peer_addr: self.peer_addr.clone(),
            files,
        };
        match self.call(request).await? {
            TrackerResponse::Possessions { files } => Ok(files),
            other => Err(unexpected("add_files", other)),
        }
    }

    pub async fn request_download(&self, file_name: &str) -> SwarmResult<DownloadPlan> {
        let request = TrackerRequest::RequestDownload {
            peer_addr: self.peer_addr.clone(),
            file_name: file_name.to_string(),
        };
        match self.call(request).await? {
            TrackerResponse::Download(plan) => Ok(plan),
            other => Err(unexpected("request_download", other)),
        }
    }

    pub async fn report_segment(&self, file_name: &str, segment_index: u32, source_peer: &str, total_segments: u32) -> SwarmResult<()> {
        let request = TrackerRequest::ReportSegment {
            peer_addr: self.peer_addr.clone(),
            file_name: file_name.to_string(),
            segment_index,
            source_peer: source_peer.to_string(),
            total_segments,
        };
        match self.call(request).await? {
            TrackerResponse::Ack => Ok(()),
            other => Err(unexpected("report_segment", other)),
        }
    }

    /// `None` when the tracker holds no progress for this file
    pub async fn request_resume(&self, file_name: &str) -> SwarmResult<Option<DownloadPlan>> {
        let request = TrackerRequest::RequestResume {
            peer_addr: self.peer_addr.clone(),
            file_name: file_name.to_string(),
        };
        match self.call(request).await? {
            TrackerResponse::ResumeAvailable { total_segments, missing, assignments } => Ok(Some(DownloadPlan {
                file_name: file_name.to_string(),
                mode: DownloadMode::Resume,
                total_segments,
                assignments,
                missing,
            })),
            TrackerResponse::NoResumeData => Ok(None),
            other => Err(unexpected("request_resume", other)),
        }
    }

    pub async fn sync_fragments(&self, file_name: &str, local_indices: Vec<u32>, total_segments: u32) -> SwarmResult<ProgressSummary> {
        let request = TrackerRequest::SyncFragments {
            peer_addr: self.peer_addr.clone(),
            file_name: file_name.to_string(),
            local_indices,
            total_segments,
        };
        match self.call(request).await? {
            TrackerResponse::Progress(summary) => Ok(summary),
            other => Err(unexpected("sync_fragments", other)),
        }
    }

    pub async fn complete_download(&self, file_name: &str) -> SwarmResult<()> {
        let request = TrackerRequest::CompleteDownload {
            peer_addr: self.peer_addr.clone(),
            file_name: file_name.to_string(),
        };
        match self.call(request).await? {
            TrackerResponse::Ack => Ok(()),
            other => Err(unexpected("complete_download", other)),
        }
    }

    pub async fn heartbeat(&self) -> SwarmResult<()> {
        let request = TrackerRequest::Heartbeat {
            peer_addr: self.peer_addr.clone(),
        };
        match self.call(request).await? {
            TrackerResponse::Ack => Ok(()),
            other => Err(unexpected("heartbeat", other)),
        }
    }

    pub async fn disconnect(&self) -> SwarmResult<()> {
        let request = TrackerRequest::Disconnect {
            peer_addr: self.peer_addr.clone(),
        };
        match self.call(request).await? {
            TrackerResponse::Ack => Ok(()),
            other => Err(unexpected("disconnect", other)),
        }
    }

    pub async fn reconnect(&self) -> SwarmResult<RecoveryData> {
        let request = TrackerRequest::Reconnect {
            peer_addr: self.peer_addr.clone(),
        };
        match self.call(request).await? {
            TrackerResponse::Recovered(data) => Ok(data),
            other => Err(unexpected("reconnect", other)),
        }
    }

    pub async fn pending_downloads(&self) -> SwarmResult<Vec<PendingPlan>> {
        let request = TrackerRequest::PendingDownloads {
            peer_addr: self.peer_addr.clone(),
        };
        match self.call(request).await? {
            TrackerResponse::Pending { plans } => Ok(plans),
            other => Err(unexpected("pending_downloads", other)),
        }
    }
}
