//! Swarm protocol messages
//!
//! Defines every request and response exchanged between peers and the
//! tracker, and between two peers. Messages are internally tagged JSON
//! documents and are validated at the boundary before they reach the
//! tracker state or the segment store.

use std::ops::Range;
use serde::{Serialize, Deserialize};
use tracing::trace;

use crate::error::{ErrorKind, SwarmError, SwarmResult};

/// Minimum fraction of a file a peer must hold to be offered as a source
pub const ELIGIBILITY_THRESHOLD: f64 = 0.2;

/// Reject file identifiers that could escape the segment directory
pub fn validate_file_name(file_name: &str) -> SwarmResult<()> {
    if file_name.trim().is_empty() {
        return Err(SwarmError::validation_error_with_field("File name cannot be empty", "file_name"));
    }
    if file_name.contains("..")
        || file_name.contains('/')
        || file_name.contains('\\')
        || file_name.contains('\0')
    {
        trace!("Rejected file name: {:?}", file_name);
        return Err(SwarmError::validation_error_with_field(
            format!("Invalid file name: {}", file_name),
            "file_name",
        ));
    }
    Ok(())
}

fn validate_peer_addr(peer_addr: &str) -> SwarmResult<()> {
    if peer_addr.trim().is_empty() {
        return Err(SwarmError::validation_error_with_field("Peer address cannot be empty", "peer_addr"));
    }
    Ok(())
}

/// What a peer holds of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnnouncement {
    pub file_name: String,
    pub num_segments: u32,
    pub current_segments: u32,
}

impl FileAnnouncement {
    /// Announcement for a file held completely
    pub fn complete(file_name: impl Into<String>, num_segments: u32) -> Self {
        Self {
            file_name: file_name.into(),
            num_segments,
            current_segments: num_segments,
        }
    }

    pub fn validate(&self) -> SwarmResult<()> {
        validate_file_name(&self.file_name)?;
        if self.num_segments == 0 {
            return Err(SwarmError::validation_error_with_field(
                format!("File {} declares zero segments", self.file_name),
                "num_segments",
            ));
        }
        if self.current_segments > self.num_segments {
            return Err(SwarmError::validation_error_with_field(
                format!(
                    "File {} declares {} of {} segments",
                    self.file_name, self.current_segments, self.num_segments
                ),
                "current_segments",
            ));
        }
        Ok(())
    }
}

/// Liveness status of a peer as recorded by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Online,
    Offline,
}

/// Role derived from what a peer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Holds at least one file completely
    Seeder,
    /// Holds no complete file
    Leecher,
    /// A seeder currently downloading something else
    Peer,
}

/// Peer entry as returned by `ListPeers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub peer_addr: String,
    pub status: PeerStatus,
    pub role: PeerRole,
    /// Seconds since the tracker last heard from the peer
    pub idle_secs: u64,
    pub files: Vec<FileAnnouncement>,
}

/// One source's share of a transfer: segments `[start_segment, end_segment)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub peer_addr: String,
    pub start_segment: u32,
    pub end_segment: u32,
    pub num_segments: u32,
    pub current_segments: u32,
    pub cursor: u32,
}

impl Assignment {
    pub fn len(&self) -> u32 {
        self.end_segment - self.start_segment
    }

    pub fn is_empty(&self) -> bool {
        self.end_segment <= self.start_segment
    }

    pub fn indices(&self) -> Range<u32> {
        self.start_segment..self.end_segment
    }

    /// Segments this source still owes according to its cursor
    pub fn remaining(&self) -> Range<u32> {
        self.cursor.max(self.start_segment)..self.end_segment
    }
}

/// Answer to `JoinNetwork`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Accepted,
    AlreadyMember,
}

/// Whether a plan starts from zero or continues recorded progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    New,
    Resume,
}

/// Download plan handed to a requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPlan {
    pub file_name: String,
    pub mode: DownloadMode,
    pub total_segments: u32,
    pub assignments: Vec<Assignment>,
    /// Indices still to fetch, ascending
    pub missing: Vec<u32>,
}

/// Tracker-side progress of one (peer, file) download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub file_name: String,
    pub total_segments: u32,
    pub downloaded: Vec<u32>,
    pub missing: Vec<u32>,
}

/// State handed back to a reconnecting peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryData {
    pub role: PeerRole,
    pub files: Vec<FileAnnouncement>,
    pub downloading: Vec<ProgressSummary>,
}

/// Outstanding transfer plan for a requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPlan {
    pub file_name: String,
    pub entries: Vec<Assignment>,
}

/// Requests served by the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerRequest {
    Join { peer_addr: String, files: Vec<FileAnnouncement> },
    ListPeers,
    ListFiles,
    AddFiles { peer_addr: String, files: Vec<FileAnnouncement> },
    RequestDownload { peer_addr: String, file_name: String },
    ReportSegment {
        peer_addr: String,
        file_name: String,
        segment_index: u32,
        source_peer: String,
        total_segments: u32,
    },
    RequestResume { peer_addr: String, file_name: String },
    SyncFragments {
        peer_addr: String,
        file_name: String,
        local_indices: Vec<u32>,
        total_segments: u32,
    },
    CompleteDownload { peer_addr: String, file_name: String },
    Heartbeat { peer_addr: String },
    Disconnect { peer_addr: String },
    Reconnect { peer_addr: String },
    PendingDownloads { peer_addr: String },
}

impl TrackerRequest {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            TrackerRequest::Join { .. } => "join",
            TrackerRequest::ListPeers => "list_peers",
            TrackerRequest::ListFiles => "list_files",
            TrackerRequest::AddFiles { .. } => "add_files",
            TrackerRequest::RequestDownload { .. } => "request_download",
            TrackerRequest::ReportSegment { .. } => "report_segment",
            TrackerRequest::RequestResume { .. } => "request_resume",
            TrackerRequest::SyncFragments { .. } => "sync_fragments",
            TrackerRequest::CompleteDownload { .. } => "complete_download",
            TrackerRequest::Heartbeat { .. } => "heartbeat",
            TrackerRequest::Disconnect { .. } => "disconnect",
            TrackerRequest::Reconnect { .. } => "reconnect",
            TrackerRequest::PendingDownloads { .. } => "pending_downloads",
        }
    }

    /// Validate fields before the request touches tracker state
    pub fn validate(&self) -> SwarmResult<()> {
        match self {
            TrackerRequest::ListPeers | TrackerRequest::ListFiles => Ok(()),
            TrackerRequest::Join { peer_addr, files } | TrackerRequest::AddFiles { peer_addr, files } => {
                validate_peer_addr(peer_addr)?;
                files.iter().try_for_each(FileAnnouncement::validate)
            }
            TrackerRequest::RequestDownload { peer_addr, file_name }
            | TrackerRequest::RequestResume { peer_addr, file_name }
            | TrackerRequest::CompleteDownload { peer_addr, file_name } => {
                validate_peer_addr(peer_addr)?;
                validate_file_name(file_name)
            }
            TrackerRequest::ReportSegment { peer_addr, file_name, segment_index, source_peer, total_segments } => {
                validate_peer_addr(peer_addr)?;
                validate_peer_addr(source_peer)?;
                validate_file_name(file_name)?;
                if *segment_index >= *total_segments {
                    return Err(SwarmError::validation_error_with_field(
                        format!("Segment {} out of range for {} segments", segment_index, total_segments),
                        "segment_index",
                    ));
                }
                Ok(())
            }
            TrackerRequest::SyncFragments { peer_addr, file_name, local_indices, total_segments } => {
                validate_peer_addr(peer_addr)?;
                validate_file_name(file_name)?;
                if *total_segments == 0 {
                    return Err(SwarmError::validation_error_with_field("Total segments cannot be 0", "total_segments"));
                }
                if let Some(bad) = local_indices.iter().find(|&&i| i >= *total_segments) {
                    return Err(SwarmError::validation_error_with_field(
                        format!("Segment {} out of range for {} segments", bad, total_segments),
                        "local_indices",
                    ));
                }
                Ok(())
            }
            TrackerRequest::Heartbeat { peer_addr }
            | TrackerRequest::Disconnect { peer_addr }
            | TrackerRequest::Reconnect { peer_addr }
            | TrackerRequest::PendingDownloads { peer_addr } => validate_peer_addr(peer_addr),
        }
    }
}

/// Replies sent by the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerResponse {
    Joined { status: JoinStatus },
    Peers { peers: Vec<PeerSummary> },
    Files { files: Vec<String> },
    Possessions { files: Vec<FileAnnouncement> },
    Download(DownloadPlan),
    ResumeAvailable {
        total_segments: u32,
        missing: Vec<u32>,
        assignments: Vec<Assignment>,
    },
    NoResumeData,
    Progress(ProgressSummary),
    Recovered(RecoveryData),
    Pending { plans: Vec<PendingPlan> },
    Ack,
    Error { kind: ErrorKind, message: String },
}

impl TrackerResponse {
    pub fn error(err: &SwarmError) -> Self {
        TrackerResponse::Error {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }

    /// Turn an `Error` reply back into a `SwarmError`
    pub fn into_result(self) -> SwarmResult<Self> {
        match self {
            TrackerResponse::Error { kind, message } => Err(SwarmError::from_wire(kind, message)),
            other => Ok(other),
        }
    }
}

/// Requests served by a peer's segment server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerRequest {
    FetchSegment { file_name: String, segment_index: u32 },
    Status,
}

/// Segment count a peer holds for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub file_name: String,
    pub segments: u32,
}

/// Replies sent by a peer's segment server
///
/// A `Segment` header is followed on the wire by exactly one payload frame
/// of `length` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerResponse {
    Segment { file_name: String, segment_index: u32, length: u32 },
    Status { files: Vec<StoredFile> },
    Error { kind: ErrorKind, message: String },
}
