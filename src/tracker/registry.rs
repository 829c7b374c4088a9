//! Swarm registry module
//!
//! Known peers and what each of them holds, keyed explicitly by
//! `(peer, file)`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use crate::error::{SwarmError, SwarmResult};
use crate::protocol::{
    FileAnnouncement, JoinStatus, PeerRole, PeerStatus, PeerSummary, ELIGIBILITY_THRESHOLD,
};

/// How an announce treats a lower `current_segments` than the one recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnouncePolicy {
    /// Keep the maximum ever reported; stale reports cannot regress possession
    #[default]
    Monotonic,
    /// Last report wins
    Overwrite,
}

impl FromStr for AnnouncePolicy {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monotonic" | "max" => Ok(AnnouncePolicy::Monotonic),
            "overwrite" => Ok(AnnouncePolicy::Overwrite),
            other => Err(SwarmError::config_error_with_field(
                format!("Unknown announce policy: {}", other),
                "announce_policy",
            )),
        }
    }
}

impl fmt::Display for AnnouncePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnouncePolicy::Monotonic => write!(f, "monotonic"),
            AnnouncePolicy::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// What one peer holds of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePossession {
    /// Fixed by the first announce for the pair
    pub num_segments: u32,
    pub current_segments: u32,
}

impl FilePossession {
    pub fn ratio(&self) -> f64 {
        if self.num_segments == 0 {
            0.0
        } else {
            self.current_segments as f64 / self.num_segments as f64
        }
    }

    /// May this holder act as a source
    pub fn is_eligible(&self) -> bool {
        self.num_segments > 0 && self.ratio() >= ELIGIBILITY_THRESHOLD
    }

    pub fn is_complete(&self) -> bool {
        self.num_segments > 0 && self.current_segments >= self.num_segments
    }
}

/// A registered peer
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub addr: String,
    pub last_seen: Instant,
    pub status: PeerStatus,
}

/// Input row for the allocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligiblePeer {
    pub peer_addr: String,
    pub num_segments: u32,
    pub current_segments: u32,
}

/// Known peers and their per-file possession
#[derive(Debug, Default)]
pub struct SwarmRegistry {
    peers: HashMap<String, PeerRecord>,
    possessions: HashMap<(String, String), FilePossession>,
    policy: AnnouncePolicy,
}

impl SwarmRegistry {
    pub fn new(policy: AnnouncePolicy) -> Self {
        Self {
            peers: HashMap::new(),
            possessions: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> AnnouncePolicy {
        self.policy
    }

    /// Register a peer; joining twice is a no-op
    pub fn join(&mut self, peer_addr: &str, files: &[FileAnnouncement], now: Instant) -> SwarmResult<JoinStatus> {
        if self.peers.contains_key(peer_addr) {
            trace!("Peer {} already joined, skipping", peer_addr);
            return Ok(JoinStatus::AlreadyMember);
        }

        self.peers.insert(
            peer_addr.to_string(),
            PeerRecord {
                addr: peer_addr.to_string(),
                last_seen: now,
                status: PeerStatus::Online,
            },
        );
        for file in files {
            self.announce(peer_addr, file, now)?;
        }

        info!("Added peer: {} with {} files (total: {})", peer_addr, files.len(), self.peers.len());
        Ok(JoinStatus::Accepted)
    }

    pub fn contains(&self, peer_addr: &str) -> bool {
        self.peers.contains_key(peer_addr)
    }

    pub fn peer(&self, peer_addr: &str) -> Option<&PeerRecord> {
        self.peers.get(peer_addr)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn peer_mut(&mut self, peer_addr: &str) -> SwarmResult<&mut PeerRecord> {
        self.peers
            .get_mut(peer_addr)
            .ok_or_else(|| SwarmError::not_found_with_resource("Unknown peer", peer_addr.to_string()))
    }

    /// Refresh a peer's last-seen time
    pub fn touch(&mut self, peer_addr: &str, now: Instant) -> SwarmResult<()> {
        let peer = self.peer_mut(peer_addr)?;
        peer.last_seen = now;
        Ok(())
    }

    /// Upsert a peer's possession of a file
    pub fn announce(&mut self, peer_addr: &str, file: &FileAnnouncement, now: Instant) -> SwarmResult<FilePossession> {
        let policy = self.policy;
        self.touch(peer_addr, now)?;

        let key = (peer_addr.to_string(), file.file_name.clone());
        let possession = match self.possessions.get_mut(&key) {
            Some(existing) => {
                if existing.num_segments != file.num_segments {
                    debug!(
                        "Peer {} announced {} with {} segments, keeping first-announced {}",
                        peer_addr, file.file_name, file.num_segments, existing.num_segments
                    );
                }
                let reported = file.current_segments.min(existing.num_segments);
                existing.current_segments = match policy {
                    AnnouncePolicy::Monotonic => existing.current_segments.max(reported),
                    AnnouncePolicy::Overwrite => reported,
                };
                *existing
            }
            None => {
                let possession = FilePossession {
                    num_segments: file.num_segments,
                    current_segments: file.current_segments.min(file.num_segments),
                };
                self.possessions.insert(key, possession);
                possession
            }
        };

        trace!(
            "Peer {} holds {}/{} segments of {}",
            peer_addr, possession.current_segments, possession.num_segments, file.file_name
        );
        Ok(possession)
    }

    pub fn possession(&self, peer_addr: &str, file_name: &str) -> Option<&FilePossession> {
        self.possessions.get(&(peer_addr.to_string(), file_name.to_string()))
    }

    /// Every file a peer holds, sorted by name
    pub fn possessions_of(&self, peer_addr: &str) -> Vec<FileAnnouncement> {
        let mut files: Vec<FileAnnouncement> = self
            .possessions
            .iter()
            .filter(|((peer, _), _)| peer == peer_addr)
            .map(|((_, file), p)| FileAnnouncement {
                file_name: file.clone(),
                num_segments: p.num_segments,
                current_segments: p.current_segments,
            })
            .collect();
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        files
    }

    /// Distinct file names across all peers
    pub fn list_files(&self) -> Vec<String> {
        self.possessions
            .keys()
            .map(|(_, file)| file.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Online peers holding at least the eligibility threshold of a file
    pub fn list_eligible_peers(&self, file_name: &str) -> Vec<EligiblePeer> {
        let mut eligible: Vec<EligiblePeer> = self
            .possessions
            .iter()
            .filter(|((_, file), p)| file == file_name && p.is_eligible())
            .filter(|((peer, _), _)| {
                self.peers
                    .get(peer)
                    .map_or(false, |record| record.status == PeerStatus::Online)
            })
            .map(|((peer, _), p)| EligiblePeer {
                peer_addr: peer.clone(),
                num_segments: p.num_segments,
                current_segments: p.current_segments,
            })
            .collect();
        eligible.sort_by(|a, b| a.peer_addr.cmp(&b.peer_addr));
        eligible
    }

    /// Role derived from what the peer holds
    pub fn role(&self, peer_addr: &str) -> PeerRole {
        let mut has_complete = false;
        let mut has_partial = false;
        for ((peer, _), p) in &self.possessions {
            if peer != peer_addr {
                continue;
            }
            if p.is_complete() {
                has_complete = true;
            } else {
                has_partial = true;
            }
        }
        match (has_complete, has_partial) {
            (true, false) => PeerRole::Seeder,
            (true, true) => PeerRole::Peer,
            (false, _) => PeerRole::Leecher,
        }
    }

    /// All peers, sorted by address
    pub fn list_peers(&self, now: Instant) -> Vec<PeerSummary> {
        let mut peers: Vec<PeerSummary> = self
            .peers
            .values()
            .map(|record| PeerSummary {
                peer_addr: record.addr.clone(),
                status: record.status,
                role: self.role(&record.addr),
                idle_secs: now.saturating_duration_since(record.last_seen).as_secs(),
                files: self.possessions_of(&record.addr),
            })
            .collect();
        peers.sort_by(|a, b| a.peer_addr.cmp(&b.peer_addr));
        peers
    }

    pub fn set_status(&mut self, peer_addr: &str, status: PeerStatus, now: Instant) -> SwarmResult<()> {
        let peer = self.peer_mut(peer_addr)?;
        peer.status = status;
        if status == PeerStatus::Online {
            peer.last_seen = now;
        }
        debug!("Peer {} is now {:?}", peer_addr, status);
        Ok(())
    }

    /// Peers silent for longer than `timeout`
    pub fn idle_peers(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut idle: Vec<String> = self
            .peers
            .values()
            .filter(|record| now.saturating_duration_since(record.last_seen) > timeout)
            .map(|record| record.addr.clone())
            .collect();
        idle.sort();
        idle
    }

    /// Remove a peer and everything it announced
    pub fn evict(&mut self, peer_addr: &str) -> bool {
        let removed = self.peers.remove(peer_addr).is_some();
        if removed {
            self.possessions.retain(|(peer, _), _| peer != peer_addr);
            info!("Removed peer: {} (remaining: {})", peer_addr, self.peers.len());
        }
        removed
    }
}
