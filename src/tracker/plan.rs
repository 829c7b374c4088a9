//! Transfer plans and download progress
//!
//! Both tables are keyed by `(requester, file)`.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tracing::{debug, trace};

use crate::protocol::{Assignment, PendingPlan, ProgressSummary};

type Key = (String, String);

fn key(peer_addr: &str, file_name: &str) -> Key {
    (peer_addr.to_string(), file_name.to_string())
}

/// Outstanding plan for one requester and file
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub entries: Vec<Assignment>,
    pub created: Instant,
}

/// Every outstanding transfer plan
#[derive(Debug, Default)]
pub struct PlanTable {
    plans: HashMap<Key, TransferPlan>,
}

impl PlanTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh plan, replacing any older one for the same pair
    pub fn insert(&mut self, requester: &str, file_name: &str, entries: Vec<Assignment>, now: Instant) {
        let entries: Vec<Assignment> = entries.into_iter().filter(|e| e.cursor < e.end_segment).collect();
        if entries.is_empty() {
            self.plans.remove(&key(requester, file_name));
            return;
        }
        debug!("Created plan for {} / {} with {} entries", requester, file_name, entries.len());
        self.plans.insert(key(requester, file_name), TransferPlan { entries, created: now });
    }

    pub fn get(&self, requester: &str, file_name: &str) -> Option<&TransferPlan> {
        self.plans.get(&key(requester, file_name))
    }

    /// Apply "segment `index` arrived from `source`"
    ///
    /// Returns `false` when no plan entry matched.
    pub fn advance(&mut self, requester: &str, file_name: &str, source: &str, index: u32) -> bool {
        let k = key(requester, file_name);
        let Some(plan) = self.plans.get_mut(&k) else {
            trace!("No plan for {} / {}, report ignored", requester, file_name);
            return false;
        };

        let mut matched = false;
        for entry in plan.entries.iter_mut().filter(|e| e.peer_addr == source) {
            if index >= entry.start_segment && index < entry.end_segment {
                entry.cursor = entry.cursor.max(index + 1);
                matched = true;
            }
        }

        plan.entries.retain(|e| e.cursor < e.end_segment);
        if plan.entries.is_empty() {
            self.plans.remove(&k);
            debug!("Plan for {} / {} finished", requester, file_name);
        }
        matched
    }

    pub fn remove(&mut self, requester: &str, file_name: &str) -> Option<TransferPlan> {
        self.plans.remove(&key(requester, file_name))
    }

    /// Drop every plan requested by `requester`
    pub fn remove_requester(&mut self, requester: &str) -> usize {
        let before = self.plans.len();
        self.plans.retain(|(peer, _), _| peer != requester);
        before - self.plans.len()
    }

    /// Outstanding plans of one requester, sorted by file
    pub fn pending_for(&self, requester: &str) -> Vec<PendingPlan> {
        let mut pending: Vec<PendingPlan> = self
            .plans
            .iter()
            .filter(|((peer, _), _)| peer == requester)
            .map(|((_, file), plan)| PendingPlan {
                file_name: file.clone(),
                entries: plan.entries.clone(),
            })
            .collect();
        pending.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        pending
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// Segments one peer has received of one file
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub total_segments: u32,
    pub downloaded: BTreeSet<u32>,
    pub last_update: Instant,
}

impl DownloadProgress {
    fn new(total_segments: u32, now: Instant) -> Self {
        Self {
            total_segments,
            downloaded: BTreeSet::new(),
            last_update: now,
        }
    }

    fn insert(&mut self, index: u32) -> bool {
        if index >= self.total_segments {
            debug!("Segment {} beyond recorded total {}, ignored", index, self.total_segments);
            return false;
        }
        self.downloaded.insert(index)
    }

    /// Indices not yet downloaded, ascending
    pub fn missing(&self) -> Vec<u32> {
        (0..self.total_segments)
            .filter(|i| !self.downloaded.contains(i))
            .collect()
    }

    pub fn count(&self) -> u32 {
        self.downloaded.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.count() >= self.total_segments
    }

    pub fn summary(&self, file_name: &str) -> ProgressSummary {
        ProgressSummary {
            file_name: file_name.to_string(),
            total_segments: self.total_segments,
            downloaded: self.downloaded.iter().copied().collect(),
            missing: self.missing(),
        }
    }
}

/// Progress records for every open download
#[derive(Debug, Default)]
pub struct ProgressTable {
    records: HashMap<Key, DownloadProgress>,
}

impl ProgressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one downloaded segment, creating the record on first report
    pub fn record(&mut self, peer_addr: &str, file_name: &str, index: u32, total_segments: u32, now: Instant) -> &DownloadProgress {
        let progress = self
            .records
            .entry(key(peer_addr, file_name))
            .or_insert_with(|| DownloadProgress::new(total_segments, now));
        progress.insert(index);
        progress.last_update = now;
        progress
    }

    /// Union a peer's local inventory into its record
    pub fn merge(&mut self, peer_addr: &str, file_name: &str, indices: &[u32], total_segments: u32, now: Instant) -> &DownloadProgress {
        let progress = self
            .records
            .entry(key(peer_addr, file_name))
            .or_insert_with(|| DownloadProgress::new(total_segments, now));
        for &index in indices {
            progress.insert(index);
        }
        progress.last_update = now;
        progress
    }

    pub fn get(&self, peer_addr: &str, file_name: &str) -> Option<&DownloadProgress> {
        self.records.get(&key(peer_addr, file_name))
    }

    pub fn remove(&mut self, peer_addr: &str, file_name: &str) -> Option<DownloadProgress> {
        self.records.remove(&key(peer_addr, file_name))
    }

    /// Every open download of one peer, sorted by file
    pub fn for_peer(&self, peer_addr: &str) -> Vec<ProgressSummary> {
        let mut summaries: Vec<ProgressSummary> = self
            .records
            .iter()
            .filter(|((peer, _), _)| peer == peer_addr)
            .map(|((_, file), progress)| progress.summary(file))
            .collect();
        summaries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        summaries
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
