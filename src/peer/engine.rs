//! Download engine
//!
//! Executes download plans: fans the assignments out over up to
//! `max_sources` concurrent source tasks, stores every fetched segment,
//! reports progress to the tracker and reconstructs the file once every
//! segment is present. Open downloads are persisted before each segment
//! write so an interrupted peer can resume after a restart.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

use crate::protocol::{Assignment, DownloadPlan, FileAnnouncement};
use crate::storage::{DownloadRecord, DownloadState, SegmentStore, StateFile};

use super::client::TrackerClient;

/// Default number of sources fetched from concurrently
pub const DEFAULT_MAX_SOURCES: usize = 3;

/// How a download attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Every segment arrived and the file was reconstructed
    Complete { path: PathBuf, bytes: u64 },
    /// Some segments could not be fetched; retry later
    Incomplete { missing: Vec<u32> },
}

impl DownloadOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, DownloadOutcome::Complete { .. })
    }
}

/// Result of one source task
#[derive(Debug, Default)]
struct SourceReport {
    fetched: u32,
    skipped: u32,
    failed: u32,
    reports: Vec<JoinHandle<()>>,
}

/// Runs downloads for one peer
#[derive(Clone)]
pub struct DownloadEngine {
    client: TrackerClient,
    store: SegmentStore,
    state_file: StateFile,
    state: Arc<Mutex<DownloadState>>,
    download_dir: PathBuf,
    max_sources: usize,
}

impl DownloadEngine {
    pub fn new(
        client: TrackerClient,
        store: SegmentStore,
        state_file: StateFile,
        download_dir: PathBuf,
        max_sources: usize,
    ) -> Self {
        Self {
            client,
            store,
            state_file,
            state: Arc::new(Mutex::new(DownloadState::new())),
            download_dir,
            max_sources: max_sources.max(1),
        }
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Where a finished file is written
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.download_dir.join(file_name)
    }

    /// Load persisted open downloads into memory
    pub async fn load_state(&self) -> Result<Vec<(String, DownloadRecord)>> {
        let loaded = self.state_file.load().await?;
        let mut state = self.state.lock().await;
        for (file_name, record) in &loaded.downloads {
            state.downloads.entry(file_name.clone()).or_insert(*record);
        }
        Ok(state.downloads.iter().map(|(f, r)| (f.clone(), *r)).collect())
    }

    /// Snapshot of the open downloads
    pub async fn open_downloads(&self) -> Vec<(String, DownloadRecord)> {
        let state = self.state.lock().await;
        state.downloads.iter().map(|(f, r)| (f.clone(), *r)).collect()
    }

    /// Write the open downloads to disk
    pub async fn flush(&self) -> Result<()> {
        let state = self.state.lock().await;
        self.state_file.save(&state).await
    }

    /// Ask the tracker for a plan and run it
    pub async fn download(&self, file_name: &str) -> Result<DownloadOutcome> {
        let plan = self
            .client
            .request_download(file_name)
            .await
            .with_context(|| format!("Failed to plan download of {}", file_name))?;
        info!(
            "Downloading {} ({:?}, {} segments, {} sources)",
            file_name,
            plan.mode,
            plan.total_segments,
            plan.assignments.len()
        );
        self.execute(plan).await
    }

    /// Continue an interrupted download from the local inventory
    pub async fn resume(&self, file_name: &str, total_segments: u32) -> Result<DownloadOutcome> {
        let local: Vec<u32> = self
            .store
            .list(file_name)
            .await?
            .into_iter()
            .filter(|&i| i < total_segments)
            .collect();
        info!("Resuming {}: {} of {} segments on disk", file_name, local.len(), total_segments);

        self.client
            .sync_fragments(file_name, local, total_segments)
            .await
            .with_context(|| format!("Failed to sync fragments of {}", file_name))?;

        match self.client.request_resume(file_name).await? {
            Some(plan) => self.execute(plan).await,
            None => self.download(file_name).await,
        }
    }

    /// Resume every persisted download; failures are logged and skipped
    pub async fn resume_all(&self) -> Vec<(String, DownloadOutcome)> {
        let mut outcomes = Vec::new();
        for (file_name, record) in self.open_downloads().await {
            match self.resume(&file_name, record.total_segments).await {
                Ok(outcome) => outcomes.push((file_name, outcome)),
                Err(e) => warn!("Could not resume {}: {:#}", file_name, e),
            }
        }
        outcomes
    }

    /// Fetch everything the plan still needs, then try to reconstruct
    pub async fn execute(&self, plan: DownloadPlan) -> Result<DownloadOutcome> {
        let file_name = plan.file_name.clone();
        let total = plan.total_segments;

        {
            let mut state = self.state.lock().await;
            state.open(&file_name, total);
            self.state_file.save(&state).await?;
        }

        let local = self.store.list(&file_name).await?;
        let wanted: BTreeSet<u32> = plan.missing.iter().copied().collect();
        let semaphore = Arc::new(Semaphore::new(self.max_sources));
        let mut tasks = JoinSet::new();

        for assignment in plan.assignments {
            let indices: Vec<u32> = assignment
                .remaining()
                .filter(|i| wanted.contains(i) && !local.contains(i))
                .collect();
            if indices.is_empty() {
                trace!("Nothing to fetch from {} for {}", assignment.peer_addr, file_name);
                continue;
            }

            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let file_name = file_name.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                engine.fetch_range(&file_name, &assignment, &indices, total).await
            });
        }

        let mut reports = Vec::new();
        let (mut fetched, mut failed) = (0u32, 0u32);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    fetched += report.fetched;
                    failed += report.failed;
                    if report.skipped > 0 {
                        debug!("{} segments of {} were already present", report.skipped, file_name);
                    }
                    reports.extend(report.reports);
                }
                Err(e) => warn!("Source task for {} aborted: {}", file_name, e),
            }
        }

        // Reports must land before a completion notice can clear progress
        for handle in reports {
            let _ = handle.await;
        }

        debug!("Fetched {} segments of {} ({} failed)", fetched, file_name, failed);
        self.finish(&file_name, total).await
    }

    /// Fetch one assignment's indices in order from its source
    async fn fetch_range(&self, file_name: &str, assignment: &Assignment, indices: &[u32], total: u32) -> SourceReport {
        let source = assignment.peer_addr.as_str();
        let mut report = SourceReport::default();
        debug!(
            "Fetching {} segments of {} from {} in [{}, {})",
            indices.len(),
            file_name,
            source,
            assignment.start_segment,
            assignment.end_segment
        );

        for &index in indices {
            if self.store.has(file_name, index).await {
                report.skipped += 1;
                continue;
            }

            let data = match self.client.transport().fetch_segment(source, file_name, index).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Failed to fetch segment {} of {} from {}: {}", index, file_name, source, e);
                    report.failed += 1;
                    continue;
                }
            };

            if let Err(e) = self.persist_then_store(file_name, index, &data).await {
                warn!("Failed to store segment {} of {}: {:#}", index, file_name, e);
                report.failed += 1;
                continue;
            }
            report.fetched += 1;

            let client = self.client.clone();
            let file = file_name.to_string();
            let source = source.to_string();
            report.reports.push(tokio::spawn(async move {
                if let Err(e) = client.report_segment(&file, index, &source, total).await {
                    debug!("Progress report for segment {} of {} lost: {}", index, file, e);
                }
            }));
        }

        report
    }

    async fn persist_then_store(&self, file_name: &str, index: u32, data: &[u8]) -> Result<()> {
        {
            let state = self.state.lock().await;
            self.state_file.save(&state).await?;
        }
        self.store.store(file_name, index, data).await?;
        Ok(())
    }

    /// Reconstruct when every segment is present, otherwise report what is missing
    async fn finish(&self, file_name: &str, total: u32) -> Result<DownloadOutcome> {
        let missing = self.store.missing(file_name, total).await?;
        if !missing.is_empty() {
            warn!("{} is incomplete: {} of {} segments missing", file_name, missing.len(), total);
            return Ok(DownloadOutcome::Incomplete { missing });
        }

        let path = self.output_path(file_name);
        let bytes = self
            .store
            .assemble(file_name, total, &path)
            .await
            .with_context(|| format!("Failed to reconstruct {}", file_name))?;

        {
            let mut state = self.state.lock().await;
            state.close(file_name);
            self.state_file.save(&state).await?;
        }

        if let Err(e) = self.client.complete_download(file_name).await {
            warn!("Could not report completion of {}: {}", file_name, e);
        }
        if let Err(e) = self.client.add_files(vec![FileAnnouncement::complete(file_name, total)]).await {
            debug!("Could not announce {} as complete: {}", file_name, e);
        }

        info!("Download of {} complete ({} bytes)", file_name, bytes);
        Ok(DownloadOutcome::Complete { path, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DownloadMode;
    use crate::tracker::Tracker;
    use crate::transport::LocalTransport;

    struct Swarm {
        root: PathBuf,
        transport: Arc<LocalTransport>,
    }

    impl Swarm {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!("swarm_engine_{}_{}", name, rand::random::<u32>()));
            let transport = Arc::new(LocalTransport::new(Arc::new(Tracker::default())));
            Self { root, transport }
        }

        fn client(&self, addr: &str) -> TrackerClient {
            TrackerClient::new(self.transport.clone(), addr)
        }

        fn store(&self, addr: &str, segment_size: usize) -> SegmentStore {
            SegmentStore::new(self.root.join(addr).join("segments"), segment_size)
        }

        /// A seeder holding `data` split into `segment_size` segments
        async fn seed(&self, addr: &str, file_name: &str, data: &[u8], segment_size: usize) -> u32 {
            let store = self.store(addr, segment_size);
            let source = self.root.join(format!("{}.src", addr));
            tokio::fs::create_dir_all(&self.root).await.unwrap();
            tokio::fs::write(&source, data).await.unwrap();
            let count = store.import_file(&source, file_name).await.unwrap();

            self.transport.register_peer(addr, store).await;
            self.client(addr)
                .join(vec![FileAnnouncement::complete(file_name, count)])
                .await
                .unwrap();
            count
        }

        async fn leecher(&self, addr: &str, segment_size: usize, max_sources: usize) -> DownloadEngine {
            let client = self.client(addr);
            client.join(vec![]).await.unwrap();
            self.engine(addr, segment_size, max_sources)
        }

        fn engine(&self, addr: &str, segment_size: usize, max_sources: usize) -> DownloadEngine {
            DownloadEngine::new(
                self.client(addr),
                self.store(addr, segment_size),
                StateFile::new(self.root.join(addr).join("download_state.json")),
                self.root.join(addr).join("downloads"),
                max_sources,
            )
        }

        async fn cleanup(self) {
            let _ = tokio::fs::remove_dir_all(&self.root).await;
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_download_from_two_seeds() {
        let swarm = Swarm::new("two_seeds");
        let data = sample(100);
        swarm.seed("s1", "a.bin", &data, 10).await;
        swarm.seed("s2", "a.bin", &data, 10).await;
        let engine = swarm.leecher("req", 10, DEFAULT_MAX_SOURCES).await;

        let outcome = engine.download("a.bin").await.unwrap();
        let DownloadOutcome::Complete { path, bytes } = outcome else {
            panic!("download did not complete");
        };
        assert_eq!(bytes, 100);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), data);
        assert_eq!(swarm.transport.fetch_count(), 10);

        // Finished downloads leave no persisted state behind
        assert!(engine.open_downloads().await.is_empty());
        assert!(!StateFile::new(swarm.root.join("req").join("download_state.json")).exists().await);

        // The requester now seeds the whole file
        let tracker = swarm.transport.tracker();
        let peers = tracker.list_peers().await;
        let req = peers.iter().find(|p| p.peer_addr == "req").unwrap();
        assert_eq!(req.files, vec![FileAnnouncement::complete("a.bin", 10)]);
        assert!(tracker.pending_downloads("req").await.is_empty());

        swarm.cleanup().await;
    }

    #[tokio::test]
    async fn test_sequential_single_source() {
        let swarm = Swarm::new("sequential");
        let data = sample(35);
        swarm.seed("s1", "a.bin", &data, 10).await;
        swarm.seed("s2", "a.bin", &data, 10).await;
        let engine = swarm.leecher("req", 10, 1).await;

        let outcome = engine.download("a.bin").await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(tokio::fs::read(engine.output_path("a.bin")).await.unwrap(), data);

        swarm.cleanup().await;
    }

    #[tokio::test]
    async fn test_present_segments_are_not_fetched() {
        let swarm = Swarm::new("idempotent");
        let data = sample(50);
        swarm.seed("s1", "a.bin", &data, 10).await;
        let engine = swarm.leecher("req", 10, DEFAULT_MAX_SOURCES).await;

        engine.store().store("a.bin", 0, &data[0..10]).await.unwrap();
        engine.store().store("a.bin", 3, &data[30..40]).await.unwrap();

        let outcome = engine.download("a.bin").await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(swarm.transport.fetch_count(), 3);

        swarm.cleanup().await;
    }

    #[tokio::test]
    async fn test_unreachable_source_leaves_download_incomplete() {
        let swarm = Swarm::new("unreachable");
        let data = sample(100);
        swarm.seed("s1", "a.bin", &data, 10).await;
        swarm.seed("s2", "a.bin", &data, 10).await;
        swarm.transport.set_unreachable("s2", true).await;
        let engine = swarm.leecher("req", 10, DEFAULT_MAX_SOURCES).await;

        let outcome = engine.download("a.bin").await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Incomplete { missing: vec![5, 6, 7, 8, 9] });
        assert!(!engine.output_path("a.bin").exists());
        assert_eq!(engine.open_downloads().await.len(), 1);

        // A later attempt picks up only what is missing
        swarm.transport.set_unreachable("s2", false).await;
        let plan = swarm.client("req").request_download("a.bin").await.unwrap();
        assert_eq!(plan.mode, DownloadMode::Resume);
        assert_eq!(plan.missing, vec![5, 6, 7, 8, 9]);

        let outcome = engine.execute(plan).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(tokio::fs::read(engine.output_path("a.bin")).await.unwrap(), data);

        swarm.cleanup().await;
    }

    #[tokio::test]
    async fn test_restart_resumes_missing_segments() {
        let swarm = Swarm::new("restart");
        let data = sample(50);
        swarm.seed("seed", "a.bin", &data, 10).await;
        swarm.client("req").join(vec![]).await.unwrap();

        // State left behind by a process that died after three segments
        let store = swarm.store("req", 10);
        for i in 0..3usize {
            store.store("a.bin", i as u32, &data[i * 10..(i + 1) * 10]).await.unwrap();
        }
        let mut persisted = DownloadState::new();
        persisted.open("a.bin", 5);
        StateFile::new(swarm.root.join("req").join("download_state.json"))
            .save(&persisted)
            .await
            .unwrap();

        let engine = swarm.engine("req", 10, DEFAULT_MAX_SOURCES);
        let open = engine.load_state().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].1.total_segments, 5);

        let outcomes = engine.resume_all().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].1.is_complete());
        assert_eq!(swarm.transport.fetch_count(), 2);
        assert_eq!(tokio::fs::read(engine.output_path("a.bin")).await.unwrap(), data);

        swarm.cleanup().await;
    }

    #[tokio::test]
    async fn test_no_sources_is_an_error() {
        let swarm = Swarm::new("no_sources");
        let engine = swarm.leecher("req", 10, DEFAULT_MAX_SOURCES).await;

        assert!(engine.download("missing.bin").await.is_err());
        assert!(engine.open_downloads().await.is_empty());

        swarm.cleanup().await;
    }
}
