//! In-process transport
//!
//! Routes tracker calls straight into a [`Tracker`] and segment fetches into
//! registered [`SegmentStore`]s. Peers can be marked unreachable to simulate
//! refused connections, and every fetch that reaches the transport is
//! counted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{SwarmError, SwarmResult};
use crate::peer::server::respond;
use crate::protocol::{PeerRequest, PeerResponse, StoredFile, TrackerRequest, TrackerResponse};
use crate::storage::SegmentStore;
use crate::tracker::Tracker;

use super::Transport;

/// [`Transport`] that never leaves the process
pub struct LocalTransport {
    tracker: Arc<Tracker>,
    peers: RwLock<HashMap<String, SegmentStore>>,
    unreachable: RwLock<HashSet<String>>,
    tracker_down: AtomicBool,
    fetches: AtomicUsize,
}

impl LocalTransport {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self {
            tracker,
            peers: RwLock::new(HashMap::new()),
            unreachable: RwLock::new(HashSet::new()),
            tracker_down: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn tracker(&self) -> Arc<Tracker> {
        Arc::clone(&self.tracker)
    }

    /// Make a peer's segment store reachable under `peer_addr`
    pub async fn register_peer(&self, peer_addr: &str, store: SegmentStore) {
        self.peers.write().await.insert(peer_addr.to_string(), store);
    }

    pub async fn set_unreachable(&self, peer_addr: &str, unreachable: bool) {
        let mut set = self.unreachable.write().await;
        if unreachable {
            set.insert(peer_addr.to_string());
        } else {
            set.remove(peer_addr);
        }
    }

    pub fn set_tracker_down(&self, down: bool) {
        self.tracker_down.store(down, Ordering::SeqCst);
    }

    /// Number of segment fetches issued so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn store_for(&self, peer_addr: &str) -> SwarmResult<SegmentStore> {
        if self.unreachable.read().await.contains(peer_addr) {
            return Err(SwarmError::transport_error_with_address("Connection refused", peer_addr.to_string()));
        }
        self.peers
            .read()
            .await
            .get(peer_addr)
            .cloned()
            .ok_or_else(|| SwarmError::transport_error_with_address("No such peer", peer_addr.to_string()))
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call_tracker(&self, request: TrackerRequest) -> SwarmResult<TrackerResponse> {
        if self.tracker_down.load(Ordering::SeqCst) {
            return Err(SwarmError::transport_error_with_address("Connection refused", "tracker"));
        }
        trace!("Routing {} request to in-process tracker", request.name());
        Ok(self.tracker.handle(request).await)
    }

    async fn fetch_segment(&self, peer_addr: &str, file_name: &str, segment_index: u32) -> SwarmResult<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let store = self.store_for(peer_addr).await?;
        let request = PeerRequest::FetchSegment {
            file_name: file_name.to_string(),
            segment_index,
        };
        match respond(&store, request).await {
            (PeerResponse::Segment { .. }, Some(payload)) => Ok(payload),
            (PeerResponse::Error { kind, message }, _) => Err(SwarmError::from_wire(kind, message)),
            (other, _) => Err(SwarmError::protocol_error(format!("Unexpected reply to fetch: {:?}", other))),
        }
    }

    async fn peer_status(&self, peer_addr: &str) -> SwarmResult<Vec<StoredFile>> {
        let store = self.store_for(peer_addr).await?;
        match respond(&store, PeerRequest::Status).await {
            (PeerResponse::Status { files }, _) => Ok(files),
            (PeerResponse::Error { kind, message }, _) => Err(SwarmError::from_wire(kind, message)),
            (other, _) => Err(SwarmError::protocol_error(format!("Unexpected reply to status: {:?}", other))),
        }
    }
}
