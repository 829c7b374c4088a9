//! Transport module
//!
//! How a peer reaches the tracker and other peers. The download engine and
//! tracker client only see the [`Transport`] trait.

pub mod tcp;
pub mod local;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SwarmResult;
use crate::protocol::{StoredFile, TrackerRequest, TrackerResponse};

pub use tcp::TcpTransport;
pub use local::LocalTransport;

/// Request/reply channel to the tracker and to other peers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request to the tracker and return its raw reply
    async fn call_tracker(&self, request: TrackerRequest) -> SwarmResult<TrackerResponse>;

    /// Fetch one segment from a peer's segment server
    async fn fetch_segment(&self, peer_addr: &str, file_name: &str, segment_index: u32) -> SwarmResult<Bytes>;

    /// Ask a peer what it stores
    async fn peer_status(&self, peer_addr: &str) -> SwarmResult<Vec<StoredFile>>;
}
