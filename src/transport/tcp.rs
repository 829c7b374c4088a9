//! TCP transport
//!
//! One short-lived connection per request, each bounded by a timeout.

use std::future::Future;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::error::{SwarmError, SwarmResult};
use crate::protocol::{
    read_frame, read_json, write_json, PeerRequest, PeerResponse, StoredFile, TrackerRequest,
    TrackerResponse,
};

use super::Transport;

/// Default bound on one tracker exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on one segment fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Transport`] over plain TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    tracker_addr: String,
    request_timeout: Duration,
    fetch_timeout: Duration,
}

impl TcpTransport {
    pub fn new(tracker_addr: impl Into<String>) -> Self {
        Self::with_timeouts(tracker_addr, DEFAULT_REQUEST_TIMEOUT, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeouts(tracker_addr: impl Into<String>, request_timeout: Duration, fetch_timeout: Duration) -> Self {
        Self {
            tracker_addr: tracker_addr.into(),
            request_timeout,
            fetch_timeout,
        }
    }

    pub fn tracker_addr(&self) -> &str {
        &self.tracker_addr
    }

    async fn connect(addr: &str) -> SwarmResult<TcpStream> {
        TcpStream::connect(addr)
            .await
            .map_err(|e| SwarmError::transport_error_full("Failed to connect", addr.to_string(), e.to_string()))
    }

    /// Run an exchange under a deadline, tagging failures with the address
    async fn bounded<T, F>(addr: &str, limit: Duration, exchange: F) -> SwarmResult<T>
    where
        F: Future<Output = SwarmResult<T>>,
    {
        match timeout(limit, exchange).await {
            Ok(result) => result,
            Err(_) => Err(SwarmError::transport_error_with_address(
                format!("Timed out after {}s", limit.as_secs()),
                addr.to_string(),
            )),
        }
    }

    async fn peer_exchange(addr: &str, request: &PeerRequest) -> SwarmResult<(TcpStream, PeerResponse)> {
        let mut stream = Self::connect(addr).await?;
        write_json(&mut stream, request).await?;
        let response: PeerResponse = read_json(&mut stream).await?;
        Ok((stream, response))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call_tracker(&self, request: TrackerRequest) -> SwarmResult<TrackerResponse> {
        let addr = self.tracker_addr.as_str();
        trace!("Sending {} request to tracker {}", request.name(), addr);
        Self::bounded(addr, self.request_timeout, async {
            let mut stream = Self::connect(addr).await?;
            write_json(&mut stream, &request).await?;
            read_json(&mut stream).await
        })
        .await
    }

    async fn fetch_segment(&self, peer_addr: &str, file_name: &str, segment_index: u32) -> SwarmResult<Bytes> {
        let request = PeerRequest::FetchSegment {
            file_name: file_name.to_string(),
            segment_index,
        };
        Self::bounded(peer_addr, self.fetch_timeout, async {
            let (mut stream, response) = Self::peer_exchange(peer_addr, &request).await?;
            match response {
                PeerResponse::Segment { length, .. } => {
                    let payload = read_frame(&mut stream).await?;
                    if payload.len() != length as usize {
                        return Err(SwarmError::protocol_error(format!(
                            "Segment {} of {} announced {} bytes but carried {}",
                            segment_index,
                            file_name,
                            length,
                            payload.len()
                        )));
                    }
                    Ok(payload)
                }
                PeerResponse::Error { kind, message } => Err(SwarmError::from_wire(kind, message)),
                other => Err(SwarmError::protocol_error(format!("Unexpected reply to fetch: {:?}", other))),
            }
        })
        .await
    }

    async fn peer_status(&self, peer_addr: &str) -> SwarmResult<Vec<StoredFile>> {
        Self::bounded(peer_addr, self.request_timeout, async {
            let (_, response) = Self::peer_exchange(peer_addr, &PeerRequest::Status).await?;
            match response {
                PeerResponse::Status { files } => Ok(files),
                PeerResponse::Error { kind, message } => Err(SwarmError::from_wire(kind, message)),
                other => Err(SwarmError::protocol_error(format!("Unexpected reply to status: {:?}", other))),
            }
        })
        .await
    }
}
