//! Segment server
//!
//! Serves stored segments to other peers.

use std::net::SocketAddr;
use std::time::Duration;
use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::error::{SwarmError, SwarmResult};
use crate::protocol::{read_json, write_frame, write_json, PeerRequest, PeerResponse};
use crate::storage::SegmentStore;

/// Build the reply to one peer request
///
/// A `Segment` reply comes with the payload to send after the header.
pub async fn respond(store: &SegmentStore, request: PeerRequest) -> (PeerResponse, Option<Bytes>) {
    match answer(store, request).await {
        Ok(reply) => reply,
        Err(e) => {
            debug!("Peer request failed: {}", e);
            let response = PeerResponse::Error {
                kind: e.kind(),
                message: e.message().to_string(),
            };
            (response, None)
        }
    }
}

async fn answer(store: &SegmentStore, request: PeerRequest) -> SwarmResult<(PeerResponse, Option<Bytes>)> {
    match request {
        PeerRequest::FetchSegment { file_name, segment_index } => {
            let data = store.read(&file_name, segment_index).await?.ok_or_else(|| {
                SwarmError::not_found_with_resource(
                    format!("Segment {} of {} is not stored here", segment_index, file_name),
                    file_name.clone(),
                )
            })?;
            trace!("Serving segment {} of {} ({} bytes)", segment_index, file_name, data.len());
            let header = PeerResponse::Segment {
                file_name,
                segment_index,
                length: data.len() as u32,
            };
            Ok((header, Some(data)))
        }
        PeerRequest::Status => Ok((PeerResponse::Status { files: store.files().await? }, None)),
    }
}

/// Bound on one request/reply exchange with a downloader
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP listener answering [`PeerRequest`]s from a [`SegmentStore`]
pub struct SegmentServer {
    listener: TcpListener,
    store: SegmentStore,
    exchange_timeout: Duration,
}

impl SegmentServer {
    pub async fn bind(addr: &str, store: SegmentStore) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind segment server on {}", addr))?;
        Ok(Self {
            listener,
            store,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        })
    }

    pub fn with_exchange_timeout(mut self, exchange_timeout: Duration) -> Self {
        self.exchange_timeout = exchange_timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    pub async fn run(self) -> Result<()> {
        info!("Serving segments on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    let store = self.store.clone();
                    let limit = self.exchange_timeout;
                    tokio::spawn(async move {
                        match timeout(limit, serve_connection(stream, store)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!("Segment request from {} failed: {}", remote, e),
                            Err(_) => debug!("Dropped {} after {}s without a complete exchange", remote, limit.as_secs()),
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

async fn serve_connection(mut stream: TcpStream, store: SegmentStore) -> SwarmResult<()> {
    let request: PeerRequest = match read_json(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            let response = PeerResponse::Error {
                kind: e.kind(),
                message: e.message().to_string(),
            };
            write_json(&mut stream, &response).await?;
            return Err(e);
        }
    };

    let (response, payload) = respond(&store, request).await;
    write_json(&mut stream, &response).await?;
    if let Some(payload) = payload {
        write_frame(&mut stream, &payload).await?;
    }
    Ok(())
}
