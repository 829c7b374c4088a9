//! Tracker TCP server
//!
//! One task per inbound connection; each connection carries any number of
//! request/reply exchanges until the peer hangs up or goes quiet.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::error::SwarmError;
use crate::protocol::{read_frame, write_json, TrackerRequest, TrackerResponse};

use super::service::Tracker;

/// How long a connection may sit without completing a frame
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Accepts peer connections and hands their requests to a [`Tracker`]
pub struct TrackerServer {
    listener: TcpListener,
    tracker: Arc<Tracker>,
    idle_timeout: Duration,
}

impl TrackerServer {
    /// Bind the listening socket
    pub async fn bind(addr: &str, tracker: Arc<Tracker>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind tracker on {}", addr))?;
        Ok(Self {
            listener,
            tracker,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn tracker(&self) -> Arc<Tracker> {
        Arc::clone(&self.tracker)
    }

    /// Accept connections forever
    pub async fn run(self) -> Result<()> {
        info!("Tracker listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    trace!("Accepted connection from {}", remote);
                    let tracker = Arc::clone(&self.tracker);
                    let idle_timeout = self.idle_timeout;
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, tracker, idle_timeout).await {
                            warn!("Connection from {} ended with error: {}", remote, e);
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

async fn serve_connection(
    mut stream: TcpStream,
    tracker: Arc<Tracker>,
    idle_timeout: Duration,
) -> Result<(), SwarmError> {
    loop {
        let frame = match timeout(idle_timeout, read_frame(&mut stream)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                // EOF lands here too
                trace!("Connection closed: {}", e);
                return Ok(());
            }
            Err(_) => {
                debug!("Closing connection idle for {}s", idle_timeout.as_secs());
                return Ok(());
            }
        };

        let response = match serde_json::from_slice::<TrackerRequest>(&frame) {
            Ok(request) => {
                debug!("Handling {} request", request.name());
                tracker.handle(request).await
            }
            Err(e) => {
                let err = SwarmError::protocol_error_with_source("Undecodable tracker request", e.to_string());
                warn!("{}", err);
                TrackerResponse::error(&err)
            }
        };

        timeout(idle_timeout, write_json(&mut stream, &response))
            .await
            .map_err(|_| SwarmError::transport_error("Timed out writing tracker reply"))??;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_silent_connection_is_closed() {
        let server = TrackerServer::bind("127.0.0.1:0", Arc::new(Tracker::default()))
            .await
            .unwrap()
            .with_idle_timeout(Duration::from_millis(200));
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(5), stream.read(&mut buf)).await;
        assert!(matches!(read, Ok(Ok(0))));
    }

    #[tokio::test]
    async fn test_partial_length_prefix_is_closed() {
        use tokio::io::AsyncWriteExt;

        let server = TrackerServer::bind("127.0.0.1:0", Arc::new(Tracker::default()))
            .await
            .unwrap()
            .with_idle_timeout(Duration::from_millis(200));
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[0, 0]).await.unwrap();
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(5), stream.read(&mut buf)).await;
        assert!(matches!(read, Ok(Ok(0))));
    }

    #[tokio::test]
    async fn test_answers_requests_on_one_connection() {
        use crate::protocol::read_json;

        let server = TrackerServer::bind("127.0.0.1:0", Arc::new(Tracker::default())).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        for _ in 0..2 {
            write_json(&mut stream, &TrackerRequest::ListFiles).await.unwrap();
            let response: TrackerResponse = read_json(&mut stream).await.unwrap();
            assert!(matches!(response, TrackerResponse::Files { .. }));
        }
    }
}
