//! Liveness monitor
//!
//! Periodically evicts peers that stopped heartbeating.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::service::{Tracker, TrackerState};

/// Default heartbeat silence after which a peer is evicted
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(120);
/// Default time between sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Evict every peer idle for longer than `timeout`
///
/// Evicted peers lose their possessions and the plans they requested.
/// Plans in which they act as a source are left as they are.
pub fn sweep(state: &mut TrackerState, now: Instant, timeout: Duration) -> Vec<String> {
    let idle = state.registry.idle_peers(now, timeout);
    for peer in &idle {
        state.registry.evict(peer);
        let dropped = state.plans.remove_requester(peer);
        if dropped > 0 {
            debug!("Dropped {} plans requested by {}", dropped, peer);
        }
    }
    idle
}

/// Background task driving [`sweep`] on a fixed interval
pub struct LivenessMonitor {
    tracker: Arc<Tracker>,
    sweep_interval: Duration,
    peer_timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(tracker: Arc<Tracker>, sweep_interval: Duration, peer_timeout: Duration) -> Self {
        Self {
            tracker,
            sweep_interval,
            peer_timeout,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the sweep loop forever
    pub async fn run(self) {
        info!(
            "Starting liveness monitor (interval: {}s, timeout: {}s)",
            self.sweep_interval.as_secs(),
            self.peer_timeout.as_secs()
        );
        let mut interval = tokio::time::interval(self.sweep_interval);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let evicted = self.tracker.sweep(Instant::now(), self.peer_timeout).await;
            if !evicted.is_empty() {
                info!("Evicted {} idle peers: {:?}", evicted.len(), evicted);
            }
        }
    }
}
