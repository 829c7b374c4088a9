//! swarm-share - Main entry point
//!
//! Runs a tracker, a peer, or a one-shot query against a tracker.

use anyhow::{Context, Result};
use swarm_share::cli::DownloadStats;
use swarm_share::{
    CliArgs, Command, LivenessMonitor, PeerConfig, PeerNode, ProgressDisplay, SegmentServer,
    TcpTransport, Tracker, TrackerClient, TrackerConfig, TrackerServer,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let progress = ProgressDisplay::new(args.is_quiet());

    let result = match &args.command {
        Command::Tracker(tracker_args) => {
            let config = TrackerConfig::from_args(tracker_args);
            config.validate().context("Invalid tracker configuration")?;
            run_tracker(config).await
        }
        Command::Peer(peer_args) => {
            let config = PeerConfig::from_args(peer_args);
            config.validate().context("Invalid peer configuration")?;
            run_peer(config, &progress).await
        }
        Command::Files { tracker } => {
            let client = query_client(tracker);
            let files = client.list_files().await.context("Failed to list files")?;
            progress.print_files(&files)?;
            Ok(())
        }
        Command::Peers { tracker } => {
            let client = query_client(tracker);
            let peers = client.list_peers().await.context("Failed to list peers")?;
            progress.print_peers(&peers)?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
        progress.print_error(&format!("{:#}", e))?;
    }
    result
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level: {:?}", level);
}

/// Install the stop handlers; the returned future resolves on Ctrl-C or SIGTERM
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = Result<&'static str>>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                Ok("Ctrl-C")
            }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    })
}

/// The returned future resolves on Ctrl-C
#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = Result<&'static str>>> {
    Ok(async {
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        Ok("Ctrl-C")
    })
}

/// Client for one-shot tracker queries
fn query_client(tracker: &str) -> TrackerClient {
    TrackerClient::new(Arc::new(TcpTransport::new(tracker)), "query")
}

/// Run the tracker until Ctrl-C or SIGTERM
async fn run_tracker(config: TrackerConfig) -> Result<()> {
    info!(
        "Starting tracker on {} (announce policy: {})",
        config.listen_addr, config.announce_policy
    );

    let tracker = Arc::new(Tracker::new(config.announce_policy));
    let server = TrackerServer::bind(&config.listen_addr, Arc::clone(&tracker)).await?;
    let monitor = LivenessMonitor::new(Arc::clone(&tracker), config.sweep_interval, config.peer_timeout).spawn();
    let stop = shutdown_signal()?;

    tokio::select! {
        result = server.run() => result?,
        signal = stop => {
            info!(
                "{} received, shutting down tracker ({} peers registered)",
                signal?,
                tracker.peer_count().await
            );
        }
    }

    monitor.abort();
    Ok(())
}

/// Run a peer: join, share, resume, download, then serve until Ctrl-C or SIGTERM
async fn run_peer(config: PeerConfig, progress: &ProgressDisplay) -> Result<()> {
    info!("Starting peer {} (tracker: {})", config.peer_addr, config.tracker_addr);
    let stop = shutdown_signal()?;

    let transport = Arc::new(TcpTransport::with_timeouts(
        config.tracker_addr.clone(),
        config.request_timeout,
        config.fetch_timeout,
    ));
    let node = PeerNode::new(&config, transport);

    let server = SegmentServer::bind(&config.listen_addr, node.store().clone())
        .await?
        .with_exchange_timeout(config.fetch_timeout);
    let server_task = tokio::spawn(server.run());

    let heartbeat = {
        let node = node.clone();
        let interval = config.heartbeat_interval;
        tokio::spawn(async move { node.run_heartbeat_loop(interval).await })
    };

    let session = async {
        node.join().await?;

        for path in &config.share {
            match node.share(path).await {
                Ok(file) => progress.print_status(&format!(
                    "Sharing {} ({} segments)",
                    file.file_name, file.num_segments
                ))?,
                Err(e) => warn!("{:#}", e),
            }
        }

        for (file_name, record) in node.engine().open_downloads().await {
            let on_disk = node.store().list(&file_name).await?.len() as u32;
            let stats = DownloadStats {
                segments_done: on_disk,
                total_segments: record.total_segments,
            };
            progress.print_progress(&file_name, &stats)?;
        }
        for (file_name, outcome) in node.resume_all().await {
            progress.print_outcome(&file_name, &outcome)?;
        }

        for file_name in &config.download {
            match node.download(file_name).await {
                Ok(outcome) => progress.print_outcome(file_name, &outcome)?,
                Err(e) => {
                    warn!("{:#}", e);
                    progress.print_error(&format!("{:#}", e))?;
                }
            }
        }

        progress.print_local_files(&node.status().await?)?;
        progress.print_status("Serving segments, press Ctrl-C to stop")?;

        server_task.await.context("Segment server task failed")??;
        Ok::<(), anyhow::Error>(())
    };

    let result = tokio::select! {
        result = session => result,
        signal = stop => signal.map(|name| info!("{} received, saving state", name)),
    };

    heartbeat.abort();
    node.shutdown().await?;
    result
}
