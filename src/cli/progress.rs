//! Progress display module
//!
//! Console output for download results and tracker queries.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::peer::DownloadOutcome;
use crate::protocol::{PeerSummary, StoredFile};

/// Download statistics for progress display
#[derive(Debug, Clone, Default)]
pub struct DownloadStats {
    /// Segments present locally
    pub segments_done: u32,
    /// Segments in the file
    pub total_segments: u32,
}

impl DownloadStats {
    /// Create new download stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction complete, 0.0 to 1.0
    pub fn progress(&self) -> f64 {
        if self.total_segments == 0 {
            0.0
        } else {
            self.segments_done as f64 / self.total_segments as f64
        }
    }

    /// Format bytes to human readable string
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_index])
    }

    /// Format duration to human readable string
    pub fn format_duration(duration: Duration) -> String {
        let total_secs = duration.as_secs();
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    /// One-line progress bar
    pub fn render_bar(&self, width: usize) -> String {
        let filled = ((self.progress() * width as f64) as usize).min(width);
        format!(
            "[{}{}] {:.1}% ({}/{} segments)",
            "=".repeat(filled),
            " ".repeat(width - filled),
            self.progress() * 100.0,
            self.segments_done,
            self.total_segments
        )
    }
}

/// Console output for the CLI
pub struct ProgressDisplay {
    /// Start time of the command
    start_time: Instant,
    /// Quiet mode (no progress output)
    quiet: bool,
}

impl ProgressDisplay {
    /// Create a new progress display
    pub fn new(quiet: bool) -> Self {
        Self {
            start_time: Instant::now(),
            quiet,
        }
    }

    /// Print the result of one download
    pub fn print_outcome(&self, file_name: &str, outcome: &DownloadOutcome) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        match outcome {
            DownloadOutcome::Complete { path, bytes } => {
                println!("Download Complete: {}", file_name);
                println!("  Saved to: {}", path.display());
                println!("  Size: {}", DownloadStats::format_bytes(*bytes));
                println!("  Elapsed Time: {}", DownloadStats::format_duration(self.start_time.elapsed()));
            }
            DownloadOutcome::Incomplete { missing } => {
                println!("Download Incomplete: {}", file_name);
                println!("  Missing segments: {}", format_indices(missing));
                println!("  Progress is saved; run the peer again to resume.");
            }
        }
        io::stdout().flush()
    }

    /// Print a progress bar line
    pub fn print_progress(&self, file_name: &str, stats: &DownloadStats) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        println!("{} {}", file_name, stats.render_bar(40));
        Ok(())
    }

    /// Print the tracker's file list
    pub fn print_files(&self, files: &[String]) -> io::Result<()> {
        if files.is_empty() {
            println!("No files available.");
            return Ok(());
        }
        println!("Available Files:");
        for (i, file) in files.iter().enumerate() {
            println!("  {}. {}", i + 1, file);
        }
        Ok(())
    }

    /// Print the tracker's peer list
    pub fn print_peers(&self, peers: &[PeerSummary]) -> io::Result<()> {
        if peers.is_empty() {
            println!("No peers connected.");
            return Ok(());
        }
        println!("Connected Peers:");
        for peer in peers {
            println!(
                "  {} [{:?}, {:?}] last seen {} ago",
                peer.peer_addr,
                peer.status,
                peer.role,
                DownloadStats::format_duration(Duration::from_secs(peer.idle_secs))
            );
            for file in &peer.files {
                let stats = DownloadStats {
                    segments_done: file.current_segments,
                    total_segments: file.num_segments,
                };
                println!("    {} {}", file.file_name, stats.render_bar(20));
            }
        }
        Ok(())
    }

    /// Print what a peer stores locally
    pub fn print_local_files(&self, files: &[StoredFile]) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        println!("Local Files:");
        for file in files {
            println!("  {} ({} segments)", file.file_name, file.segments);
        }
        Ok(())
    }

    /// Print a status message
    pub fn print_status(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        println!("{}", message);
        Ok(())
    }

    /// Print an error message
    pub fn print_error(&self, message: &str) -> io::Result<()> {
        eprintln!("Error: {}", message);
        Ok(())
    }

    /// Get the elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

/// Compact rendering of ascending indices, e.g. `0-3, 7, 9-10`
pub fn format_indices(indices: &[u32]) -> String {
    let mut parts = Vec::new();
    let mut iter = indices.iter().copied().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }

    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(DownloadStats::format_bytes(0), "0.00 B");
        assert_eq!(DownloadStats::format_bytes(1024), "1.00 KB");
        assert_eq!(DownloadStats::format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(DownloadStats::format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(DownloadStats::format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(DownloadStats::format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_render_bar() {
        let stats = DownloadStats { segments_done: 5, total_segments: 10 };
        assert_eq!(stats.render_bar(10), "[=====     ] 50.0% (5/10 segments)");

        let empty = DownloadStats::new();
        assert_eq!(empty.progress(), 0.0);
    }

    #[test]
    fn test_format_indices() {
        assert_eq!(format_indices(&[]), "");
        assert_eq!(format_indices(&[3]), "3");
        assert_eq!(format_indices(&[0, 1, 2, 3, 7, 9, 10]), "0-3, 7, 9-10");
    }

    #[test]
    fn test_progress_display_quiet() {
        let display = ProgressDisplay::new(true);
        assert!(display.is_quiet());
        assert!(display.print_status("hidden").is_ok());
    }
}
