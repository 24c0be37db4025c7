use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::{AggregateStats, Route};
use crate::pacing::SessionStats;

/// Byte counters for one in-flight attempt.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub bytes_written: u64,
    pub expected_total: Option<u64>,
    pub started_at: Instant,
}

impl DownloadProgress {
    /// Start counting from an existing partial file's size.
    pub fn resume_from(bytes_on_disk: u64, expected_total: Option<u64>) -> Self {
        Self {
            bytes_written: bytes_on_disk,
            expected_total,
            started_at: Instant::now(),
        }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.bytes_written = self.bytes_written.saturating_add(bytes);
    }

    pub fn percent(&self) -> Option<u8> {
        match self.expected_total {
            Some(total) if total > 0 => {
                Some((self.bytes_written.min(total) as f64 / total as f64 * 100.0) as u8)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        id: String,
        name: String,
        output_path: PathBuf,
        route: Route,
        resume_from: u64,
        expected_total: Option<u64>,
    },
    Progress {
        id: String,
        bytes_delta: u64,
        bytes_written: u64,
        expected_total: Option<u64>,
        speed_bps: u64,
    },
    Retry {
        id: String,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: String,
    },
    Completed {
        id: String,
        bytes_written: u64,
    },
    Skipped {
        id: String,
        bytes_on_disk: u64,
    },
    Failed {
        id: String,
        error: String,
        attempts: u32,
    },
    Cancelled {
        id: String,
    },
    ItemFinished {
        id: String,
        success: bool,
        totals: AggregateStats,
    },
    SessionRotated {
        session: SessionStats,
    },
}

/// Consumer of engine progress. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

pub struct ProgressTracker;

impl ProgressTracker {
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.1} {}", size, UNITS[unit_index])
        }
    }

    pub fn format_speed(bytes_per_second: u64) -> String {
        format!("{}/s", Self::format_bytes(bytes_per_second))
    }

    pub fn format_gigabytes(bytes: u64) -> String {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }

    pub fn calculate_eta(
        bytes_downloaded: u64,
        total_bytes: u64,
        speed_bps: u64,
    ) -> Option<Duration> {
        if speed_bps == 0 || total_bytes == 0 || bytes_downloaded >= total_bytes {
            return None;
        }

        Some(Duration::from_secs(
            (total_bytes - bytes_downloaded) / speed_bps,
        ))
    }

    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(ProgressTracker::format_bytes(512), "512 B");
        assert_eq!(ProgressTracker::format_bytes(1536), "1.5 KB");
        assert_eq!(ProgressTracker::format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(ProgressTracker::format_speed(2048), "2.0 KB/s");
        assert_eq!(
            ProgressTracker::format_gigabytes(3 * 1024 * 1024 * 1024 / 2),
            "1.50 GB"
        );
    }

    #[test]
    fn test_eta_and_duration() {
        assert_eq!(
            ProgressTracker::calculate_eta(0, 1000, 100),
            Some(Duration::from_secs(10))
        );
        assert_eq!(ProgressTracker::calculate_eta(1000, 1000, 100), None);
        assert_eq!(ProgressTracker::calculate_eta(0, 1000, 0), None);
        assert_eq!(
            ProgressTracker::format_duration(Duration::from_secs(3725)),
            "1h 2m 5s"
        );
        assert_eq!(
            ProgressTracker::format_duration(Duration::from_secs(42)),
            "42s"
        );
    }

    #[test]
    fn test_progress_counts_from_resume_point() {
        let mut progress = DownloadProgress::resume_from(250, Some(1000));
        assert_eq!(progress.percent(), Some(25));
        progress.advance(250);
        assert_eq!(progress.bytes_written, 500);
        assert_eq!(progress.percent(), Some(50));

        let unknown = DownloadProgress::resume_from(0, None);
        assert_eq!(unknown.percent(), None);
    }

    #[test]
    fn test_channel_sink_forwards_events() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        sender.emit(ProgressEvent::Cancelled {
            id: "http://roms.test/a.zip".to_string(),
        });
        assert!(matches!(
            receiver.try_recv(),
            Ok(ProgressEvent::Cancelled { .. })
        ));
    }
}
