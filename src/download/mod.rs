pub mod fetcher;
pub mod journal;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod supplier;

pub use fetcher::{FetchReport, FetchSettings, Fetcher};
pub use journal::{JOURNAL_FILE_NAME, Journal, JournalRecord, JournalStatus, sha256_file};
pub use orchestrator::{ExecutionMode, Orchestrator, OrchestratorOptions, RunSummary};
pub use progress::{DownloadProgress, NullSink, ProgressEvent, ProgressSink, ProgressTracker};
pub use retry::RetryPolicy;
pub use supplier::{
    ClientSettings, Connection, ConnectionSupplier, DirectSupplier, ProxiedSupplier, Route,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::FetchError;
use crate::worklist::sanitize_filename;

/// One archive to fetch. Identity is `source_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub display_name: String,
    pub source_url: String,
    pub logical_group: String,
    pub local_filename: String,
}

impl DownloadItem {
    pub fn new(display_name: &str, source_url: &str, logical_group: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            source_url: source_url.to_string(),
            logical_group: logical_group.to_string(),
            local_filename: sanitize_filename(display_name),
        }
    }

    /// `<output_dir>/<group>/<filename>`, both components sanitized.
    pub fn destination(&self, output_dir: &Path) -> PathBuf {
        output_dir
            .join(sanitize_filename(&self.logical_group))
            .join(sanitize_filename(&self.local_filename))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub completed: u32,
    pub failed: u32,
    pub total_bytes: u64,
    pub proxy_used: u32,
    pub direct_used: u32,
}

impl AggregateStats {
    pub fn finished(&self) -> u32 {
        self.completed + self.failed
    }

    /// Share of routed items that went through a proxy, in percent.
    pub fn proxy_ratio(&self) -> f64 {
        let routed = self.proxy_used + self.direct_used;
        if routed == 0 {
            0.0
        } else {
            self.proxy_used as f64 / routed as f64 * 100.0
        }
    }
}

/// Final state of one item after its retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Succeeded {
        report: FetchReport,
        route: Route,
        attempts: u32,
    },
    /// Already complete on disk according to the journal.
    Skipped { bytes_on_disk: u64 },
    Failed {
        error: FetchError,
        route: Route,
        attempts: u32,
    },
    Cancelled,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ItemOutcome::Succeeded { .. } | ItemOutcome::Skipped { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_layout_is_sanitized() {
        let item = DownloadItem::new(
            "Zelda: A Link? <Rev 1>.zip",
            "http://roms.test/zelda.zip",
            "Game Boy/Color",
        );

        assert_eq!(item.local_filename, "Zelda_ A Link_ _Rev 1_.zip");
        assert_eq!(
            item.destination(Path::new("/out")),
            PathBuf::from("/out/Game Boy_Color/Zelda_ A Link_ _Rev 1_.zip")
        );
    }

    #[test]
    fn test_proxy_ratio() {
        let mut stats = AggregateStats::default();
        assert_eq!(stats.proxy_ratio(), 0.0);

        stats.proxy_used = 3;
        stats.direct_used = 1;
        assert_eq!(stats.proxy_ratio(), 75.0);
    }
}
