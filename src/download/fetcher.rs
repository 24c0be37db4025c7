use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_RANGE, CONTENT_TYPE, HeaderValue, RANGE};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Connection, DownloadItem, DownloadProgress, ProgressEvent, ProgressSink};
use crate::error::FetchError;
use crate::proxy::RequestProfile;

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Write buffer size; the file sees writes of at most this many bytes.
    pub chunk_size: usize,
    /// Completed files smaller than this are treated as error pages.
    pub min_file_size: u64,
    pub progress_interval: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            min_file_size: 1024,
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// A completed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    /// Bytes received during this attempt.
    pub bytes_written: u64,
    /// Size of the destination file afterwards.
    pub file_size: u64,
    /// Offset the attempt resumed from, 0 for a fresh download.
    pub resumed_from: u64,
}

pub struct Fetcher {
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// One attempt at `item`, resuming from whatever is already at `destination`.
    ///
    /// A partial file is left in place on network errors and cancellation so
    /// the next attempt can continue from it.
    pub async fn fetch(
        &self,
        item: &DownloadItem,
        destination: &Path,
        connection: &Connection,
        profile: &RequestProfile,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, FetchError> {
        let id = item.source_url.clone();
        let resume_pos = match fs::metadata(destination).await {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        };

        let mut headers = profile.to_header_map();
        // Range offsets count identity-encoded bytes
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        if resume_pos > 0 {
            if let Ok(range) = HeaderValue::from_str(&format!("bytes={}-", resume_pos)) {
                headers.insert(RANGE, range);
            }
        }
        let request = connection
            .client()
            .get(&item.source_url)
            .headers(headers);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && resume_pos > 0 {
            let total = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_total);
            if total == Some(resume_pos) && resume_pos >= self.settings.min_file_size {
                debug!("{} is already complete at {} bytes", id, resume_pos);
                return Ok(FetchReport {
                    bytes_written: 0,
                    file_size: resume_pos,
                    resumed_from: resume_pos,
                });
            }
        }
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if is_page_content_type(content_type) {
                return Err(FetchError::ContentValidation(format!(
                    "server returned {} instead of a file",
                    content_type
                )));
            }
        }

        // A plain 200 to a range request means the server ignored the range.
        let resumed_from = if status == StatusCode::PARTIAL_CONTENT {
            resume_pos
        } else {
            if resume_pos > 0 {
                debug!("{} ignored range request, restarting from 0", id);
            }
            0
        };

        let expected_total = if resumed_from > 0 {
            response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_total)
                .or_else(|| response.content_length().map(|len| len + resumed_from))
        } else {
            response.content_length()
        };

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = if resumed_from > 0 {
            OpenOptions::new().append(true).open(destination).await?
        } else {
            fs::File::create(destination).await?
        };
        let mut writer = BufWriter::with_capacity(self.settings.chunk_size.max(1), file);

        sink.emit(ProgressEvent::Started {
            id: id.clone(),
            name: item.display_name.clone(),
            output_path: destination.to_path_buf(),
            route: connection.route(),
            resume_from: resumed_from,
            expected_total,
        });

        let mut progress = DownloadProgress::resume_from(resumed_from, expected_total);
        let mut last_sample = Instant::now();
        let mut sampled_bytes = progress.bytes_written;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    writer.flush().await?;
                    return Err(FetchError::Cancelled);
                }
                next = stream.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    writer.flush().await?;
                    return Err(e.into());
                }
                None => break,
            };

            writer.write_all(&chunk).await?;
            progress.advance(chunk.len() as u64);

            let elapsed = last_sample.elapsed();
            if elapsed >= self.settings.progress_interval {
                let delta = progress.bytes_written - sampled_bytes;
                sink.emit(ProgressEvent::Progress {
                    id: id.clone(),
                    bytes_delta: delta,
                    bytes_written: progress.bytes_written,
                    expected_total,
                    speed_bps: (delta as f64 / elapsed.as_secs_f64()) as u64,
                });
                last_sample = Instant::now();
                sampled_bytes = progress.bytes_written;
            }
        }

        writer.flush().await?;
        drop(writer);

        let tail = progress.bytes_written - sampled_bytes;
        if tail > 0 {
            sink.emit(ProgressEvent::Progress {
                id: id.clone(),
                bytes_delta: tail,
                bytes_written: progress.bytes_written,
                expected_total,
                speed_bps: 0,
            });
        }

        let file_size = fs::metadata(destination).await?.len();
        if file_size < self.settings.min_file_size {
            warn!(
                "{} finished at {} bytes, below the {} byte minimum; discarding",
                item.display_name, file_size, self.settings.min_file_size
            );
            fs::remove_file(destination).await?;
            return Err(FetchError::ContentValidation(format!(
                "file is only {} bytes",
                file_size
            )));
        }

        Ok(FetchReport {
            bytes_written: progress.bytes_written - resumed_from,
            file_size,
            resumed_from,
        })
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new(FetchSettings::default())
    }
}

/// HTML or any `text/*` type indicates an error or interstitial page.
fn is_page_content_type(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    let essence = lowered.split(';').next().unwrap_or_default().trim();
    essence.starts_with("text/") || essence.contains("html")
}

/// Total length from `bytes 1024-2047/2048` or `bytes */2048`. `*` totals yield `None`.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_content_types() {
        assert!(is_page_content_type("text/html"));
        assert!(is_page_content_type("text/html; charset=utf-8"));
        assert!(is_page_content_type("TEXT/PLAIN"));
        assert!(is_page_content_type("application/xhtml+xml"));
        assert!(!is_page_content_type("application/zip"));
        assert!(!is_page_content_type("application/octet-stream"));
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(content_range_total("bytes 1024-2047/2048"), Some(2048));
        assert_eq!(content_range_total("bytes */4096"), Some(4096));
        assert_eq!(content_range_total("bytes 0-99/*"), None);
        assert_eq!(content_range_total("garbage"), None);
    }

    #[test]
    fn test_default_settings() {
        let settings = FetchSettings::default();
        assert_eq!(settings.chunk_size, 1_048_576);
        assert_eq!(settings.min_file_size, 1024);
        assert_eq!(settings.progress_interval, Duration::from_secs(1));
    }
}
