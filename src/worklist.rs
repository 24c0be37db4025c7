use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::download::DownloadItem;

const ILLEGAL_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const HEADER_PREFIXES: &[&str] = &["Search:", "Total matches:", "Generated:"];

/// Replace characters that common filesystems reject with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if ILLEGAL_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn is_url(line: &str) -> bool {
    line.starts_with("http://") || line.starts_with("https://")
}

/// Parse alternating name and URL lines into items of `group`.
///
/// Blank lines and report headers are ignored. A URL with no pending name is
/// dropped, and a name not followed by a URL is replaced by the next name.
pub fn parse_worklist(content: &str, group: &str) -> Vec<DownloadItem> {
    let mut items = Vec::new();
    let mut pending_name: Option<&str> = None;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || HEADER_PREFIXES.iter().any(|p| line.starts_with(p)) {
            continue;
        }

        if is_url(line) {
            match pending_name.take() {
                Some(name) => items.push(DownloadItem::new(name, line, group)),
                None => debug!("Skipping URL without a name: {}", line),
            }
        } else if let Some(orphan) = pending_name.replace(line) {
            debug!("Skipping name without a URL: {}", orphan);
        }
    }

    items
}

/// Items from one worklist file. The group defaults to the parent directory's name.
pub fn load_file(path: &Path, group: Option<&str>) -> Result<Vec<DownloadItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read worklist: {:?}", path))?;

    let group = match group {
        Some(group) => group.to_string(),
        None => path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string()),
    };

    let items = parse_worklist(&content, &group);
    debug!("Parsed {} items from {:?}", items.len(), path);
    Ok(items)
}

/// Items from every non-empty `<dir>/<group>/*.txt`, grouped by subdirectory name.
pub fn load_dir(dir: &Path) -> Result<Vec<DownloadItem>> {
    if !dir.is_dir() {
        anyhow::bail!("Worklist directory not found: {:?}", dir);
    }

    let mut paths: Vec<_> = WalkDir::new(dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable worklist entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "txt"))
        .filter(|entry| entry.metadata().map(|m| m.len() > 0).unwrap_or(false))
        .map(|entry| entry.into_path())
        .collect();
    paths.sort();

    let mut items = Vec::new();
    for path in &paths {
        items.extend(load_file(path, None)?);
    }

    info!(
        "Loaded {} items from {} worklist files under {:?}",
        items.len(),
        paths.len(),
        dir
    );
    Ok(items)
}
