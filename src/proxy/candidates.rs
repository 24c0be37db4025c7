use anyhow::{Context, Result, bail};
use futures_util::future::join_all;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

static CANDIDATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9.\-]*[A-Za-z0-9])?):(\d{1,5})$")
        .expect("candidate pattern is valid")
});

/// Normalize one line of a proxy list into `host:port`, or drop it.
pub fn parse_candidate(line: &str) -> Option<String> {
    let line = line.trim();
    let caps = CANDIDATE_PATTERN.captures(line)?;
    let port: u32 = caps[2].parse().ok()?;
    if port == 0 || port > u16::MAX as u32 {
        return None;
    }
    Some(format!("{}:{}", &caps[1], port))
}

/// Order-preserving set of `host:port` strings.
#[derive(Debug, Default)]
pub struct CandidateSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the candidate was not already present.
    pub fn insert(&mut self, candidate: String) -> bool {
        if self.seen.contains(&candidate) {
            return false;
        }
        self.seen.insert(candidate.clone());
        self.ordered.push(candidate);
        true
    }

    /// Add every valid line of a plaintext list, returning how many were new.
    pub fn extend_from_text(&mut self, body: &str) -> usize {
        body.lines()
            .filter_map(parse_candidate)
            .filter(|candidate| self.insert(candidate.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

/// Fans out to every configured list source and merges what comes back.
pub struct CandidatePool {
    client: Client,
    sources: Vec<String>,
    source_timeout: Duration,
}

impl CandidatePool {
    pub fn new(sources: Vec<String>, source_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(source_timeout)
            .no_proxy()
            .build()
            .context("Failed to create HTTP client for proxy sources")?;

        Ok(Self::with_client(client, sources, source_timeout))
    }

    pub fn with_client(client: Client, sources: Vec<String>, source_timeout: Duration) -> Self {
        Self {
            client,
            sources,
            source_timeout,
        }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Fetch every source concurrently. Failed sources are logged and skipped.
    pub async fn gather(&self) -> Vec<String> {
        let fetches = self.sources.iter().map(|url| self.fetch_source(url));
        let results = join_all(fetches).await;

        let mut merged = CandidateSet::new();
        for (index, (url, result)) in self.sources.iter().zip(results).enumerate() {
            match result {
                Ok(body) => {
                    let added = merged.extend_from_text(&body);
                    debug!("Source {} ({}) contributed {} new candidates", index + 1, url, added);
                }
                Err(e) => {
                    warn!("Proxy source {} ({}) failed: {:#}", index + 1, url, e);
                }
            }
        }

        info!(
            "Collected {} candidates from {} sources",
            merged.len(),
            self.sources.len()
        );
        merged.into_vec()
    }

    async fn fetch_source(&self, url: &str) -> Result<String> {
        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .context("Failed to send request")?;

            if !response.status().is_success() {
                bail!("Source responded with status: {}", response.status());
            }

            response.text().await.context("Failed to read response body")
        };

        match tokio::time::timeout(self.source_timeout, request).await {
            Ok(result) => result,
            Err(_) => bail!("Timed out after {:?}", self.source_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidate_accepts_host_port() {
        assert_eq!(
            parse_candidate("  192.168.1.10:8080 "),
            Some("192.168.1.10:8080".to_string())
        );
        assert_eq!(
            parse_candidate("proxy.example.net:3128"),
            Some("proxy.example.net:3128".to_string())
        );
    }

    #[test]
    fn test_parse_candidate_rejects_malformed_lines() {
        assert_eq!(parse_candidate(""), None);
        assert_eq!(parse_candidate("# comment"), None);
        assert_eq!(parse_candidate("1.2.3.4"), None);
        assert_eq!(parse_candidate("1.2.3.4:80a"), None);
        assert_eq!(parse_candidate("1.2.3.4:"), None);
        assert_eq!(parse_candidate(":8080"), None);
        assert_eq!(parse_candidate("1.2.3.4:80:90"), None);
        assert_eq!(parse_candidate("http://1.2.3.4:80"), None);
        assert_eq!(parse_candidate("1.2.3.4:99999"), None);
        assert_eq!(parse_candidate("1.2.3.4:0"), None);
    }

    #[test]
    fn test_candidate_set_dedups_across_sources() {
        let mut set = CandidateSet::new();
        let first = set.extend_from_text("1.1.1.1:80\n2.2.2.2:8080\ngarbage\n");
        let second = set.extend_from_text("2.2.2.2:8080\r\n3.3.3.3:3128\n");

        assert_eq!(first, 2);
        assert_eq!(second, 1);
        assert_eq!(
            set.into_vec(),
            vec!["1.1.1.1:80", "2.2.2.2:8080", "3.3.3.3:3128"]
        );
    }

    #[tokio::test]
    async fn test_gather_with_unreachable_sources_is_empty() {
        let pool = CandidatePool::new(
            vec!["http://127.0.0.1:1/list.txt".to_string()],
            Duration::from_secs(2),
        )
        .unwrap();

        let candidates = pool.gather().await;
        assert!(candidates.is_empty());
    }
}
