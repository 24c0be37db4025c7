use futures_util::future::join_all;
use reqwest::{Client, Proxy, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use super::ProxyEndpoint;

#[derive(Debug, Deserialize)]
struct EchoResponse {
    origin: String,
}

/// Probes candidates in batches against an endpoint that echoes the caller's IP.
#[derive(Debug, Clone)]
pub struct ProxyValidator {
    echo_url: String,
    probe_timeout: Duration,
    batch_size: usize,
    batch_pause: Duration,
    accept_invalid_certs: bool,
}

impl ProxyValidator {
    pub fn new(echo_url: String, probe_timeout: Duration) -> Self {
        Self {
            echo_url,
            probe_timeout,
            batch_size: 20,
            batch_pause: Duration::from_secs(1),
            accept_invalid_certs: true,
        }
    }

    /// Match the download clients so an HTTPS echo endpoint behaves the same.
    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn accepts_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    /// Test candidates until `target` of them work or the list runs out.
    pub async fn validate(&self, candidates: &[String], target: usize) -> Vec<ProxyEndpoint> {
        let mut working = Vec::new();
        if target == 0 {
            return working;
        }

        let batches: Vec<&[String]> = candidates.chunks(self.batch_size).collect();
        for (index, batch) in batches.iter().enumerate() {
            debug!(
                "Testing proxy batch {}/{} ({} candidates)",
                index + 1,
                batches.len(),
                batch.len()
            );

            let results = join_all(batch.iter().map(|candidate| self.probe(candidate))).await;
            for endpoint in results.into_iter().flatten() {
                debug!(
                    "Working proxy: {} -> IP: {}",
                    endpoint.address,
                    endpoint.last_verified_ip.as_deref().unwrap_or("unknown")
                );
                working.push(endpoint);
                if working.len() >= target {
                    return working;
                }
            }

            if index + 1 < batches.len() {
                sleep(self.batch_pause).await;
            }
        }

        working
    }

    /// A candidate works iff the echo endpoint answers 200 with a non-empty origin.
    pub async fn probe(&self, candidate: &str) -> Option<ProxyEndpoint> {
        let endpoint = ProxyEndpoint::http(candidate);
        let proxy = Proxy::all(endpoint.url()).ok()?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.probe_timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .ok()?;

        let probe = async {
            let response = client.get(&self.echo_url).send().await.ok()?;
            if response.status() != StatusCode::OK {
                return None;
            }
            let echo: EchoResponse = response.json().await.ok()?;
            let origin = echo.origin.trim().to_string();
            (!origin.is_empty()).then_some(origin)
        };

        let origin = tokio::time::timeout(self.probe_timeout, probe)
            .await
            .ok()
            .flatten()?;

        Some(endpoint.with_verified_ip(origin))
    }
}
