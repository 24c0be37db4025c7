pub mod candidates;
pub mod headers;
pub mod rotator;
pub mod validator;

pub use candidates::{CandidatePool, CandidateSet, parse_candidate};
pub use headers::{BrowserFamily, RequestProfile};
pub use rotator::ProxyRotator;
pub use validator::ProxyValidator;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyScheme::Http => write!(f, "http"),
        }
    }
}

/// A relay that answered the echo probe. Never mutated after validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub address: String,
    pub scheme: ProxyScheme,
    pub last_verified_ip: Option<String>,
}

impl ProxyEndpoint {
    pub fn http(address: &str) -> Self {
        Self {
            address: address.to_string(),
            scheme: ProxyScheme::Http,
            last_verified_ip: None,
        }
    }

    pub fn with_verified_ip(mut self, ip: String) -> Self {
        self.last_verified_ip = Some(ip);
        self
    }

    /// Proxy URL in the form reqwest expects, e.g. `http://1.2.3.4:8080`.
    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Candidate gathering followed by validation, producing a fresh pool.
pub struct ProxyDiscovery {
    pool: CandidatePool,
    validator: ProxyValidator,
    target_count: usize,
}

impl ProxyDiscovery {
    pub fn new(pool: CandidatePool, validator: ProxyValidator, target_count: usize) -> Self {
        Self {
            pool,
            validator,
            target_count,
        }
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn validator(&self) -> &ProxyValidator {
        &self.validator
    }

    /// Build a brand new pool. An empty result is reported but is not an error.
    pub async fn discover(&self) -> Vec<ProxyEndpoint> {
        let candidates = self.pool.gather().await;
        info!("Gathered {} unique proxy candidates", candidates.len());

        let working = self
            .validator
            .validate(&candidates, self.target_count)
            .await;

        if working.is_empty() {
            warn!("No working proxies found, falling back to direct connections");
        } else {
            info!(
                "Validated {}/{} requested proxies",
                working.len(),
                self.target_count
            );
        }

        working
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let endpoint = ProxyEndpoint::http("10.0.0.1:3128");
        assert_eq!(endpoint.url(), "http://10.0.0.1:3128");
        assert_eq!(endpoint.to_string(), "http://10.0.0.1:3128");
        assert!(endpoint.last_verified_ip.is_none());

        let verified = endpoint.with_verified_ip("203.0.113.7".to_string());
        assert_eq!(verified.last_verified_ip.as_deref(), Some("203.0.113.7"));
    }
}
