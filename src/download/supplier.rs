use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Proxy};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::proxy::{ProxyDiscovery, ProxyEndpoint, ProxyRotator};

/// Which network path an attempt used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Route {
    Direct,
    Proxy(String),
}

impl Route {
    pub fn is_proxy(&self) -> bool {
        matches!(self, Route::Proxy(_))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct => write!(f, "direct"),
            Route::Proxy(url) => write!(f, "proxy {}", url),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            accept_invalid_certs: true,
        }
    }
}

impl ClientSettings {
    /// A client bound to one exit path. System proxy settings are never consulted.
    pub fn build_client(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client> {
        let builder = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs);

        let builder = match proxy {
            Some(endpoint) => builder.proxy(
                Proxy::all(endpoint.url())
                    .with_context(|| format!("Invalid proxy address: {}", endpoint.address))?,
            ),
            None => builder.no_proxy(),
        };

        builder.build().context("Failed to create HTTP client")
    }
}

/// A ready-to-use client plus the proxy it is bound to, if any.
#[derive(Debug, Clone)]
pub struct Connection {
    client: Client,
    proxy: Option<ProxyEndpoint>,
}

impl Connection {
    pub fn direct(client: Client) -> Self {
        Self {
            client,
            proxy: None,
        }
    }

    pub fn proxied(client: Client, endpoint: ProxyEndpoint) -> Self {
        Self {
            client,
            proxy: Some(endpoint),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn proxy(&self) -> Option<&ProxyEndpoint> {
        self.proxy.as_ref()
    }

    pub fn route(&self) -> Route {
        match &self.proxy {
            Some(endpoint) => Route::Proxy(endpoint.url()),
            None => Route::Direct,
        }
    }
}

/// Source of outbound connections, chosen once when the orchestrator is built.
#[async_trait]
pub trait ConnectionSupplier: Send + Sync {
    /// Next connection to use. Never fails; a proxied supplier with an empty
    /// pool hands out direct connections.
    async fn acquire(&self) -> Connection;

    /// Drop pooled connections and rebuild the underlying session.
    async fn rebuild(&self) -> Result<()>;

    /// Number of proxies currently in rotation.
    async fn pool_size(&self) -> usize;
}

pub struct DirectSupplier {
    settings: ClientSettings,
    client: RwLock<Client>,
}

impl DirectSupplier {
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let client = settings.build_client(None)?;
        Ok(Self {
            settings,
            client: RwLock::new(client),
        })
    }
}

#[async_trait]
impl ConnectionSupplier for DirectSupplier {
    async fn acquire(&self) -> Connection {
        Connection::direct(self.client.read().await.clone())
    }

    async fn rebuild(&self) -> Result<()> {
        let fresh = self.settings.build_client(None)?;
        *self.client.write().await = fresh;
        info!("Rebuilt direct HTTP session");
        Ok(())
    }

    async fn pool_size(&self) -> usize {
        0
    }
}

struct ProxiedState {
    rotator: ProxyRotator,
    clients: HashMap<String, Client>,
    direct: Client,
}

impl ProxiedState {
    fn build(settings: &ClientSettings, endpoints: Vec<ProxyEndpoint>) -> Result<Self> {
        let mut clients = HashMap::with_capacity(endpoints.len());
        let mut usable = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            match settings.build_client(Some(&endpoint)) {
                Ok(client) => {
                    clients.insert(endpoint.address.clone(), client);
                    usable.push(endpoint);
                }
                Err(e) => warn!("Dropping proxy {}: {:#}", endpoint.address, e),
            }
        }

        Ok(Self {
            rotator: ProxyRotator::new(usable),
            clients,
            direct: settings.build_client(None)?,
        })
    }
}

/// Hands out proxies round-robin from a validated pool.
pub struct ProxiedSupplier {
    settings: ClientSettings,
    discovery: Option<ProxyDiscovery>,
    state: RwLock<ProxiedState>,
}

impl ProxiedSupplier {
    /// Discover and validate a pool, then start rotating through it.
    pub async fn connect(settings: ClientSettings, discovery: ProxyDiscovery) -> Result<Self> {
        let endpoints = discovery.discover().await;
        let state = ProxiedState::build(&settings, endpoints)?;
        Ok(Self {
            settings,
            discovery: Some(discovery),
            state: RwLock::new(state),
        })
    }

    /// Rotate through an already-validated pool. Rebuilds reuse the same endpoints.
    pub fn with_pool(settings: ClientSettings, endpoints: Vec<ProxyEndpoint>) -> Result<Self> {
        let state = ProxiedState::build(&settings, endpoints)?;
        Ok(Self {
            settings,
            discovery: None,
            state: RwLock::new(state),
        })
    }

    pub async fn endpoints(&self) -> Vec<ProxyEndpoint> {
        self.state.read().await.rotator.endpoints().to_vec()
    }
}

#[async_trait]
impl ConnectionSupplier for ProxiedSupplier {
    async fn acquire(&self) -> Connection {
        let state = self.state.read().await;
        if let Some(endpoint) = state.rotator.next_proxy() {
            if let Some(client) = state.clients.get(&endpoint.address) {
                return Connection::proxied(client.clone(), endpoint);
            }
        }
        Connection::direct(state.direct.clone())
    }

    async fn rebuild(&self) -> Result<()> {
        let endpoints = match &self.discovery {
            Some(discovery) => discovery.discover().await,
            None => self.endpoints().await,
        };
        let fresh = ProxiedState::build(&self.settings, endpoints)?;
        let size = fresh.rotator.len();
        *self.state.write().await = fresh;

        if size == 0 {
            warn!("Rebuilt session has no proxies, using direct connections");
        } else {
            info!("Rebuilt proxy session with {} proxies", size);
        }
        Ok(())
    }

    async fn pool_size(&self) -> usize {
        self.state.read().await.rotator.len()
    }
}
