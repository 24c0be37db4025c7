use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::download::{ClientSettings, ExecutionMode, FetchSettings, RetryPolicy};
use crate::pacing::PacingSession;
use crate::proxy::{CandidatePool, ProxyDiscovery, ProxyValidator};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Sequential,
    Concurrent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_mode")]
    pub mode: RunMode,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub journal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
    #[serde(default = "default_batch_pause_millis")]
    pub batch_pause_millis: u64,
    #[serde(default = "default_echo_url")]
    pub echo_url: String,
    #[serde(default = "default_proxy_sources")]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_min_file_size")]
    pub min_file_size: u64,
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Behavioral pacing. When off, delays are drawn flat from `delay_range_secs`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_delay_range_secs")]
    pub delay_range_secs: [f64; 2],
    /// Multiplier on behavioral delays; 0.5 halves every pause.
    #[serde(default = "default_delay_scale")]
    pub delay_scale: f64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("ROM_Downloads")
}
fn default_mode() -> RunMode {
    RunMode::Sequential
}
fn default_max_concurrent() -> usize {
    2
}
fn default_max_retries() -> u32 {
    3
}
fn default_delay_scale() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_target_count() -> usize {
    15
}
fn default_batch_size() -> usize {
    20
}
fn default_probe_timeout_secs() -> u64 {
    10
}
fn default_source_timeout_secs() -> u64 {
    15
}
fn default_batch_pause_millis() -> u64 {
    1000
}
fn default_echo_url() -> String {
    "http://httpbin.org/ip".to_string()
}
fn default_proxy_sources() -> Vec<String> {
    [
        "https://www.proxy-list.download/api/v1/get?type=http",
        "https://api.proxyscrape.com/v2/?request=get&protocol=http&timeout=10000&country=all",
        "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
        "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
        "https://raw.githubusercontent.com/jetkai/proxy-list/main/online-proxies/txt/proxies-http.txt",
        "https://raw.githubusercontent.com/mmpx12/proxy-list/master/http.txt",
        "https://raw.githubusercontent.com/roosterkid/openproxylist/main/HTTPS_RAW.txt",
        "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
        "https://raw.githubusercontent.com/prxchk/proxy-list/main/http.txt",
        "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/http.txt",
        "https://raw.githubusercontent.com/sunny9577/proxy-scraper/master/proxies.txt",
        "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/http.txt",
        "https://raw.githubusercontent.com/hendrikbgr/Free-Proxy-Repo/master/proxy_list.txt",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_chunk_size() -> usize {
    1024 * 1024
}
fn default_min_file_size() -> u64 {
    1024
}
fn default_delay_range_secs() -> [f64; 2] {
    [2.0, 8.0]
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            mode: default_mode(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            journal: true,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_count: default_target_count(),
            batch_size: default_batch_size(),
            probe_timeout_secs: default_probe_timeout_secs(),
            source_timeout_secs: default_source_timeout_secs(),
            batch_pause_millis: default_batch_pause_millis(),
            echo_url: default_echo_url(),
            sources: default_proxy_sources(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            chunk_size: default_chunk_size(),
            min_file_size: default_min_file_size(),
            accept_invalid_certs: true,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_range_secs: default_delay_range_secs(),
            delay_scale: default_delay_scale(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.general.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be greater than 0");
        }

        if self.general.output_dir.as_os_str().is_empty() {
            anyhow::bail!("output_dir cannot be empty");
        }

        if self.proxy.batch_size == 0 {
            anyhow::bail!("proxy batch_size must be greater than 0");
        }

        if self.proxy.probe_timeout_secs == 0 || self.proxy.source_timeout_secs == 0 {
            anyhow::bail!("proxy timeouts must be greater than 0");
        }

        if self.proxy.enabled && self.proxy.echo_url.trim().is_empty() {
            anyhow::bail!("echo_url cannot be empty when proxies are enabled");
        }

        if self.fetch.timeout_secs == 0 || self.fetch.connect_timeout_secs == 0 {
            anyhow::bail!("fetch timeouts must be greater than 0");
        }

        if self.fetch.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }

        let [min, max] = self.pacing.delay_range_secs;
        if !(min >= 0.0 && min <= max) {
            anyhow::bail!(
                "delay_range_secs must be a non-negative [min, max] range, got [{}, {}]",
                min,
                max
            );
        }

        if !(self.pacing.delay_scale.is_finite() && self.pacing.delay_scale >= 0.0) {
            anyhow::bail!(
                "delay_scale must be a non-negative number, got {}",
                self.pacing.delay_scale
            );
        }

        Ok(())
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        match self.general.mode {
            RunMode::Sequential => ExecutionMode::Sequential,
            RunMode::Concurrent => ExecutionMode::Concurrent {
                workers: self.general.max_concurrent,
            },
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            timeout: Duration::from_secs(self.fetch.timeout_secs),
            connect_timeout: Duration::from_secs(self.fetch.connect_timeout_secs),
            accept_invalid_certs: self.fetch.accept_invalid_certs,
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            chunk_size: self.fetch.chunk_size,
            min_file_size: self.fetch.min_file_size,
            ..FetchSettings::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::human(self.general.max_retries)
    }

    pub fn pacing_session(&self) -> PacingSession {
        if self.pacing.enabled {
            PacingSession::new().with_delay_scale(self.pacing.delay_scale)
        } else {
            let [min, max] = self.pacing.delay_range_secs;
            PacingSession::fixed(min, max)
        }
    }

    pub fn proxy_discovery(&self) -> Result<ProxyDiscovery> {
        let pool = CandidatePool::new(
            self.proxy.sources.clone(),
            Duration::from_secs(self.proxy.source_timeout_secs),
        )?;
        let validator = ProxyValidator::new(
            self.proxy.echo_url.clone(),
            Duration::from_secs(self.proxy.probe_timeout_secs),
        )
        .with_batch_size(self.proxy.batch_size)
        .with_batch_pause(Duration::from_millis(self.proxy.batch_pause_millis))
        .with_accept_invalid_certs(self.fetch.accept_invalid_certs);

        Ok(ProxyDiscovery::new(pool, validator, self.proxy.target_count))
    }
}

pub struct ConfigManager {
    config_dir: PathBuf,
    config_file: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Load the per-user config, writing the defaults on first run.
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("", "", "romfetch")
            .context("Failed to determine config directory")?;

        Self::from_path(&project_dirs.config_dir().join("config.toml"))
    }

    /// Load a config file at an explicit location, creating it if missing.
    pub fn from_path(config_file: &Path) -> Result<Self> {
        let config_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
        }

        let config = if config_file.exists() {
            Self::load_config(config_file)?
        } else {
            let default_config = Config::default();
            Self::save_config(config_file, &default_config)?;
            default_config
        };

        Ok(Self {
            config_dir,
            config_file: config_file.to_path_buf(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save(&self) -> Result<()> {
        Self::save_config(&self.config_file, &self.config)
    }

    pub fn reload(&mut self) -> Result<()> {
        self.config = Self::load_config(&self.config_file)?;
        Ok(())
    }

    /// Overwrite the file with defaults.
    pub fn reset(&mut self) -> Result<()> {
        self.config = Config::default();
        self.save()
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    fn load_config(config_file: &Path) -> Result<Config> {
        let content = fs::read_to_string(config_file)
            .with_context(|| format!("Failed to read config file: {:?}", config_file))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_file))?;

        Ok(config)
    }

    fn save_config(config_file: &Path, config: &Config) -> Result<()> {
        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(config_file, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

        Ok(())
    }

    /// Write a defaults-only copy next to the active config for reference.
    pub fn create_sample_config(&self) -> Result<PathBuf> {
        let sample_file = self.config_dir.join("config.sample.toml");
        Self::write_sample(&sample_file)?;
        Ok(sample_file)
    }

    pub fn write_sample(path: &Path) -> Result<()> {
        Self::save_config(path, &Config::default())
    }

    pub fn validate(&self) -> Result<()> {
        self.config.validate()
    }
}
