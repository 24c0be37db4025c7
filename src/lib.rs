pub mod config;
pub mod download;
pub mod error;
pub mod pacing;
pub mod proxy;
pub mod worklist;

// Re-export commonly used types for easier access in tests
pub use config::{Config, ConfigManager};
pub use error::FetchError;

pub use download::{
    AggregateStats, ClientSettings, Connection, ConnectionSupplier, DirectSupplier, DownloadItem,
    ExecutionMode, FetchReport, FetchSettings, Fetcher, ItemOutcome, Journal, Orchestrator,
    OrchestratorOptions, ProgressEvent, ProgressSink, ProxiedSupplier, RetryPolicy, Route,
    RunSummary,
};
pub use pacing::{PacingHandle, PacingSession};
pub use proxy::{
    CandidatePool, ProxyDiscovery, ProxyEndpoint, ProxyRotator, ProxyValidator, RequestProfile,
};
