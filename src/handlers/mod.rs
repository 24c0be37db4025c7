pub mod config;
pub mod download;
pub mod proxies;

// Re-export all handlers
pub use config::handle_config;
pub use download::{DownloadOverrides, handle_download};
pub use proxies::handle_proxies;
