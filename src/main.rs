mod cli;
mod handlers;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use romfetch::ConfigManager;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Validate CLI arguments first
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    // RUST_LOG wins over --verbose when set
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(args.verbose)
        .init();

    let mut config_manager = match &args.config {
        Some(path) => ConfigManager::from_path(path)?,
        None => ConfigManager::new()?,
    };

    if !args.skips_config_validation() {
        if let Err(e) = config_manager.validate() {
            eprintln!("Configuration validation failed: {}", e);
            eprintln!("Run 'romfetch config validate' for details or 'romfetch config reset' to start over");
            process::exit(1);
        }
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, finishing up. Partial files are kept for resume.");
            on_interrupt.cancel();
        }
    });

    match args.command {
        Commands::Download {
            worklists,
            group,
            output,
            proxies,
            concurrent,
            retries,
            no_pacing,
            no_journal,
        } => {
            let overrides = handlers::DownloadOverrides {
                group,
                output,
                proxies,
                concurrent,
                retries,
                no_pacing,
                no_journal,
            };
            handlers::handle_download(config_manager.config(), worklists, overrides, cancel)
                .await?;
        }
        Commands::Proxies { count } => {
            handlers::handle_proxies(config_manager.config(), count, cancel).await?;
        }
        Commands::Config { action } => {
            handlers::handle_config(&mut config_manager, action).await?;
        }
    }

    Ok(())
}
