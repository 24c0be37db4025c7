use anyhow::Result;
use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use romfetch::config::Config;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn handle_proxies(
    config: &Config,
    count: Option<usize>,
    cancel: CancellationToken,
) -> Result<()> {
    let term = Term::stdout();

    let mut config = config.clone();
    if let Some(count) = count {
        config.proxy.target_count = count;
    }
    let discovery = config.proxy_discovery()?;

    term.write_line(&format!(
        "{} Looking for {} working proxies across {} sources",
        style("🔍").cyan(),
        style(discovery.target_count()).cyan().bold(),
        config.proxy.sources.len()
    ))?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")?);
    spinner.set_message(format!("Probing via {}...", config.proxy.echo_url));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let endpoints = tokio::select! {
        _ = cancel.cancelled() => {
            spinner.finish_and_clear();
            term.write_line(&format!("{} Cancelled", style("❌").red()))?;
            return Ok(());
        }
        endpoints = discovery.discover() => endpoints,
    };
    spinner.finish_and_clear();

    if endpoints.is_empty() {
        term.write_line(&format!(
            "{} No working proxies found; downloads would go direct",
            style("⚠️").yellow()
        ))?;
        return Ok(());
    }

    term.write_line(&format!(
        "{} {} working proxies:",
        style("✅").green(),
        endpoints.len()
    ))?;
    for endpoint in &endpoints {
        term.write_line(&format!(
            "   {:<28} {} {}",
            style(endpoint.url()).cyan(),
            style("exit").dim(),
            endpoint.last_verified_ip.as_deref().unwrap_or("?")
        ))?;
    }
    Ok(())
}
