use anyhow::{Context, Result};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use romfetch::config::Config;
use romfetch::download::{
    ConnectionSupplier, DirectSupplier, ExecutionMode, Fetcher, Journal, Orchestrator,
    OrchestratorOptions, ProgressEvent, ProgressSink, ProgressTracker, ProxiedSupplier,
    RunSummary,
};
use romfetch::pacing::PacingHandle;
use romfetch::{DownloadItem, worklist};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Per-run command-line overrides of the config file.
#[derive(Debug, Default)]
pub struct DownloadOverrides {
    pub group: Option<String>,
    pub output: Option<PathBuf>,
    pub proxies: bool,
    pub concurrent: Option<usize>,
    pub retries: Option<u32>,
    pub no_pacing: bool,
    pub no_journal: bool,
}

pub async fn handle_download(
    config: &Config,
    worklists: Vec<PathBuf>,
    overrides: DownloadOverrides,
    cancel: CancellationToken,
) -> Result<()> {
    let term = Term::stdout();

    let mut items = Vec::new();
    for path in &worklists {
        if path.is_dir() {
            items.extend(worklist::load_dir(path)?);
        } else {
            items.extend(worklist::load_file(path, overrides.group.as_deref())?);
        }
    }

    if items.is_empty() {
        term.write_line(&format!(
            "{} No downloadable entries found in the given worklists",
            style("⚠️").yellow()
        ))?;
        return Ok(());
    }

    let mut config = config.clone();
    if let Some(output) = overrides.output {
        config.general.output_dir = output;
    }
    if let Some(retries) = overrides.retries {
        config.general.max_retries = retries;
    }
    if overrides.no_pacing {
        config.pacing.enabled = false;
    }
    let mode = match overrides.concurrent {
        Some(1) => ExecutionMode::Sequential,
        Some(workers) => ExecutionMode::Concurrent { workers },
        None => config.execution_mode(),
    };
    let use_proxies = overrides.proxies || config.proxy.enabled;
    let output_dir = config.general.output_dir.clone();

    term.write_line(&format!(
        "{} {} items → {}",
        style("⬇️").cyan(),
        style(items.len()).cyan().bold(),
        style(output_dir.display()).cyan()
    ))?;
    term.write_line(&format!(
        "   {}: {}",
        style("Mode").dim(),
        match mode {
            ExecutionMode::Sequential => "sequential".to_string(),
            ExecutionMode::Concurrent { workers } => format!("concurrent ({} workers)", workers),
        }
    ))?;
    term.write_line(&format!(
        "   {}: {}",
        style("Pacing").dim(),
        if config.pacing.enabled {
            "behavioral"
        } else {
            "fixed"
        }
    ))?;

    let supplier: Arc<dyn ConnectionSupplier> = if use_proxies {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")?);
        spinner.set_message("Discovering and validating proxies...");
        spinner.enable_steady_tick(Duration::from_millis(100));

        let discovery = config.proxy_discovery()?;
        let supplier = tokio::select! {
            _ = cancel.cancelled() => {
                spinner.finish_and_clear();
                return Ok(());
            }
            supplier = ProxiedSupplier::connect(config.client_settings(), discovery) => supplier?,
        };
        spinner.finish_and_clear();

        let size = supplier.pool_size().await;
        if size == 0 {
            term.write_line(&format!(
                "{} No working proxies found, downloading directly",
                style("⚠️").yellow()
            ))?;
        } else {
            term.write_line(&format!(
                "   {}: {} working",
                style("Proxies").dim(),
                style(size).green()
            ))?;
        }
        Arc::new(supplier)
    } else {
        Arc::new(DirectSupplier::new(config.client_settings())?)
    };

    let pacing = config.pacing_session();

    let names: HashMap<String, String> = items
        .iter()
        .map(|item: &DownloadItem| (item.source_url.clone(), item.display_name.clone()))
        .collect();
    let sink = Arc::new(BarSink::new(items.len() as u64, names)?);

    let mut orchestrator = Orchestrator::new(
        OrchestratorOptions {
            output_dir: output_dir.clone(),
            mode,
        },
        supplier,
        PacingHandle::spawn(pacing),
    )
    .with_fetcher(Fetcher::new(config.fetch_settings()))
    .with_retry_policy(config.retry_policy())
    .with_sink(sink.clone())
    .with_cancellation(cancel);

    if config.general.journal && !overrides.no_journal {
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;
        match Journal::open_in(&output_dir).await {
            Ok(journal) => orchestrator = orchestrator.with_journal(journal),
            Err(e) => warn!("Continuing without a journal: {:#}", e),
        }
    }

    let summary = orchestrator.run(items).await?;
    sink.finish();
    print_summary(&term, &summary)?;
    Ok(())
}

fn print_summary(term: &Term, summary: &RunSummary) -> Result<()> {
    let stats = &summary.stats;

    term.write_line("")?;
    if summary.cancelled {
        term.write_line(&format!(
            "{} Run interrupted; rerun to resume",
            style("⏸️").yellow()
        ))?;
    }
    term.write_line(&format!("{} Download summary:", style("📊").cyan()))?;
    term.write_line(&format!(
        "   {}: {}",
        style("Completed").dim(),
        style(stats.completed).green()
    ))?;
    if summary.skipped > 0 {
        term.write_line(&format!(
            "   {}: {}",
            style("Already complete").dim(),
            summary.skipped
        ))?;
    }
    term.write_line(&format!(
        "   {}: {}",
        style("Failed").dim(),
        if stats.failed > 0 {
            style(stats.failed).red()
        } else {
            style(stats.failed).green()
        }
    ))?;
    if summary.duplicates_removed > 0 {
        term.write_line(&format!(
            "   {}: {}",
            style("Duplicates dropped").dim(),
            summary.duplicates_removed
        ))?;
    }
    term.write_line(&format!(
        "   {}: {}",
        style("Total size").dim(),
        ProgressTracker::format_gigabytes(stats.total_bytes)
    ))?;
    term.write_line(&format!(
        "   {}: {} proxy / {} direct ({:.1}% proxy)",
        style("Routes").dim(),
        stats.proxy_used,
        stats.direct_used,
        stats.proxy_ratio()
    ))?;
    term.write_line(&format!(
        "   {}: {} ({} sessions)",
        style("Elapsed").dim(),
        ProgressTracker::format_duration(summary.elapsed),
        summary.session.sessions_started
    ))?;
    Ok(())
}

/// Renders engine events as an overall bar plus one bar per active file.
struct BarSink {
    multi: MultiProgress,
    overall: ProgressBar,
    file_style: ProgressStyle,
    names: HashMap<String, String>,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl BarSink {
    fn new(total_items: u64, names: HashMap<String, String>) -> Result<Self> {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_items));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        overall.enable_steady_tick(Duration::from_millis(200));

        let file_style = ProgressStyle::default_bar()
            .template("  {msg:30!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-");

        Ok(Self {
            multi,
            overall,
            file_style,
            names,
            bars: Mutex::new(HashMap::new()),
        })
    }

    fn name<'a>(&'a self, id: &'a str) -> &'a str {
        self.names.get(id).map(String::as_str).unwrap_or(id)
    }

    fn take_bar(&self, id: &str) -> Option<ProgressBar> {
        self.bars.lock().ok()?.remove(id)
    }

    fn line(&self, message: String) {
        let _ = self.multi.println(message);
    }

    fn finish(&self) {
        self.overall.finish_and_clear();
    }
}

impl ProgressSink for BarSink {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started {
                id,
                name,
                resume_from,
                expected_total,
                ..
            } => {
                let bar = self
                    .multi
                    .insert_after(&self.overall, ProgressBar::new(expected_total.unwrap_or(0)));
                bar.set_style(self.file_style.clone());
                bar.set_message(name);
                bar.set_position(resume_from);
                if let Ok(mut bars) = self.bars.lock() {
                    if let Some(old) = bars.insert(id, bar) {
                        old.finish_and_clear();
                    }
                }
            }
            ProgressEvent::Progress {
                id,
                bytes_written,
                expected_total,
                ..
            } => {
                if let Ok(bars) = self.bars.lock() {
                    if let Some(bar) = bars.get(&id) {
                        if let Some(total) = expected_total {
                            bar.set_length(total);
                        }
                        bar.set_position(bytes_written);
                    }
                }
            }
            ProgressEvent::Retry {
                id,
                attempt,
                max_attempts,
                delay,
                error,
            } => {
                if let Some(bar) = self.take_bar(&id) {
                    bar.finish_and_clear();
                }
                self.line(format!(
                    "{} {} attempt {}/{} failed: {} (retrying in {:.0}s)",
                    style("🔄").yellow(),
                    self.name(&id),
                    attempt,
                    max_attempts,
                    error,
                    delay.as_secs_f64()
                ));
            }
            ProgressEvent::Completed { id, bytes_written } => {
                if let Some(bar) = self.take_bar(&id) {
                    bar.finish_and_clear();
                }
                self.line(format!(
                    "{} {} ({})",
                    style("✅").green(),
                    self.name(&id),
                    ProgressTracker::format_bytes(bytes_written)
                ));
            }
            ProgressEvent::Skipped { id, bytes_on_disk } => {
                self.line(format!(
                    "{} {} already complete ({})",
                    style("⏭️").dim(),
                    self.name(&id),
                    ProgressTracker::format_bytes(bytes_on_disk)
                ));
            }
            ProgressEvent::Failed {
                id,
                error,
                attempts,
            } => {
                if let Some(bar) = self.take_bar(&id) {
                    bar.abandon();
                }
                self.line(format!(
                    "{} {} failed after {} attempts: {}",
                    style("❌").red(),
                    self.name(&id),
                    attempts,
                    error
                ));
            }
            ProgressEvent::Cancelled { id } => {
                if let Some(bar) = self.take_bar(&id) {
                    bar.abandon();
                }
            }
            ProgressEvent::ItemFinished { totals, .. } => {
                self.overall.inc(1);
                self.overall.set_message(format!(
                    "{} ok, {} failed, {}",
                    totals.completed,
                    totals.failed,
                    ProgressTracker::format_bytes(totals.total_bytes)
                ));
            }
            ProgressEvent::SessionRotated { session } => {
                self.line(format!(
                    "{} New session {} ({})",
                    style("🔁").blue(),
                    session.sessions_started,
                    session.pattern
                ));
            }
        }
    }
}
