//! Export, import and stop commands.
//!
//! Runs go through a [`JobMonitor`] so the terminal only follows progress;
//! Ctrl-C requests cooperative cancellation and the run ends after the item
//! in flight.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ferry_core::bundle::Bundle;
use ferry_core::config::FerryConfig;
use ferry_core::jobs::{JobId, JobMonitor, JobStatus, MonitorConfig, ProcessStatus};
use ferry_core::record::{Category, MigrationResult};
use ferry_core::store::memory::MemoryRepository;
use ferry_core::CoreError;
use indicatif::{ProgressBar, ProgressStyle};
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use tracing::warn;

use crate::output::Output;

/// Failed items listed before the rest are only counted.
const MAX_LISTED_FAILURES: usize = 20;

async fn open_repository(config: &FerryConfig) -> Result<Arc<MemoryRepository>> {
    let repo = MemoryRepository::open(&config.repository.path)
        .await
        .map_err(|e| CoreError::store("open repository", e))?
        .with_user(config.repository.user.clone());
    Ok(Arc::new(repo))
}

/// Export the configured repository into the bundle directory.
pub async fn export(config: &FerryConfig, archive: Option<PathBuf>) -> Result<()> {
    let output = Output::new();
    let repo = open_repository(config).await?;
    let params = config.export.to_params(config.bundle.format)?;
    let monitor = JobMonitor::new(MonitorConfig::from(&config.jobs));

    output.status(&format!(
        "Exporting {} into {}",
        config.repository.path.display().bright_cyan(),
        config.bundle.path.display()
    ));
    let id = monitor.submit_export(repo, params, config.bundle.path.clone())?;
    let status = follow(&monitor, id).await?;
    report(&monitor, &status, &output)?;

    if let Some(target) = archive {
        let bytes = monitor.download_result(id).await?;
        tokio::fs::write(&target, bytes).await.into_diagnostic()?;
        output.kv("Archive", &target.display().to_string());
    }
    Ok(())
}

/// Import a bundle directory or archive into the configured repository.
pub async fn import(config: &FerryConfig, source: PathBuf, report_path: Option<PathBuf>) -> Result<()> {
    let output = Output::new();
    let repo = open_repository(config).await?;
    let params = config.import.to_params(config.bundle.format)?;
    let monitor = JobMonitor::new(MonitorConfig::from(&config.jobs));

    output.status(&format!(
        "Importing {} into {} (publish: {:?})",
        source.display().bright_cyan(),
        config.repository.path.display(),
        params.publish()
    ));
    let id = monitor.submit_import(repo.clone(), repo, params, source)?;
    let status = follow(&monitor, id).await?;
    report(&monitor, &status, &output)?;

    if let Some(target) = report_path {
        let bytes = monitor.download_result(id).await?;
        tokio::fs::write(&target, bytes).await.into_diagnostic()?;
        output.kv("Report", &target.display().to_string());
    }
    Ok(())
}

/// Drop the stop file into a bundle.
pub async fn stop(bundle: &Path) -> Result<()> {
    let output = Output::new();
    let bundle = Bundle::open(bundle).await?;
    bundle.request_stop().await?;
    output.success(&format!(
        "Stop requested for {}",
        bundle.root().display().bright_cyan()
    ));
    output.info("The run ends before its next item and removes nothing already done.");
    Ok(())
}

/// Show a progress bar until the job finishes. Ctrl-C cancels it.
async fn follow(monitor: &JobMonitor, id: JobId) -> Result<ProcessStatus> {
    let kind = monitor.status(id)?.kind;
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.yellow} {msg} [{bar:40.blue/grey}] {percent}%")
            .into_diagnostic()?
            .progress_chars("█▉▊▋▌▍▎▏ ")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    bar.set_message(format!("{} {}", kind, id));
    bar.enable_steady_tick(Duration::from_millis(120));

    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let finished = monitor.wait(id);
    tokio::pin!(finished);
    let mut interrupted = false;

    let status = loop {
        tokio::select! {
            status = &mut finished => break status?,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                bar.println("Stopping after the current item...");
                if let Err(e) = monitor.cancel(id) {
                    warn!("Could not cancel job {}: {}", id, e);
                }
            }
            _ = ticker.tick() => {
                if let Ok(status) = monitor.status(id) {
                    bar.set_position((status.progress * 100.0).round() as u64);
                }
            }
        }
    };
    bar.finish_and_clear();
    Ok(status)
}

fn report(monitor: &JobMonitor, status: &ProcessStatus, output: &Output) -> Result<()> {
    match status.status {
        JobStatus::Failed => {
            let message = status.error_message.clone().unwrap_or_default();
            output.error(&format!("{} job {} failed", status.kind, status.id));
            return Err(miette::miette!("{}", message));
        }
        JobStatus::Cancelled => {
            output.warning(&format!("{} job {} was cancelled", status.kind, status.id))
        }
        JobStatus::Completed => {
            output.success(&format!("{} job {} completed", status.kind, status.id))
        }
        JobStatus::Running => {}
    }

    for category in Category::ALL {
        if let Some(stats) = status.stats.get(&category) {
            output.kv(
                &category.to_string(),
                &format!(
                    "{} processed, {} succeeded, {} failed",
                    stats.total,
                    stats.succeeded.to_string().green(),
                    stats.failed.to_string().red()
                ),
            );
        }
    }

    if let Some(result) = monitor.result(status.id)? {
        if !result.errors().is_empty() {
            output.section("Run errors");
            for error in result.errors() {
                output.list_item(error);
            }
        }
        list_failures(&result, output);
    }
    Ok(())
}

fn list_failures(result: &MigrationResult, output: &Output) {
    let failed: Vec<_> = result.entries().iter().filter(|r| !r.succeeded()).collect();
    if failed.is_empty() {
        return;
    }
    output.section("Failed items");
    for record in failed.iter().take(MAX_LISTED_FAILURES) {
        output.list_item(&format!(
            "{} {}",
            record.content_path().bright_cyan(),
            record.error_message().unwrap_or("unknown error").dimmed()
        ));
    }
    if failed.len() > MAX_LISTED_FAILURES {
        output.info(&format!(
            "... and {} more, see the bundle's _logs directory",
            failed.len() - MAX_LISTED_FAILURES
        ));
    }
}
