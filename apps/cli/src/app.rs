//! Command implementations: wires settings, FTP, extractor and pipeline.

use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use ramdeploy_archive::{ArchiveExtractor, scan_archives};
use ramdeploy_ledger::ProgressLedger;
use ramdeploy_pipeline::{MigrationDriver, PipelineEvent, RunSummary};
use ramdeploy_transfer::{FtpConnector, SuppaFtpConnector, UploadPool, render_failure};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;

/// Runs the migration over `dir` until every archive was handled or Ctrl-C
/// was pressed. A second Ctrl-C exits right away.
pub async fn run(settings: &Settings, dir: &Path) -> anyhow::Result<RunSummary> {
    let connector: Arc<dyn FtpConnector> = match settings.connect_timeout() {
        Some(timeout) => Arc::new(SuppaFtpConnector::with_connect_timeout(timeout)),
        None => Arc::new(SuppaFtpConnector::new()),
    };
    let pool = UploadPool::new(
        connector,
        settings.connection_params(),
        settings.pool_options(),
    );
    let mut driver = MigrationDriver::new(
        settings.pipeline_config(dir),
        Arc::new(ArchiveExtractor),
        pool,
    );

    let printer = driver.take_events().map(|mut events| {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Some(line) = describe(&event) {
                    println!("{line}");
                }
            }
        })
    });

    let cancel = driver.cancel_token();
    tokio::spawn(async move {
        if handle_interrupts(tokio::signal::ctrl_c, cancel).await {
            tracing::warn!("second interrupt, exiting without waiting for uploads");
            std::process::exit(130);
        }
    });

    let result = driver.run().await;

    // Closes the event channel so the printer drains and exits.
    drop(driver);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    result.with_context(|| format!("migration of {} failed", dir.display()))
}

/// Cancels `cancel` on the first interrupt. Returns true once a second
/// interrupt arrives, false if listening for interrupts fails.
async fn handle_interrupts<S, Fut>(mut interrupts: S, cancel: CancellationToken) -> bool
where
    S: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if interrupts().await.is_err() {
        return false;
    }
    tracing::info!("stop requested, finishing the current archive (press Ctrl-C again to quit)");
    cancel.cancel();
    interrupts().await.is_ok()
}

/// One console line per noteworthy event.
fn describe(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::ArchiveSkipped { archive_id } => Some(format!(
            "{archive_id} was already uploaded. Remove it from the progress file to upload it again."
        )),
        PipelineEvent::ExtractionStarted { archive_id } => {
            Some(format!("Extracting {archive_id}..."))
        }
        PipelineEvent::ExtractionFailed { .. } | PipelineEvent::FileFailed(_) => None,
        PipelineEvent::Extracted {
            archive_id,
            files,
            bytes,
        } => Some(format!(
            "Uploading {files} files ({}) from {archive_id}",
            human_bytes(*bytes)
        )),
        PipelineEvent::FileUploaded { .. } => None,
        PipelineEvent::ArchiveCommitted {
            archive_id,
            uploaded,
            failed: 0,
        } => Some(format!("Finished {archive_id}: {uploaded} files uploaded")),
        PipelineEvent::ArchiveCommitted {
            archive_id,
            uploaded,
            failed,
        } => Some(format!(
            "Finished {archive_id}: {uploaded} files uploaded, {failed} failed"
        )),
        PipelineEvent::Finished(_) => None,
    }
}

/// Prints the failures of a run followed by its totals.
pub fn print_summary(summary: &RunSummary) {
    if !summary.failures.is_empty() {
        println!();
        println!("{} problem(s) need attention:", summary.failures.len());
        for failure in &summary.failures {
            println!("  - {}", render_failure(failure));
        }
    }

    println!();
    println!(
        "{} archive(s) found: {} uploaded, {} already done, {} unreadable",
        summary.archives_found,
        summary.archives_committed,
        summary.archives_skipped,
        summary.extraction_failures
    );
    println!(
        "{} file(s) uploaded ({}), {} failed",
        summary.files_uploaded,
        human_bytes(summary.bytes_uploaded),
        summary.files_failed
    );
    if summary.cancelled {
        println!("Stopped early; remaining archives are still pending.");
    } else {
        println!("All done!");
    }
}

/// Lists archives below `dir` as done or pending. Never writes the ledger.
pub fn status(settings: &Settings, dir: &Path) -> anyhow::Result<()> {
    let lines = status_lines(settings, dir)?;
    if lines.is_empty() {
        println!("No archives found in {}", dir.display());
        return Ok(());
    }

    let pending = lines.iter().filter(|(_, done)| !done).count();
    for (id, done) in &lines {
        let state = if *done { "done   " } else { "pending" };
        println!("{state}  {id}");
    }
    println!();
    println!("{} archive(s), {pending} pending", lines.len());
    Ok(())
}

fn status_lines(settings: &Settings, dir: &Path) -> anyhow::Result<Vec<(String, bool)>> {
    let config = settings.pipeline_config(dir);
    let ledger = ProgressLedger::load(&config.ledger_path)?;
    let candidates = scan_archives(&config.working_dir, &config.extensions)
        .with_context(|| format!("cannot scan {}", dir.display()))?;

    Ok(candidates
        .into_iter()
        .map(|c| {
            let done = ledger.is_done(&c.id);
            (c.id, done)
        })
        .collect())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
