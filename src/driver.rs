//! Run driver: input collection, the per-file loop and the drain phase.
//!
//! Files are processed strictly one after another. Once every input has been
//! visited, the reports of submitted files are polled in submission order
//! after giving the service time to process them.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::context::RunContext;
use crate::error::RunError;
use crate::scanner::{describe_wait, sleep_until, ScanError, Scanner};
use crate::strategy::Strategy;

/// Time given to the service between the last submission and the first poll.
pub const GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Expand the input paths into the list of files to scan.
///
/// Directories are walked recursively in file name order. Symbolic links are
/// not followed. Unreadable directory entries are logged and skipped.
///
/// # Errors
///
/// Fails if an input path does not exist.
pub fn collect_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, RunError> {
    let mut files = Vec::new();
    for input in inputs {
        let metadata = std::fs::metadata(input).map_err(|source| RunError::File {
            path: input.clone(),
            source,
        })?;
        if metadata.is_file() {
            files.push(input.clone());
            continue;
        }

        let walker = WalkDir::new(input)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(entry) => {
                    log::trace!("Skipping {}", entry.path().display());
                }
                Err(e) => log::warn!("Cannot read {}: {}", input.display(), e),
            }
        }
    }
    Ok(files)
}

/// Scan every file in `files`, then drain the submission queue.
///
/// # Errors
///
/// Stops at the first fatal error. The context keeps everything learned up
/// to that point.
pub fn run_scan(
    strategy: &Strategy,
    scanner: &mut dyn Scanner,
    ctx: &mut RunContext,
    files: &[PathBuf],
) -> Result<(), RunError> {
    for file in files {
        let label = label_for(file);
        log::debug!("Scanning {}", label);
        strategy.scan(scanner, ctx, file, &label)?;
    }
    drain_queue(strategy, scanner, ctx, GRACE_PERIOD)
}

/// Poll the reports of queued submissions.
///
/// Waits until `grace` has passed since the last submission, then looks up
/// every queued scan id in order. Finished reports are classified and
/// removed from the queue. The first scan that is still being processed
/// stops polling; it and every later entry stay queued.
///
/// # Errors
///
/// Returns [`RunError::Interrupted`] if shutdown is requested while waiting.
pub fn drain_queue(
    strategy: &Strategy,
    scanner: &mut dyn Scanner,
    ctx: &mut RunContext,
    grace: Duration,
) -> Result<(), RunError> {
    if ctx.queued.is_empty() {
        return Ok(());
    }
    if let Some(last) = ctx.last_submission {
        wait_until(ctx, last + grace)?;
    }

    log::info!("Retrieving reports of {} submitted files", ctx.queued.len());
    let pending = std::mem::take(&mut ctx.queued);
    let mut remaining = Vec::new();
    let mut entries = pending.into_iter();

    while let Some(entry) = entries.next() {
        if ctx.is_shutdown_requested() {
            remaining.push(entry);
            remaining.extend(entries);
            ctx.queued = remaining;
            return Err(RunError::Interrupted);
        }

        let report = match scanner.get_report(&entry.scan_id, &strategy.settings().cache) {
            Ok(report) => report,
            Err(ScanError::Interrupted(_)) => {
                remaining.push(entry);
                remaining.extend(entries);
                ctx.queued = remaining;
                return Err(RunError::Interrupted);
            }
            Err(e) => {
                log::warn!("Could not retrieve report for {}: {}", entry.file, e);
                remaining.push(entry);
                continue;
            }
        };

        if report.still_in_queue() {
            log::info!("{} is still being analysed, stopping retrieval", entry.file);
            remaining.push(entry);
            remaining.extend(entries);
            break;
        } else if report.successful_retrieval() {
            let key = report
                .embedded_sha256()
                .map_or_else(|| entry.scan_id.clone(), str::to_string);
            strategy.record_verdict(ctx, &entry.file, &key, &report);
        } else if report.not_found() {
            log::warn!("{} is unknown to {} after submission", entry.file, scanner.provider());
        } else {
            log::warn!(
                "Unexpected response code {} for {}",
                report.response_code,
                entry.file
            );
            remaining.push(entry);
        }
    }

    ctx.queued = remaining;
    Ok(())
}

fn wait_until(ctx: &RunContext, deadline: Instant) -> Result<(), RunError> {
    let now = Instant::now();
    if now >= deadline {
        return Ok(());
    }
    log::info!(
        "Waiting {} before retrieving reports...",
        describe_wait(deadline - now)
    );
    sleep_until(deadline, ctx.shutdown_flag()).map_err(|_| RunError::Interrupted)
}

/// Name of a top-level file in logs and the summary: the path as given.
#[must_use]
pub fn label_for(path: &Path) -> String {
    path.display().to_string()
}
