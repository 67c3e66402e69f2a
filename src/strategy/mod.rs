//! Per-file scan workflow.
//!
//! Every file first passes the archive handlers. Files no handler expands are
//! hashed and, depending on the [`StrategyKind`], looked up, submitted,
//! rescanned or skipped:
//!
//! | Kind            | Lookup | Submit unknown | Rescan stale | Poll later |
//! |-----------------|--------|----------------|--------------|------------|
//! | `Default`       | yes    | yes            | yes          | yes        |
//! | `NoRescan`      | yes    | yes            | no           | yes        |
//! | `ScanAndForget` | yes    | yes            | yes          | no         |
//! | `DirectScan`    | no     | always         | no           | yes        |
//!
//! Submitted files are queued in the [`RunContext`] and polled by
//! [`crate::driver::drain_queue`] once all files are processed.

use std::path::Path;

use chrono::Utc;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::cache::delete_cached_element;
use crate::context::RunContext;
use crate::error::RunError;
use crate::handler::{Handler, HandlerOutcome};
use crate::hash::sha256_file;
use crate::report::{Report, Verdict};
use crate::scanner::{CachePolicy, ScanError, Scanner};

/// Scan policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Look up, submit unknown files, rescan stale reports.
    #[default]
    Default,
    /// Submit every file without looking it up first.
    #[value(name = "direct")]
    #[serde(rename = "direct")]
    DirectScan,
    /// Like `default`, but never rescan stale reports.
    NoRescan,
    /// Like `default`, but never wait for the reports of submitted files.
    ScanAndForget,
}

/// Settings shared by all strategies.
#[derive(Debug, Clone)]
pub struct StrategySettings {
    /// Files with this many detections or fewer are only "possibly infected".
    pub maybe_limit: u32,
    /// Reports older than this are rescanned.
    pub max_age: chrono::Duration,
    pub cache: CachePolicy,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            maybe_limit: 3,
            max_age: chrono::Duration::days(90),
            cache: CachePolicy::disabled(),
        }
    }
}

/// A scan policy with its archive handlers.
#[derive(Debug)]
pub struct Strategy {
    kind: StrategyKind,
    settings: StrategySettings,
    handlers: Vec<Handler>,
}

impl Strategy {
    #[must_use]
    pub fn new(kind: StrategyKind, settings: StrategySettings) -> Self {
        Self {
            kind,
            settings,
            handlers: Vec::new(),
        }
    }

    /// Expand archives with `handlers`, tried in order.
    #[must_use]
    pub fn with_handlers(mut self, handlers: Vec<Handler>) -> Self {
        self.handlers = handlers;
        self
    }

    #[must_use]
    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    #[must_use]
    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    /// Run the archive handlers on `path`.
    ///
    /// Returns [`HandlerOutcome::Handled`] as soon as one handler expanded the
    /// file, [`HandlerOutcome::NotApplicable`] if none did.
    ///
    /// # Errors
    ///
    /// Propagates the first handler error.
    pub fn apply_handlers(
        &self,
        scanner: &mut dyn Scanner,
        ctx: &mut RunContext,
        path: &Path,
        label: &str,
    ) -> Result<HandlerOutcome, RunError> {
        for handler in &self.handlers {
            if handler.handle(self, scanner, ctx, path, label)? == HandlerOutcome::Handled {
                return Ok(HandlerOutcome::Handled);
            }
        }
        Ok(HandlerOutcome::NotApplicable)
    }

    /// Process one file. `label` names the file in logs and in the summary.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be hashed or read, an archive cannot be
    /// extracted, the service answers with an unknown response code, or the
    /// run was interrupted. Lookup and submission failures are logged and
    /// the file is skipped.
    pub fn scan(
        &self,
        scanner: &mut dyn Scanner,
        ctx: &mut RunContext,
        path: &Path,
        label: &str,
    ) -> Result<(), RunError> {
        if ctx.is_shutdown_requested() {
            return Err(RunError::Interrupted);
        }
        if self.apply_handlers(scanner, ctx, path, label)? == HandlerOutcome::Handled {
            return Ok(());
        }

        match self.kind {
            StrategyKind::DirectScan => self.submit(scanner, ctx, path, label, None),
            _ => self.check_and_submit(scanner, ctx, path, label),
        }
    }

    fn check_and_submit(
        &self,
        scanner: &mut dyn Scanner,
        ctx: &mut RunContext,
        path: &Path,
        label: &str,
    ) -> Result<(), RunError> {
        let hash = sha256_file(path).map_err(|source| RunError::File {
            path: path.to_path_buf(),
            source,
        })?;

        let report = match scanner.get_report(&hash, &self.settings.cache) {
            Ok(report) => report,
            Err(ScanError::Interrupted(_)) => return Err(RunError::Interrupted),
            Err(e) => {
                log::warn!("Could not retrieve report for {}: {}", label, e);
                return Ok(());
            }
        };

        if report.successful_retrieval() {
            self.record_verdict(ctx, label, &hash, &report);
            if self.kind != StrategyKind::NoRescan
                && report.is_older_than(self.settings.max_age, Utc::now())
            {
                self.rescan_stale(scanner, label, &hash)?;
            }
            Ok(())
        } else if report.not_found() {
            self.submit(scanner, ctx, path, label, Some(&hash))
        } else if report.still_in_queue() {
            log::info!("{} is already queued for analysis", label);
            if self.kind != StrategyKind::ScanAndForget {
                let scan_id = report.scan_id.clone().unwrap_or_else(|| hash.clone());
                ctx.queue(scan_id, label);
            }
            Ok(())
        } else {
            Err(RunError::UnexpectedResponse(report.response_code))
        }
    }

    /// Record a completed report if any engine flagged the file.
    pub(crate) fn record_verdict(
        &self,
        ctx: &mut RunContext,
        label: &str,
        hash: &str,
        report: &Report,
    ) {
        match report.verdict(self.settings.maybe_limit) {
            Verdict::Clean => log::debug!("{} is clean", label),
            Verdict::PossiblyInfected => {
                log::info!(
                    "{} is possibly infected ({}/{})",
                    label,
                    report.positives,
                    report.total
                );
                ctx.record_finding(label, hash, report.clone());
            }
            Verdict::Infected => {
                log::info!("{} is infected ({}/{})", label, report.positives, report.total);
                ctx.record_finding(label, hash, report.clone());
            }
        }
    }

    fn rescan_stale(
        &self,
        scanner: &mut dyn Scanner,
        label: &str,
        hash: &str,
    ) -> Result<(), RunError> {
        match scanner.rescan(hash) {
            Ok(scan_id) => log::info!("Requested rescan of {} ({})", label, scan_id),
            Err(ScanError::Interrupted(_)) => return Err(RunError::Interrupted),
            Err(e) => log::warn!("Rescan of {} failed: {}", label, e),
        }
        self.evict(hash);
        Ok(())
    }

    /// Upload the file unless it is too large for the service.
    fn submit(
        &self,
        scanner: &mut dyn Scanner,
        ctx: &mut RunContext,
        path: &Path,
        label: &str,
        hash: Option<&str>,
    ) -> Result<(), RunError> {
        let size = std::fs::metadata(path)
            .map_err(|source| RunError::File {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if size > scanner.max_scan_size() {
            log::info!("{} is too large for {} ({} bytes)", label, scanner.provider(), size);
            ctx.record_large_file(label, size);
            return Ok(());
        }

        match scanner.scan(path) {
            Ok(scan_id) => {
                log::info!("Submitted {} ({})", label, scan_id);
                ctx.record_submission();
                if self.kind != StrategyKind::ScanAndForget {
                    ctx.queue(scan_id, label);
                }
                if let Some(hash) = hash {
                    self.evict(hash);
                }
            }
            Err(ScanError::Interrupted(_)) => return Err(RunError::Interrupted),
            Err(e) => log::warn!("Could not submit {}: {}", label, e),
        }
        Ok(())
    }

    /// Drop the cached report of `hash` so the next lookup asks the service.
    fn evict(&self, hash: &str) {
        let Some(dir) = &self.settings.cache.dir else {
            return;
        };
        if let Err(e) = delete_cached_element(hash, dir) {
            log::warn!("Could not remove cached report of {}: {}", hash, e);
        }
    }
}
