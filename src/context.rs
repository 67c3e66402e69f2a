//! State of one scan run.
//!
//! A single [`RunContext`] is created per invocation and threaded through the
//! strategy and the archive handlers, so findings in archive members end up
//! in the same summary as top-level files. Files are identified by their
//! label: the path as given for top-level files, `archive/member` for
//! extracted members.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::report::Report;

/// A submission whose report has not been retrieved yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedScan {
    /// Scan id returned by the service.
    pub scan_id: String,
    /// Label of the submitted file.
    pub file: String,
}

/// A file skipped because the service would not accept it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeFile {
    pub file: String,
    pub size: u64,
}

/// Everything a run has learned so far.
#[derive(Debug, Default)]
pub struct RunContext {
    /// Label of every infected or possibly infected file and its SHA-256.
    pub file_hashes: BTreeMap<String, String>,
    /// Report of every hash in `file_hashes`.
    pub reports: BTreeMap<String, Report>,
    /// Submissions in the order they were made.
    pub queued: Vec<QueuedScan>,
    pub large_files: Vec<LargeFile>,
    /// When the last file was submitted.
    pub last_submission: Option<Instant>,
    /// Current archive nesting depth.
    pub depth: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the run once `flag` is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// The flag given to [`RunContext::with_shutdown_flag`].
    #[must_use]
    pub fn shutdown_flag(&self) -> Option<&AtomicBool> {
        self.shutdown_flag.as_deref()
    }

    /// Remember a file the service flagged.
    pub fn record_finding(&mut self, file: &str, hash: &str, report: Report) {
        self.file_hashes.insert(file.to_string(), hash.to_string());
        self.reports.insert(hash.to_string(), report);
    }

    /// Remember a submission for the drain phase.
    pub fn queue(&mut self, scan_id: String, file: &str) {
        self.queued.push(QueuedScan {
            scan_id,
            file: file.to_string(),
        });
    }

    pub fn record_submission(&mut self) {
        self.last_submission = Some(Instant::now());
    }

    pub fn record_large_file(&mut self, file: &str, size: u64) {
        self.large_files.push(LargeFile {
            file: file.to_string(),
            size,
        });
    }

    /// Files whose report is known, with the report, ordered by label.
    pub fn findings(&self) -> impl Iterator<Item = (&str, &Report)> {
        self.file_hashes
            .iter()
            .filter_map(|(file, hash)| self.reports.get(hash).map(|r| (file.as_str(), r)))
    }
}
