//! Integrity checks for cached reports.
//!
//! Every candidate file in every shard goes through the same checks, in order:
//!
//! 1. Files of [`MAX_ENTRY_SIZE`] or more are corrupted. Reports are small
//!    JSON documents, anything that large was damaged or planted.
//! 2. Files that no longer decode as a report are corrupted.
//! 3. With `delete_unknown`, reports for resources the service did not know
//!    are removed. They are not counted as corrupted.
//! 4. A hash embedded in the report must match the file name and the shard.
//!
//! The check never stops at the first problem. It logs each finding and
//! returns the totals.

use std::fs;
use std::path::Path;

use super::layout::{is_cached_element_name, shard_names, MAX_ENTRY_SIZE};
use super::{CacheError, CacheResult};
use crate::report::Provider;

/// Totals of an integrity check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Cache files examined.
    pub checked: usize,
    /// Corrupted files found, deleted or not.
    pub corrupted: usize,
    /// Corrupted files that were removed.
    pub deleted: usize,
    /// Reports of unknown resources that were pruned.
    pub unknown_pruned: usize,
    /// Corrupted or unknown files whose removal failed.
    pub delete_failures: usize,
}

/// What is wrong with a single cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Finding {
    Healthy,
    Oversized(u64),
    Undecodable(String),
    HashMismatch(String),
    Unknown,
}

pub(super) fn check_integrity(
    root: &Path,
    provider: Provider,
    delete_corrupted: bool,
    delete_unknown: bool,
) -> CacheResult<IntegrityReport> {
    if !root.is_dir() {
        return Err(CacheError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "cache directory does not exist"),
        ));
    }

    let mut report = IntegrityReport::default();

    for shard in shard_names() {
        let shard_dir = root.join(&shard);
        let entries = match fs::read_dir(&shard_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                log::error!("Cannot read cache shard {}: {}", shard_dir.display(), e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !is_cached_element_name(name) || !path.is_file() {
                log::debug!("Skipping non-cache file {}", path.display());
                continue;
            }

            report.checked += 1;
            let finding = inspect(&path, name, &shard, provider, delete_unknown);
            match &finding {
                Finding::Healthy => continue,
                Finding::Unknown => {
                    match fs::remove_file(&path) {
                        Ok(()) => {
                            log::info!("Removed report of unknown resource {}", path.display());
                            report.unknown_pruned += 1;
                        }
                        Err(e) => {
                            log::error!("Could not remove {}: {}", path.display(), e);
                            report.delete_failures += 1;
                        }
                    }
                    continue;
                }
                Finding::Oversized(size) => {
                    log::warn!(
                        "Cache file {} is too large ({} bytes)",
                        path.display(),
                        size
                    );
                }
                Finding::Undecodable(reason) => {
                    log::warn!("Cache file {} is not a valid report: {}", path.display(), reason);
                }
                Finding::HashMismatch(embedded) => {
                    log::warn!(
                        "Cache file {} contains a report for {}",
                        path.display(),
                        embedded
                    );
                }
            }

            report.corrupted += 1;
            if delete_corrupted {
                match fs::remove_file(&path) {
                    Ok(()) => report.deleted += 1,
                    Err(e) => {
                        log::error!("Could not remove corrupted file {}: {}", path.display(), e);
                        report.delete_failures += 1;
                    }
                }
            }
        }
    }

    Ok(report)
}

fn inspect(path: &Path, name: &str, shard: &str, provider: Provider, delete_unknown: bool) -> Finding {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => return Finding::Undecodable(e.to_string()),
    };
    if size >= MAX_ENTRY_SIZE {
        return Finding::Oversized(size);
    }

    let body = match fs::read(path) {
        Ok(body) => body,
        Err(e) => return Finding::Undecodable(e.to_string()),
    };
    let report = match provider.decode(&body) {
        Ok(report) => report,
        Err(e) => return Finding::Undecodable(e.to_string()),
    };

    if delete_unknown && report.not_found() {
        return Finding::Unknown;
    }

    let id = &name[..crate::hash::SHA256_HEX_LEN];
    match report.embedded_sha256() {
        Some(embedded)
            if !embedded.eq_ignore_ascii_case(id) || !id[..2].eq_ignore_ascii_case(shard) =>
        {
            Finding::HashMismatch(embedded.to_string())
        }
        None if !id[..2].eq_ignore_ascii_case(shard) => Finding::HashMismatch(id.to_string()),
        _ => Finding::Healthy,
    }
}
