//! Migration from older cache layouts.
//!
//! Early versions stored every report directly in the cache root. Later ones
//! used 16 shards named after the first hex digit. Both are migrated into the
//! current 256-shard layout, which must already exist.
//!
//! Reports of unknown resources and files that no longer decode are deleted
//! instead of moved.

use std::fs;
use std::path::Path;

use super::layout::{is_cached_element_name, path_for_cached_element};
use crate::hash::SHA256_HEX_LEN;
use crate::report::Provider;

const OLD_SHARDS: &str = "0123456789abcdef";

/// Counters of a layout migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionStats {
    /// Reports moved into the 256-shard layout.
    pub moved: usize,
    /// Reports of unknown resources that were deleted.
    pub deleted_unknown: usize,
    /// Undecodable files that were deleted.
    pub deleted_corrupt: usize,
    /// Files that could be neither moved nor deleted.
    pub failed: usize,
}

impl TransitionStats {
    /// Add the counters of another run.
    pub fn merge(&mut self, other: TransitionStats) {
        self.moved += other.moved;
        self.deleted_unknown += other.deleted_unknown;
        self.deleted_corrupt += other.deleted_corrupt;
        self.failed += other.failed;
    }
}

/// Migrate reports stored directly in `root` (no shards).
pub fn transition_one_to_256(root: &Path, provider: Provider) -> TransitionStats {
    let mut stats = TransitionStats::default();
    migrate_directory(root, root, provider, &mut stats);
    if stats != TransitionStats::default() {
        log::info!(
            "Migrated flat cache layout: {} moved, {} unknown removed, {} corrupt removed",
            stats.moved,
            stats.deleted_unknown,
            stats.deleted_corrupt
        );
    }
    stats
}

/// Migrate reports stored in the 16 single hex digit shards below `root`.
///
/// Shard directories left empty afterwards are removed.
pub fn transition_16_to_256(root: &Path, provider: Provider) -> TransitionStats {
    let mut stats = TransitionStats::default();
    for digit in OLD_SHARDS.chars() {
        let old_shard = root.join(digit.to_string());
        if !old_shard.is_dir() {
            continue;
        }
        migrate_directory(&old_shard, root, provider, &mut stats);
        if let Err(e) = fs::remove_dir(&old_shard) {
            log::warn!(
                "Could not remove old cache directory {}: {}",
                old_shard.display(),
                e
            );
        }
    }
    if stats != TransitionStats::default() {
        log::info!(
            "Migrated 16-shard cache layout: {} moved, {} unknown removed, {} corrupt removed",
            stats.moved,
            stats.deleted_unknown,
            stats.deleted_corrupt
        );
    }
    stats
}

fn migrate_directory(dir: &Path, root: &Path, provider: Provider, stats: &mut TransitionStats) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::error!("Cannot read {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_cached_element_name(name) || !path.is_file() {
            continue;
        }
        migrate_file(&path, &name[..SHA256_HEX_LEN], root, provider, stats);
    }
}

fn migrate_file(path: &Path, id: &str, root: &Path, provider: Provider, stats: &mut TransitionStats) {
    let decoded = fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|body| provider.decode(&body).map_err(|e| e.to_string()));

    let report = match decoded {
        Ok(report) => report,
        Err(reason) => {
            log::warn!("Removing unreadable cache file {}: {}", path.display(), reason);
            remove(path, &mut stats.deleted_corrupt, &mut stats.failed);
            return;
        }
    };

    if report.not_found() {
        remove(path, &mut stats.deleted_unknown, &mut stats.failed);
        return;
    }

    let Some(destination) = path_for_cached_element(id, root) else {
        stats.failed += 1;
        return;
    };
    match fs::rename(path, &destination) {
        Ok(()) => stats.moved += 1,
        Err(e) => {
            log::error!(
                "Could not move {} to {}: {}",
                path.display(),
                destination.display(),
                e
            );
            stats.failed += 1;
        }
    }
}

fn remove(path: &Path, counter: &mut usize, failed: &mut usize) {
    match fs::remove_file(path) {
        Ok(()) => *counter += 1,
        Err(e) => {
            log::error!("Could not remove {}: {}", path.display(), e);
            *failed += 1;
        }
    }
}
