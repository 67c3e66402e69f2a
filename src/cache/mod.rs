//! On-disk report cache.
//!
//! Reports are stored verbatim, exactly as the service returned them, one JSON
//! file per resource:
//!
//! ```text
//! <root>/<first two hex chars>/<sha256>.json
//! ```
//!
//! # Architecture
//!
//! * [`layout`]: path derivation, name validation and directory creation.
//! * [`integrity`]: detection and removal of corrupted entries.
//! * [`transition`]: migration from the older flat and 16-shard layouts.
//!
//! # Invalidation
//!
//! An entry is removed when it no longer decodes, when its embedded hash does
//! not match its location, when the report is stale and a rescan was
//! requested, or (on request) when the service did not know the resource.

pub mod integrity;
pub mod layout;
pub mod transition;

use std::io;
use std::path::{Path, PathBuf};

use crate::report::Provider;

pub use integrity::IntegrityReport;
pub use layout::{
    contains_traversal, default_cache_root, is_cached_element_name, path_for_cached_element,
    shard_names, MAX_ENTRY_SIZE, SHARD_COUNT,
};
pub use transition::TransitionStats;

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The identifier is not a SHA-256 hex digest.
    #[error("Invalid cache identifier: {0:?}")]
    InvalidId(String),

    /// The cache root contains a `..` component.
    #[error("Refusing cache root with parent directory component: {0}")]
    Traversal(PathBuf),

    /// An I/O error on a specific path.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Handle to one cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    /// Create a manager for the cache below `root`. Nothing is touched on disk.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Manager for the default cache location of `provider`.
    #[must_use]
    pub fn for_provider(provider: Provider) -> Self {
        Self::new(default_cache_root(provider))
    }

    /// Root directory of the cache.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cache file for `id`, see [`path_for_cached_element`].
    #[must_use]
    pub fn path_for(&self, id: &str) -> Option<PathBuf> {
        path_for_cached_element(id, &self.root)
    }

    /// Create the root directory and all 256 shard directories.
    ///
    /// Existing directories are left alone, so this is safe to call on
    /// every start.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if a directory cannot be created.
    pub fn create_cache_directory(&self) -> CacheResult<()> {
        layout::create_cache_directory(&self.root)
    }

    /// Remove the cache file for `id`, see [`delete_cached_element`].
    ///
    /// # Errors
    ///
    /// See [`delete_cached_element`].
    pub fn delete_cached_element(&self, id: &str) -> CacheResult<()> {
        delete_cached_element(id, &self.root)
    }

    /// Scan every shard for corrupted entries.
    ///
    /// # Errors
    ///
    /// Only fails if the cache root itself cannot be read; problems with
    /// single entries are counted and logged.
    pub fn check_integrity(
        &self,
        provider: Provider,
        delete_corrupted: bool,
        delete_unknown: bool,
    ) -> CacheResult<IntegrityReport> {
        integrity::check_integrity(&self.root, provider, delete_corrupted, delete_unknown)
    }

    /// Migrate entries from the flat and 16-shard layouts into the current
    /// 256-shard layout, creating the new directory tree first.
    ///
    /// # Errors
    ///
    /// Fails if the new directory tree cannot be created.
    pub fn perform_transition(&self, provider: Provider) -> CacheResult<TransitionStats> {
        self.create_cache_directory()?;
        let mut stats = transition::transition_one_to_256(&self.root, provider);
        stats.merge(transition::transition_16_to_256(&self.root, provider));
        Ok(stats)
    }
}

/// Remove the cache file for `id` below `root`.
///
/// A file that does not exist counts as removed.
///
/// # Errors
///
/// Returns [`CacheError::InvalidId`] for identifiers that are not SHA-256
/// digests, [`CacheError::Traversal`] for roots with `..` components and
/// [`CacheError::Io`] if the removal fails.
pub fn delete_cached_element(id: &str, root: &Path) -> CacheResult<()> {
    if contains_traversal(root) {
        return Err(CacheError::Traversal(root.to_path_buf()));
    }
    let path = path_for_cached_element(id, root).ok_or_else(|| CacheError::InvalidId(id.to_string()))?;
    match std::fs::remove_file(&path) {
        Ok(()) => {
            log::debug!("Removed cached report {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(&path, e)),
    }
}
