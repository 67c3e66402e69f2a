//! Cache directory layout.

use std::fs;
use std::path::{Component, Path, PathBuf};

use super::{CacheError, CacheResult};
use crate::hash::{is_sha256, SHA256_HEX_LEN};
use crate::report::Provider;

/// Number of shard directories (`00` to `ff`).
pub const SHARD_COUNT: usize = 256;

/// Cache files at or above this size are treated as corrupted.
pub const MAX_ENTRY_SIZE: u64 = 2 * 1024 * 1024;

const EXTENSION: &str = ".json";

/// Derive the cache file path of `id` below `root`.
///
/// Returns `None` if `id` is not a SHA-256 hex digest or if `root` contains a
/// `..` component. The identifier is lowercased so it always lands in one of
/// the `00`..`ff` shards. Nothing on disk is checked.
///
/// # Example
///
/// ```
/// use scan_tool::cache::path_for_cached_element;
/// use std::path::Path;
///
/// let id = "8d44a0cce1e229179fb1369842750d537606793bcb63686ce25f9e9c13885295";
/// let path = path_for_cached_element(id, Path::new("/tmp/cache")).unwrap();
/// assert_eq!(path, Path::new("/tmp/cache/8d").join(format!("{id}.json")));
/// ```
#[must_use]
pub fn path_for_cached_element(id: &str, root: &Path) -> Option<PathBuf> {
    if !is_sha256(id) || contains_traversal(root) {
        return None;
    }
    let id = id.to_ascii_lowercase();
    Some(root.join(&id[..2]).join(format!("{id}{EXTENSION}")))
}

/// Whether `root` contains a parent directory (`..`) component.
#[must_use]
pub fn contains_traversal(root: &Path) -> bool {
    root.components().any(|c| matches!(c, Component::ParentDir))
}

/// Whether a file name looks like a cache entry: 64 hex digits plus `.json`.
#[must_use]
pub fn is_cached_element_name(name: &str) -> bool {
    name.len() == SHA256_HEX_LEN + EXTENSION.len()
        && name.ends_with(EXTENSION)
        && name.get(..SHA256_HEX_LEN).is_some_and(is_sha256)
}

/// Names of all shard directories, `00` through `ff`.
pub fn shard_names() -> impl Iterator<Item = String> {
    (0..SHARD_COUNT).map(|i| format!("{i:02x}"))
}

/// Default cache root for `provider`: `~/.scan-tool/<provider cache dir>`.
///
/// Falls back to the system temporary directory when no home directory can
/// be determined.
#[must_use]
pub fn default_cache_root(provider: Provider) -> PathBuf {
    crate::config::app_dir().join(provider.cache_dir_name())
}

pub(super) fn create_cache_directory(root: &Path) -> CacheResult<()> {
    if contains_traversal(root) {
        return Err(CacheError::Traversal(root.to_path_buf()));
    }
    fs::create_dir_all(root).map_err(|e| CacheError::io(root, e))?;
    for shard in shard_names() {
        let dir = root.join(shard);
        if !dir.is_dir() {
            fs::create_dir(&dir).map_err(|e| CacheError::io(&dir, e))?;
        }
    }
    log::debug!("Cache directory ready at {}", root.display());
    Ok(())
}
