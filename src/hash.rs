//! SHA-256 content hashing.
//!
//! Resource identifiers throughout the tool are lowercase hexadecimal SHA-256
//! digests of file content. This module computes them with streaming reads so
//! large files never have to be held in memory.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Length of a hex encoded SHA-256 digest.
pub const SHA256_HEX_LEN: usize = 64;

/// Compute the SHA-256 digest of a file, returned as lowercase hex.
///
/// # Errors
///
/// Returns the underlying I/O error if the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check whether `s` is a syntactically valid hex SHA-256 digest.
#[must_use]
pub fn is_sha256(s: &str) -> bool {
    s.len() == SHA256_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
