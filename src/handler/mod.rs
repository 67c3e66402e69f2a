//! Archive expansion.
//!
//! A [`Handler`] recognises one archive format by its magic bytes, extracts
//! every member into a private temporary directory and feeds each member back
//! into the active [`Strategy`]. Members therefore go through the same
//! hashing, cache and report pipeline as top-level files, including further
//! archive expansion.
//!
//! # Architecture
//!
//! - [`ArchiveFormat`]: detection and entry iteration for one format
//! - [`formats`]: implementations for zip, tar, gzip, bzip2 and xz
//! - [`Handler`]: temporary directory handling and recursion
//!
//! Single-stream compressors (gzip, bzip2, xz) yield one member, the
//! decompressed data. A `.tar.gz` is thus expanded by the gzip handler first
//! and the tar handler second.

pub mod formats;

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::RunError;
use crate::scanner::Scanner;
use crate::strategy::Strategy;

pub use formats::{Bzip2Format, GzipFormat, TarFormat, XzFormat, ZipFormat};

/// Deepest archive nesting that is expanded. Deeper members are scanned as is.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Zip,
    Tar,
    #[value(alias = "gz")]
    Gzip,
    #[value(alias = "bz2")]
    Bzip2,
    Xz,
}

impl ArchiveKind {
    /// All formats, in the order handlers are tried.
    pub const ALL: [ArchiveKind; 5] = [Self::Zip, Self::Tar, Self::Gzip, Self::Bzip2, Self::Xz];

    /// The implementation of this format.
    #[must_use]
    pub fn format(self) -> Box<dyn ArchiveFormat> {
        match self {
            Self::Zip => Box::new(ZipFormat),
            Self::Tar => Box::new(TarFormat),
            Self::Gzip => Box::new(GzipFormat),
            Self::Bzip2 => Box::new(Bzip2Format),
            Self::Xz => Box::new(XzFormat),
        }
    }
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        };
        f.write_str(name)
    }
}

/// Errors raised while reading an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The visitor stopped the iteration.
    #[error("Extraction aborted")]
    Aborted,
}

/// A regular file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Path of the member inside the archive.
    pub name: String,
    /// Uncompressed size as recorded in the archive, if known.
    pub size: Option<u64>,
}

impl EntryInfo {
    /// Last component of the member path, safe to use as a file name.
    #[must_use]
    pub fn basename(&self) -> String {
        Path::new(&self.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "entry".to_string())
    }
}

/// Receives every regular file of an archive together with its content.
pub type EntryVisitor<'a> = dyn FnMut(&EntryInfo, &mut dyn Read) -> Result<(), ArchiveError> + 'a;

/// One archive format.
pub trait ArchiveFormat {
    fn kind(&self) -> ArchiveKind;

    /// Whether `path` starts with this format's magic bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    fn detect(&self, path: &Path) -> io::Result<bool>;

    /// Call `visit` for every regular file in the archive, in archive order.
    /// Directories and links are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first read error or the first error returned by `visit`.
    fn for_each_entry(&self, path: &Path, visit: &mut EntryVisitor<'_>) -> Result<(), ArchiveError>;
}

/// What a handler did with a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The file is not an archive of this format and must be scanned as is.
    NotApplicable,
    /// Every member was processed. The archive itself needs no scan.
    Handled,
}

/// Expands archives of one format.
pub struct Handler {
    format: Box<dyn ArchiveFormat>,
    ignore_errors: bool,
    temp_root: Option<PathBuf>,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("kind", &self.format.kind())
            .field("ignore_errors", &self.ignore_errors)
            .finish()
    }
}

impl Handler {
    #[must_use]
    pub fn new(kind: ArchiveKind) -> Self {
        Self::with_format(kind.format())
    }

    #[must_use]
    pub fn with_format(format: Box<dyn ArchiveFormat>) -> Self {
        Self {
            format,
            ignore_errors: false,
            temp_root: None,
        }
    }

    /// Treat archives that fail to extract as plain files instead of failing
    /// the run.
    #[must_use]
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    /// Create extraction directories below `dir` instead of the system
    /// temporary directory.
    #[must_use]
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> ArchiveKind {
        self.format.kind()
    }

    /// Expand `path` if it is an archive of this handler's format.
    ///
    /// Each member is written to a temporary file, scanned with `strategy`
    /// under the label `label/member` and deleted again. The extraction
    /// directory is removed on every exit path.
    ///
    /// # Errors
    ///
    /// Returns the first error of a member scan, or [`RunError::Extraction`]
    /// when the archive cannot be read and errors are not ignored.
    pub fn handle(
        &self,
        strategy: &Strategy,
        scanner: &mut dyn Scanner,
        ctx: &mut RunContext,
        path: &Path,
        label: &str,
    ) -> Result<HandlerOutcome, RunError> {
        match self.format.detect(path) {
            Ok(true) => {}
            Ok(false) => return Ok(HandlerOutcome::NotApplicable),
            Err(e) => {
                log::debug!("Cannot sniff {} for {}: {}", path.display(), self.kind(), e);
                return Ok(HandlerOutcome::NotApplicable);
            }
        }

        if ctx.depth >= MAX_NESTING_DEPTH {
            log::warn!(
                "{} is nested more than {} archives deep, scanning it without extraction",
                label,
                MAX_NESTING_DEPTH
            );
            return Ok(HandlerOutcome::NotApplicable);
        }

        let temp_dir = self.create_temp_dir()?;
        log::debug!("Expanding {} archive {}", self.kind(), label);

        let mut failure: Option<RunError> = None;
        let mut index = 0usize;
        ctx.depth += 1;
        let extracted = self.format.for_each_entry(path, &mut |entry: &EntryInfo, reader: &mut dyn Read| {
            index += 1;
            let member = temp_dir
                .path()
                .join(format!("{index:05}-{}", entry.basename()));
            let mut out = File::create(&member)?;
            io::copy(reader, &mut out)?;
            drop(out);

            let member_label = format!("{label}/{}", entry.name);
            let scanned = strategy.scan(scanner, ctx, &member, &member_label);
            if let Err(e) = fs::remove_file(&member) {
                log::debug!("Could not remove {}: {}", member.display(), e);
            }
            scanned.map_err(|e| {
                failure = Some(e);
                ArchiveError::Aborted
            })
        });
        ctx.depth -= 1;

        if let Some(e) = failure {
            return Err(e);
        }
        match extracted {
            Ok(()) => Ok(HandlerOutcome::Handled),
            Err(e) if self.ignore_errors => {
                log::warn!("Ignoring extraction error in {}: {}", label, e);
                Ok(HandlerOutcome::NotApplicable)
            }
            Err(source) => Err(RunError::Extraction {
                archive: path.to_path_buf(),
                source,
            }),
        }
    }

    fn create_temp_dir(&self) -> Result<tempfile::TempDir, RunError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("scan-tool-");
        let root = self.temp_root.clone().unwrap_or_else(std::env::temp_dir);
        builder
            .tempdir_in(&root)
            .map_err(|source| RunError::File { path: root, source })
    }
}

/// Build handlers for `kinds` in the canonical order, without duplicates.
#[must_use]
pub fn handlers_for(kinds: &[ArchiveKind], ignore_errors: bool) -> Vec<Handler> {
    ArchiveKind::ALL
        .iter()
        .filter(|kind| kinds.contains(kind))
        .map(|&kind| Handler::new(kind).ignore_errors(ignore_errors))
        .collect()
}

/// Read up to `len` bytes from the start of `path`.
pub(crate) fn read_magic(path: &Path, len: usize) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}
