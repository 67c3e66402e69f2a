//! Archive format implementations.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use super::{read_magic, ArchiveError, ArchiveFormat, ArchiveKind, EntryInfo, EntryVisitor};

const ZIP_MAGIC: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

/// Zip archives, including empty ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipFormat;

impl ArchiveFormat for ZipFormat {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Zip
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        let magic = read_magic(path, 4)?;
        Ok(ZIP_MAGIC.iter().any(|m| magic.starts_with(m)))
    }

    fn for_each_entry(&self, path: &Path, visit: &mut EntryVisitor<'_>) -> Result<(), ArchiveError> {
        let mut archive = zip::ZipArchive::new(BufReader::new(File::open(path)?))?;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }
            let info = EntryInfo {
                name: entry.name().to_string(),
                size: Some(entry.size()),
            };
            visit(&info, &mut entry)?;
        }
        Ok(())
    }
}

/// POSIX and GNU tar archives. Only regular files are visited.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarFormat;

impl ArchiveFormat for TarFormat {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Tar
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        let magic = read_magic(path, TAR_MAGIC_OFFSET + TAR_MAGIC.len())?;
        Ok(magic.get(TAR_MAGIC_OFFSET..) == Some(TAR_MAGIC))
    }

    fn for_each_entry(&self, path: &Path, visit: &mut EntryVisitor<'_>) -> Result<(), ArchiveError> {
        let mut archive = tar::Archive::new(BufReader::new(File::open(path)?));
        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let info = EntryInfo {
                name: entry.path()?.to_string_lossy().into_owned(),
                size: Some(entry.size()),
            };
            visit(&info, &mut entry)?;
        }
        Ok(())
    }
}

/// Name of the single member of a compressed stream: the file name without
/// its compression suffix.
fn stream_member_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "tgz" | "tbz" | "tbz2" | "txz" => format!("{stem}.tar"),
        _ if stem.is_empty() => "data".to_string(),
        _ => stem,
    }
}

fn visit_stream(
    path: &Path,
    reader: &mut dyn Read,
    visit: &mut EntryVisitor<'_>,
) -> Result<(), ArchiveError> {
    let info = EntryInfo {
        name: stream_member_name(path),
        size: None,
    };
    visit(&info, reader)
}

/// Gzip streams, including concatenated members.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipFormat;

impl ArchiveFormat for GzipFormat {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Gzip
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        Ok(read_magic(path, GZIP_MAGIC.len())? == GZIP_MAGIC)
    }

    fn for_each_entry(&self, path: &Path, visit: &mut EntryVisitor<'_>) -> Result<(), ArchiveError> {
        let mut decoder = flate2::read::MultiGzDecoder::new(BufReader::new(File::open(path)?));
        visit_stream(path, &mut decoder, visit)
    }
}

/// Bzip2 streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bzip2Format;

impl ArchiveFormat for Bzip2Format {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Bzip2
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        let magic = read_magic(path, BZIP2_MAGIC.len() + 1)?;
        Ok(magic.starts_with(BZIP2_MAGIC)
            && magic.get(BZIP2_MAGIC.len()).is_some_and(|b| (b'1'..=b'9').contains(b)))
    }

    fn for_each_entry(&self, path: &Path, visit: &mut EntryVisitor<'_>) -> Result<(), ArchiveError> {
        let mut decoder = bzip2::read::MultiBzDecoder::new(BufReader::new(File::open(path)?));
        visit_stream(path, &mut decoder, visit)
    }
}

/// Xz streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct XzFormat;

impl ArchiveFormat for XzFormat {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Xz
    }

    fn detect(&self, path: &Path) -> io::Result<bool> {
        Ok(read_magic(path, XZ_MAGIC.len())? == XZ_MAGIC)
    }

    fn for_each_entry(&self, path: &Path, visit: &mut EntryVisitor<'_>) -> Result<(), ArchiveError> {
        let mut decoder = xz2::read::XzDecoder::new_multi_decoder(BufReader::new(File::open(path)?));
        visit_stream(path, &mut decoder, visit)
    }
}
