//! Command-line interface definitions for scan-tool.
//!
//! Global options control verbosity, color and error formatting. The `scan`
//! subcommand submits files to a scanning service; the `cache` subcommand
//! maintains the local report cache.
//!
//! # Example
//!
//! ```bash
//! # Look up every file below ~/Downloads on VirusTotal
//! scan-tool scan ~/Downloads --apikey $KEY
//!
//! # Expand zip and tar archives, submit without looking up first
//! scan-tool scan suspicious.zip --archive zip --archive tar --strategy direct
//!
//! # Remove undecodable reports from the Metadefender cache
//! scan-tool cache check --service metascan --delete-corrupted
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::handler::ArchiveKind;
use crate::report::Provider;
use crate::strategy::StrategyKind;

/// Submit files to online malware scanners.
///
/// scan-tool looks files up by their SHA-256 on VirusTotal, the VirusTotal
/// honeypot API or Metadefender, uploads files the service does not know,
/// and keeps every report in a local cache.
#[derive(Debug, Parser)]
#[command(name = "scan-tool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print warnings and errors
    #[arg(short = 'q', long, alias = "quiet", global = true, conflicts_with = "verbose")]
    pub silent: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Print errors as JSON documents on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (default: ~/.scan-tool/scan-tool.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan files and directories
    Scan(ScanArgs),
    /// Maintain the report cache
    Cache(CacheArgs),
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Files or directories to scan (directories are walked recursively)
    #[arg(value_name = "PATH", required = true, num_args = 1..)]
    pub paths: Vec<PathBuf>,

    /// Scanning service
    #[arg(long, value_enum)]
    pub service: Option<Provider>,

    /// API key of the scanning service
    #[arg(long, env = "SCAN_TOOL_APIKEY", hide_env_values = true)]
    pub apikey: Option<String>,

    /// Scan policy
    #[arg(long, value_enum, default_value = "default")]
    pub strategy: StrategyKind,

    /// Files with at most N detections are reported as possibly infected
    #[arg(long = "maybe", value_name = "N")]
    pub maybe_limit: Option<u32>,

    /// Rescan files whose report is older than DAYS
    #[arg(long, value_name = "DAYS")]
    pub max_age: Option<u32>,

    /// Report cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Do not read cached reports (new reports are still stored)
    #[arg(long, conflicts_with = "disable_cache")]
    pub no_cache: bool,

    /// Neither read nor store reports
    #[arg(long)]
    pub disable_cache: bool,

    /// Expand archives of this format (can be specified multiple times)
    #[arg(long = "archive", value_enum, value_name = "FORMAT")]
    pub archives: Vec<ArchiveKind>,

    /// Expand archives of every supported format
    #[arg(long = "archives", conflicts_with = "archives")]
    pub all_archives: bool,

    /// Scan archives that fail to extract as plain files
    #[arg(long)]
    pub ignore_extraction_errors: bool,

    /// Do not wait between requests
    #[arg(long)]
    pub no_time_limit: bool,

    /// Extra CA certificate (PEM) for the Metadefender endpoint
    #[arg(long, value_name = "PEM")]
    pub certificate_file: Option<PathBuf>,

    /// Base URL of an on-premise Metadefender server
    #[arg(long, value_name = "URL")]
    pub metascan_url: Option<String>,

    /// Largest file to upload (e.g., 10MB, 32MiB); defaults to the service limit
    ///
    /// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_size: Option<u64>,
}

impl ScanArgs {
    /// Archive formats to expand.
    #[must_use]
    pub fn archive_kinds(&self) -> Vec<ArchiveKind> {
        if self.all_archives {
            ArchiveKind::ALL.to_vec()
        } else {
            self.archives.clone()
        }
    }
}

/// Arguments for the cache subcommand.
#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheCommand,
}

/// Cache maintenance operations.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Create the cache directory tree
    Init(CacheTarget),
    /// Look for corrupted cache entries
    Check(CheckArgs),
    /// Move entries of older layouts into the current one
    Migrate(CacheTarget),
}

impl CacheCommand {
    /// The cache the operation works on.
    #[must_use]
    pub fn target(&self) -> &CacheTarget {
        match self {
            Self::Init(target) | Self::Migrate(target) => target,
            Self::Check(args) => &args.target,
        }
    }
}

/// Selects the cache of one service.
#[derive(Debug, Args)]
pub struct CacheTarget {
    /// Service whose cache to use
    #[arg(long, value_enum)]
    pub service: Option<Provider>,

    /// Cache directory (default: ~/.scan-tool/<service>-cache)
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,
}

/// Arguments for `cache check`.
#[derive(Debug, Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub target: CacheTarget,

    /// Delete corrupted entries
    #[arg(long)]
    pub delete_corrupted: bool,

    /// Delete reports of resources the service did not know
    #[arg(long)]
    pub delete_unknown: bool,
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use scan_tool::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("32MiB").unwrap(), 33_554_432);
/// assert_eq!(parse_size("140MB").unwrap(), 140_000_000);
/// ```
///
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// a negative number, or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }
    if s.starts_with('-') {
        return Err("Size cannot be negative".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
