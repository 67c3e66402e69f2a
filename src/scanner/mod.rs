//! Scanner implementations for the supported services.
//!
//! All services are used through the [`Scanner`] trait:
//!
//! - [`Scanner::get_report`]: look up a report by SHA-256 or scan id, reading
//!   and writing the on-disk cache.
//! - [`Scanner::scan`]: upload a file for analysis.
//! - [`Scanner::rescan`]: ask the service to analyse a known resource again.
//!
//! Each scanner owns a [`RateLimiter`] and never has more than one request in
//! flight.
//!
//! # Architecture
//!
//! - [`limiter`]: per class request throttling
//! - [`virustotal`]: VirusTotal API v2
//! - [`honeypot`]: legacy VirusTotal honeypot API
//! - [`metascan`]: Metascan / Metadefender

pub mod honeypot;
pub mod limiter;
pub mod metascan;
pub mod virustotal;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::cache::path_for_cached_element;
use crate::http::{
    HttpRequest, ReqwestTransport, Transport, TransportError, DEFAULT_TIMEOUT, LOOKUP_TIMEOUT,
};
use crate::report::{Provider, Report};

pub use honeypot::HoneypotScanner;
pub use limiter::{describe_wait, sleep_until, Interrupted, RateLimiter, RateLimits, RequestPool};
pub use metascan::MetascanScanner;
pub use virustotal::VirusTotalScanner;

/// Errors from scanner operations.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// No response could be obtained.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The service answered with a status other than 200.
    #[error("{provider} answered with HTTP status {status}: {reason}")]
    Status {
        provider: Provider,
        status: u16,
        reason: &'static str,
    },

    /// The response or cached file is not what the service should send.
    #[error("Malformed {provider} response: {source}")]
    Decode {
        provider: Provider,
        #[source]
        source: serde_json::Error,
    },

    /// The resource id cannot be sent to the service.
    #[error("Invalid resource identifier: {0:?}")]
    InvalidResource(String),

    /// An empty path was given for upload.
    #[error("No file given for submission")]
    EmptyPath,

    /// The file to upload cannot be accessed.
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The service answered but did not queue the request.
    #[error("{provider} did not accept the request: {message}")]
    NotAccepted { provider: Provider, message: String },

    /// Shutdown was requested while waiting for the rate limit.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// How [`Scanner::get_report`] uses the on-disk cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Answer lookups from the cache when possible.
    pub read: bool,
    /// Cache root. Successful responses are written here even when `read` is
    /// off. `None` disables the cache entirely.
    pub dir: Option<PathBuf>,
}

impl CachePolicy {
    /// No cache reads or writes.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Read from and write to the cache below `dir`.
    #[must_use]
    pub fn read_write(dir: impl Into<PathBuf>) -> Self {
        Self {
            read: true,
            dir: Some(dir.into()),
        }
    }

    /// Only write fetched reports to the cache below `dir`.
    #[must_use]
    pub fn write_only(dir: impl Into<PathBuf>) -> Self {
        Self {
            read: false,
            dir: Some(dir.into()),
        }
    }
}

/// Uniform interface over the scanning services.
pub trait Scanner {
    /// The service behind this scanner.
    fn provider(&self) -> Provider;

    /// Look up the report for `resource` (a SHA-256 or a scan id).
    ///
    /// # Errors
    ///
    /// Returns an error for invalid ids, transport failures, non-200 answers
    /// and undecodable responses. An undecodable cached file is removed.
    fn get_report(&mut self, resource: &str, cache: &CachePolicy) -> Result<Report, ScanError>;

    /// Upload `path` for analysis and return the scan id.
    ///
    /// # Errors
    ///
    /// Fails unless the service confirms the file was queued.
    fn scan(&mut self, path: &Path) -> Result<String, ScanError>;

    /// Request a new analysis of a known resource and return the scan id.
    ///
    /// # Errors
    ///
    /// Fails unless the service confirms the rescan was queued.
    fn rescan(&mut self, resource: &str) -> Result<String, ScanError>;

    /// Largest file size in bytes the service accepts for upload.
    fn max_scan_size(&self) -> u64;
}

/// Settings for [`build_scanner`].
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub provider: Provider,
    pub api_key: String,
    pub honour_time_limit: bool,
    /// Extra CA certificate for the Metadefender endpoint.
    pub certificate_file: Option<PathBuf>,
    /// Base URL of an on-premise Metadefender server.
    pub metascan_url: Option<String>,
    /// Override of the service's upload limit.
    pub max_scan_size: Option<u64>,
    pub shutdown_flag: Option<Arc<AtomicBool>>,
}

/// Build the scanner for `settings.provider` on top of the reqwest transport.
///
/// # Errors
///
/// Fails if the transport cannot be created, e.g. because the certificate
/// file is unusable.
pub fn build_scanner(settings: &ScannerSettings) -> Result<Box<dyn Scanner>, ScanError> {
    let certificate = match settings.provider {
        Provider::Metascan => settings.certificate_file.as_deref(),
        _ => None,
    };
    let transport = Box::new(ReqwestTransport::new(certificate, DEFAULT_TIMEOUT)?);
    Ok(build_scanner_with_transport(settings, transport))
}

/// Build the scanner for `settings.provider` on top of `transport`.
#[must_use]
pub fn build_scanner_with_transport(
    settings: &ScannerSettings,
    transport: Box<dyn Transport>,
) -> Box<dyn Scanner> {
    let limiter = |limits: RateLimits| {
        let limiter = RateLimiter::new(limits).with_time_limit(settings.honour_time_limit);
        match &settings.shutdown_flag {
            Some(flag) => limiter.with_shutdown_flag(Arc::clone(flag)),
            None => limiter,
        }
    };

    match settings.provider {
        Provider::VirusTotal => {
            let mut scanner = VirusTotalScanner::new(
                settings.api_key.clone(),
                transport,
                limiter(virustotal::RATE_LIMITS),
            );
            if let Some(size) = settings.max_scan_size {
                scanner = scanner.with_max_scan_size(size);
            }
            Box::new(scanner)
        }
        Provider::Honeypot => {
            let mut scanner = HoneypotScanner::new(
                settings.api_key.clone(),
                transport,
                limiter(honeypot::RATE_LIMITS),
            );
            if let Some(size) = settings.max_scan_size {
                scanner = scanner.with_max_scan_size(size);
            }
            Box::new(scanner)
        }
        Provider::Metascan => {
            let mut scanner = MetascanScanner::new(
                settings.api_key.clone(),
                transport,
                limiter(metascan::RATE_LIMITS),
            );
            if let Some(url) = &settings.metascan_url {
                scanner = scanner.with_server(url);
            }
            if let Some(size) = settings.max_scan_size {
                scanner = scanner.with_max_scan_size(size);
            }
            Box::new(scanner)
        }
    }
}

/// Whether `resource` may be sent as a report or rescan identifier.
///
/// Accepts SHA-256 digests and scan ids such as `<sha256>-<timestamp>`.
#[must_use]
pub fn is_valid_resource(resource: &str) -> bool {
    !resource.is_empty()
        && resource.len() <= 256
        && resource
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Explanation for a non-200 status.
#[must_use]
pub fn status_reason(status: u16) -> &'static str {
    match status {
        204 => "request rate limit exceeded",
        400 => "bad request",
        401 => "invalid API key",
        403 => "forbidden, check the API key and its privileges",
        404 => "not found",
        413 => "file too large",
        429 => "too many requests",
        500..=599 => "service error",
        _ => "unexpected status",
    }
}

/// Shared report lookup: cache read, rate limit, request, write-through.
pub(crate) fn fetch_report(
    provider: Provider,
    limiter: &mut RateLimiter,
    transport: &dyn Transport,
    request: HttpRequest,
    resource: &str,
    cache: &CachePolicy,
) -> Result<Report, ScanError> {
    let cache_path = cache
        .dir
        .as_deref()
        .and_then(|dir| path_for_cached_element(resource, dir));

    if cache.read {
        if let Some(path) = cache_path.as_deref().filter(|p| p.is_file()) {
            let report = read_cached(provider, path)?;
            if !report.still_in_queue() {
                return Ok(report);
            }
            // A queued answer is only valid for the moment it was given.
            log::debug!("Discarding queued report cached at {}", path.display());
            remove_cached(path);
        }
    }

    let request = match request.timeout {
        Some(_) => request,
        None => request.timeout(LOOKUP_TIMEOUT),
    };
    limiter.wait_for_hash_lookup_limit_expiration()?;
    let response = transport.perform(&request);
    limiter.hash_lookup_was_now();
    let response = response?;

    if response.status != 200 {
        return Err(ScanError::Status {
            provider,
            status: response.status,
            reason: status_reason(response.status),
        });
    }

    let report = provider
        .decode(&response.body)
        .map_err(|source| ScanError::Decode { provider, source })?;

    match &cache_path {
        Some(path) if !report.still_in_queue() => write_cached(path, &response.body),
        _ => {}
    }
    Ok(report)
}

fn read_cached(provider: Provider, path: &Path) -> Result<Report, ScanError> {
    let body = fs::read(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match provider.decode(&body) {
        Ok(report) => {
            log::debug!("Using cached report {}", path.display());
            Ok(report)
        }
        Err(source) => {
            log::warn!("Removing corrupted cache file {}", path.display());
            remove_cached(path);
            Err(ScanError::Decode { provider, source })
        }
    }
}

fn remove_cached(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::error!("Could not remove {}: {}", path.display(), e);
    }
}

fn write_cached(path: &Path, body: &[u8]) {
    let written = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| fs::write(path, body));
    if let Err(e) = written {
        log::warn!("Could not write cache file {}: {}", path.display(), e);
    }
}

/// Shared submission: rate limit, request, status check. Returns the body.
pub(crate) fn submit(
    provider: Provider,
    limiter: &mut RateLimiter,
    transport: &dyn Transport,
    request: &HttpRequest,
) -> Result<Vec<u8>, ScanError> {
    limiter.wait_for_scan_limit_expiration()?;
    let response = transport.perform(request);
    limiter.scan_request_was_now();
    let response = response?;

    if response.status != 200 {
        return Err(ScanError::Status {
            provider,
            status: response.status,
            reason: status_reason(response.status),
        });
    }
    Ok(response.body)
}

/// Reject empty paths and paths that are not readable files.
pub(crate) fn check_upload(path: &Path) -> Result<(), ScanError> {
    if path.as_os_str().is_empty() {
        return Err(ScanError::EmptyPath);
    }
    fs::metadata(path)
        .and_then(|meta| {
            if meta.is_file() {
                Ok(())
            } else {
                Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "not a regular file",
                ))
            }
        })
        .map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })
}
