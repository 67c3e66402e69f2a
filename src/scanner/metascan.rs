//! Metascan / Metadefender Cloud, API version 2.
//!
//! Hash lookups and file jobs live on different hosts. A private server
//! replaces both. The API key travels in a header, and uploads send the raw
//! file as request body with the file name in another header.
//!
//! Scans and lookups are limited independently: the free tier allows 25
//! uploads and 1500 lookups per hour.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::{
    check_upload, fetch_report, is_valid_resource, submit, CachePolicy, RateLimiter, RateLimits,
    RequestPool, ScanError, Scanner,
};
use crate::hash::is_sha256;
use crate::http::{HttpRequest, Transport};
use crate::report::{Provider, Report};

/// Hash lookup host.
pub const LOOKUP_BASE: &str = "https://hashlookup.metadefender.com/v2";
/// File upload and job host.
pub const SCAN_BASE: &str = "https://scan.metadefender.com/v2";

pub const RATE_LIMITS: RateLimits = RateLimits {
    scan_interval: Duration::from_millis(144_000),
    lookup_interval: Duration::from_millis(2_400),
    pool: RequestPool::Separate,
};

/// Largest upload accepted by the cloud service.
pub const MAX_SCAN_SIZE: u64 = 140 * 1024 * 1024;

/// Answer to an upload or rescan.
#[derive(Debug, Default, Deserialize)]
struct Submission {
    #[serde(default)]
    data_id: String,
    #[serde(default)]
    status: String,
}

/// Client for Metadefender Cloud or a private Metadefender server.
pub struct MetascanScanner {
    api_key: String,
    lookup_base: String,
    scan_base: String,
    transport: Box<dyn Transport>,
    limiter: RateLimiter,
    max_scan_size: u64,
}

impl MetascanScanner {
    #[must_use]
    pub fn new(api_key: String, transport: Box<dyn Transport>, limiter: RateLimiter) -> Self {
        Self {
            api_key,
            lookup_base: LOOKUP_BASE.to_string(),
            scan_base: SCAN_BASE.to_string(),
            transport,
            limiter,
            max_scan_size: MAX_SCAN_SIZE,
        }
    }

    /// Talk to a private server at `url` for lookups and jobs alike.
    #[must_use]
    pub fn with_server(mut self, url: &str) -> Self {
        let url = url.trim_end_matches('/').to_string();
        self.lookup_base.clone_from(&url);
        self.scan_base = url;
        self
    }

    #[must_use]
    pub fn with_max_scan_size(mut self, size: u64) -> Self {
        self.max_scan_size = size;
        self
    }

    /// Hashes are looked up on the lookup host, anything else is a data id.
    fn report_url(&self, resource: &str) -> String {
        if is_sha256(resource) {
            format!("{}/hash/{}", self.lookup_base, resource)
        } else {
            format!("{}/file/{}", self.scan_base, resource)
        }
    }

    fn accepted(body: &[u8]) -> Result<String, ScanError> {
        let provider = Provider::Metascan;
        let submission: Submission = serde_json::from_slice(body)
            .map_err(|source| ScanError::Decode { provider, source })?;
        if !submission.data_id.is_empty() && submission.status == "inqueue" {
            Ok(submission.data_id)
        } else {
            Err(ScanError::NotAccepted {
                provider,
                message: format!("status {:?}", submission.status),
            })
        }
    }
}

impl Scanner for MetascanScanner {
    fn provider(&self) -> Provider {
        Provider::Metascan
    }

    fn get_report(&mut self, resource: &str, cache: &CachePolicy) -> Result<Report, ScanError> {
        if !is_valid_resource(resource) {
            return Err(ScanError::InvalidResource(resource.to_string()));
        }
        let request = HttpRequest::get(self.report_url(resource)).header("apikey", &self.api_key);
        fetch_report(
            Provider::Metascan,
            &mut self.limiter,
            self.transport.as_ref(),
            request,
            resource,
            cache,
        )
    }

    fn scan(&mut self, path: &Path) -> Result<String, ScanError> {
        check_upload(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let request = HttpRequest::post(format!("{}/file", self.scan_base))
            .header("apikey", &self.api_key)
            .header("filename", filename)
            .body_file(path);
        let body = submit(
            Provider::Metascan,
            &mut self.limiter,
            self.transport.as_ref(),
            &request,
        )?;
        Self::accepted(&body)
    }

    fn rescan(&mut self, resource: &str) -> Result<String, ScanError> {
        if !is_valid_resource(resource) {
            return Err(ScanError::InvalidResource(resource.to_string()));
        }
        let request = HttpRequest::get(format!("{}/rescan/{}", self.scan_base, resource))
            .header("apikey", &self.api_key);
        let body = submit(
            Provider::Metascan,
            &mut self.limiter,
            self.transport.as_ref(),
            &request,
        )?;
        Self::accepted(&body)
    }

    fn max_scan_size(&self) -> u64 {
        self.max_scan_size
    }
}
