//! Legacy VirusTotal honeypot API.
//!
//! Honeypot keys use the old v1 JSON endpoints. They are allowed far more
//! requests than public keys and share one quota for scans and lookups.

use std::path::Path;
use std::time::Duration;

use super::{
    check_upload, fetch_report, is_valid_resource, submit, CachePolicy, RateLimiter, RateLimits,
    RequestPool, ScanError, Scanner,
};
use crate::http::{HttpRequest, Transport};
use crate::report::{Provider, Report, RESPONSE_FOUND};

/// Base URL of the v1 API.
pub const API_BASE: &str = "https://www.virustotal.com/api";

pub const RATE_LIMITS: RateLimits = RateLimits {
    scan_interval: Duration::from_millis(1_000),
    lookup_interval: Duration::from_millis(1_000),
    pool: RequestPool::Shared,
};

pub const MAX_SCAN_SIZE: u64 = 32 * 1024 * 1024;

/// Client for the honeypot endpoints.
pub struct HoneypotScanner {
    api_key: String,
    base: String,
    transport: Box<dyn Transport>,
    limiter: RateLimiter,
    max_scan_size: u64,
}

impl HoneypotScanner {
    #[must_use]
    pub fn new(api_key: String, transport: Box<dyn Transport>, limiter: RateLimiter) -> Self {
        Self {
            api_key,
            base: API_BASE.to_string(),
            transport,
            limiter,
            max_scan_size: MAX_SCAN_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_scan_size(mut self, size: u64) -> Self {
        self.max_scan_size = size;
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}.json", self.base, name)
    }

    fn accepted(body: &[u8]) -> Result<String, ScanError> {
        let provider = Provider::Honeypot;
        let report = provider
            .decode(body)
            .map_err(|source| ScanError::Decode { provider, source })?;
        match report.scan_id {
            Some(id) if report.response_code == RESPONSE_FOUND && !id.is_empty() => Ok(id),
            _ => Err(ScanError::NotAccepted {
                provider,
                message: format!("result {}", report.response_code),
            }),
        }
    }
}

impl Scanner for HoneypotScanner {
    fn provider(&self) -> Provider {
        Provider::Honeypot
    }

    fn get_report(&mut self, resource: &str, cache: &CachePolicy) -> Result<Report, ScanError> {
        if !is_valid_resource(resource) {
            return Err(ScanError::InvalidResource(resource.to_string()));
        }
        let request = HttpRequest::post(self.endpoint("get_file_report"))
            .field("resource", resource)
            .field("key", &self.api_key);
        fetch_report(
            Provider::Honeypot,
            &mut self.limiter,
            self.transport.as_ref(),
            request,
            resource,
            cache,
        )
    }

    fn scan(&mut self, path: &Path) -> Result<String, ScanError> {
        check_upload(path)?;
        let request = HttpRequest::post(self.endpoint("scan_file"))
            .field("key", &self.api_key)
            .file("file", path);
        let body = submit(
            Provider::Honeypot,
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
        let request = HttpRequest::post(self.endpoint("rescan_file"))
            .field("resource", resource)
            .field("key", &self.api_key);
        let body = submit(
            Provider::Honeypot,
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
