//! VirusTotal public API, version 2.
//!
//! Scans and report lookups share one quota of four requests per minute.

use std::path::Path;
use std::time::Duration;

use super::{
    check_upload, fetch_report, is_valid_resource, submit, CachePolicy, RateLimiter, RateLimits,
    RequestPool, ScanError, Scanner,
};
use crate::http::{HttpRequest, Transport};
use crate::report::{Provider, Report, RESPONSE_FOUND};

/// Base URL of the v2 API.
pub const API_BASE: &str = "https://www.virustotal.com/vtapi/v2";

/// Public API quota: one request every 15 seconds, shared by all classes.
pub const RATE_LIMITS: RateLimits = RateLimits {
    scan_interval: Duration::from_millis(15_000),
    lookup_interval: Duration::from_millis(15_000),
    pool: RequestPool::Shared,
};

/// Largest upload accepted by `file/scan`.
pub const MAX_SCAN_SIZE: u64 = 32 * 1024 * 1024;

/// Client for the VirusTotal v2 file endpoints.
pub struct VirusTotalScanner {
    api_key: String,
    base: String,
    transport: Box<dyn Transport>,
    limiter: RateLimiter,
    max_scan_size: u64,
}

impl VirusTotalScanner {
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

    /// Override the upload size limit, e.g. for private API keys.
    #[must_use]
    pub fn with_max_scan_size(mut self, size: u64) -> Self {
        self.max_scan_size = size;
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/file/{}", self.base, name)
    }

    /// The service accepted a submission if it answers "found" with a scan id.
    fn accepted(&self, body: &[u8]) -> Result<String, ScanError> {
        let provider = Provider::VirusTotal;
        let report = provider
            .decode(body)
            .map_err(|source| ScanError::Decode { provider, source })?;
        match report.scan_id {
            Some(id) if report.response_code == RESPONSE_FOUND && !id.is_empty() => Ok(id),
            _ => Err(ScanError::NotAccepted {
                provider,
                message: format!("response code {}", report.response_code),
            }),
        }
    }
}

impl Scanner for VirusTotalScanner {
    fn provider(&self) -> Provider {
        Provider::VirusTotal
    }

    fn get_report(&mut self, resource: &str, cache: &CachePolicy) -> Result<Report, ScanError> {
        if !is_valid_resource(resource) {
            return Err(ScanError::InvalidResource(resource.to_string()));
        }
        let request = HttpRequest::post(self.endpoint("report"))
            .field("resource", resource)
            .field("apikey", &self.api_key);
        fetch_report(
            Provider::VirusTotal,
            &mut self.limiter,
            self.transport.as_ref(),
            request,
            resource,
            cache,
        )
    }

    fn scan(&mut self, path: &Path) -> Result<String, ScanError> {
        check_upload(path)?;
        let request = HttpRequest::post(self.endpoint("scan"))
            .field("apikey", &self.api_key)
            .file("file", path);
        let body = submit(
            Provider::VirusTotal,
            &mut self.limiter,
            self.transport.as_ref(),
            &request,
        )?;
        self.accepted(&body)
    }

    fn rescan(&mut self, resource: &str) -> Result<String, ScanError> {
        if !is_valid_resource(resource) {
            return Err(ScanError::InvalidResource(resource.to_string()));
        }
        let request = HttpRequest::post(self.endpoint("rescan"))
            .field("resource", resource)
            .field("apikey", &self.api_key);
        let body = submit(
            Provider::VirusTotal,
            &mut self.limiter,
            self.transport.as_ref(),
            &request,
        )?;
        self.accepted(&body)
    }

    fn max_scan_size(&self) -> u64 {
        self.max_scan_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::http::{HttpResponse, Method, MockTransport};
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    const HASH: &str = "8d44a0cce1e229179fb1369842750d537606793bcb63686ce25f9e9c13885295";

    fn found_body() -> String {
        format!(
            r#"{{"response_code": 1, "verbose_msg": "Scan finished", "resource": "{HASH}", "sha256": "{HASH}", "scan_id": "{HASH}-1464112434", "scan_date": "2016-05-24 17:53:54", "permalink": "https://www.virustotal.com/file/{HASH}/analysis/", "positives": 2, "total": 3, "scans": {{"A": {{"detected": true, "result": "EICAR"}}, "B": {{"detected": true, "result": "Test"}}, "C": {{"detected": false, "result": null}}}}}}"#
        )
    }

    fn scanner(mock: &Arc<MockTransport>) -> VirusTotalScanner {
        VirusTotalScanner::new(
            "secret".to_string(),
            Box::new(Arc::clone(mock)),
            RateLimiter::new(RATE_LIMITS).with_time_limit(false),
        )
    }

    #[test]
    fn test_get_report_from_network() {
        let mock = Arc::new(MockTransport::new().with_response(HttpResponse::json(found_body())));
        let mut vt = scanner(&mock);

        let report = vt.get_report(HASH, &CachePolicy::disabled()).unwrap();
        assert!(report.successful_retrieval());
        assert_eq!(report.positives, 2);

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].url, format!("{API_BASE}/file/report"));
        assert_eq!(requests[0].field_value("resource"), Some(HASH));
        assert_eq!(requests[0].field_value("apikey"), Some("secret"));
        assert_eq!(requests[0].timeout, Some(crate::http::LOOKUP_TIMEOUT));
    }

    #[test]
    fn test_cache_round_trip_without_network() {
        let dir = tempdir().unwrap();
        let cache = CacheManager::new(dir.path());
        cache.create_cache_directory().unwrap();
        fs::write(cache.path_for(HASH).unwrap(), found_body()).unwrap();

        let mock = Arc::new(MockTransport::new());
        let mut vt = scanner(&mock);
        let report = vt
            .get_report(HASH, &CachePolicy::read_write(dir.path()))
            .unwrap();

        assert_eq!(report, Provider::VirusTotal.decode(found_body().as_bytes()).unwrap());
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_write_through_when_reads_disabled() {
        let dir = tempdir().unwrap();
        let cache = CacheManager::new(dir.path());
        let mock = Arc::new(MockTransport::new().with_response(HttpResponse::json(found_body())));
        let mut vt = scanner(&mock);

        vt.get_report(HASH, &CachePolicy::write_only(dir.path()))
            .unwrap();

        let stored = fs::read_to_string(cache.path_for(HASH).unwrap()).unwrap();
        assert_eq!(stored, found_body());
    }

    #[test]
    fn test_corrupted_cache_file_is_removed() {
        let dir = tempdir().unwrap();
        let cache = CacheManager::new(dir.path());
        cache.create_cache_directory().unwrap();
        let path = cache.path_for(HASH).unwrap();
        fs::write(&path, b"{truncated").unwrap();

        let mock = Arc::new(MockTransport::new());
        let mut vt = scanner(&mock);
        let result = vt.get_report(HASH, &CachePolicy::read_write(dir.path()));

        assert!(matches!(result, Err(ScanError::Decode { .. })));
        assert!(!path.exists());
        assert!(mock.requests().is_empty());
    }

    fn queued_body() -> String {
        format!(
            r#"{{"response_code": -2, "resource": "{HASH}", "scan_id": "{HASH}-1464112434", "verbose_msg": "Your resource is queued for analysis"}}"#
        )
    }

    #[test]
    fn test_queued_report_is_not_cached() {
        let dir = tempdir().unwrap();
        let cache = CacheManager::new(dir.path());
        let mock = Arc::new(MockTransport::new().with_response(HttpResponse::json(queued_body())));
        let mut vt = scanner(&mock);

        let report = vt
            .get_report(HASH, &CachePolicy::read_write(dir.path()))
            .unwrap();
        assert!(report.still_in_queue());
        assert!(!cache.path_for(HASH).unwrap().exists());
    }

    #[test]
    fn test_cached_queued_report_is_refetched() {
        let dir = tempdir().unwrap();
        let cache = CacheManager::new(dir.path());
        cache.create_cache_directory().unwrap();
        let path = cache.path_for(HASH).unwrap();
        fs::write(&path, queued_body()).unwrap();

        let mock = Arc::new(MockTransport::new().with_response(HttpResponse::json(found_body())));
        let mut vt = scanner(&mock);
        let report = vt
            .get_report(HASH, &CachePolicy::read_write(dir.path()))
            .unwrap();

        assert!(report.successful_retrieval());
        assert_eq!(mock.requests().len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), found_body());
    }

    #[test]
    fn test_non_200_is_an_error_and_not_cached() {
        let dir = tempdir().unwrap();
        let cache = CacheManager::new(dir.path());
        let mock = Arc::new(MockTransport::new().with_response(HttpResponse::status(204)));
        let mut vt = scanner(&mock);

        let result = vt.get_report(HASH, &CachePolicy::read_write(dir.path()));
        assert!(matches!(result, Err(ScanError::Status { status: 204, .. })));
        assert!(!cache.path_for(HASH).unwrap().exists());
    }

    #[test]
    fn test_invalid_resource_never_reaches_network() {
        let mock = Arc::new(MockTransport::new());
        let mut vt = scanner(&mock);
        assert!(matches!(
            vt.get_report("../etc", &CachePolicy::disabled()),
            Err(ScanError::InvalidResource(_))
        ));
        assert!(matches!(vt.rescan(""), Err(ScanError::InvalidResource(_))));
        assert!(matches!(vt.scan(Path::new("")), Err(ScanError::EmptyPath)));
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_scan_uploads_file() {
        let dir = tempdir().unwrap();
        let sample = dir.path().join("sample.bin");
        fs::write(&sample, b"payload").unwrap();

        let body = format!(
            r#"{{"response_code": 1, "scan_id": "{HASH}-1464112434", "resource": "{HASH}", "verbose_msg": "Scan request successfully queued"}}"#
        );
        let mock = Arc::new(MockTransport::new().with_response(HttpResponse::json(body)));
        let mut vt = scanner(&mock);

        let scan_id = vt.scan(&sample).unwrap();
        assert_eq!(scan_id, format!("{HASH}-1464112434"));

        let request = &mock.requests()[0];
        assert_eq!(request.url, format!("{API_BASE}/file/scan"));
        assert_eq!(request.files, vec![("file".to_string(), sample)]);
        assert_eq!(request.timeout, None);
    }

    #[test]
    fn test_rescan_rejected_without_scan_id() {
        let mock = Arc::new(
            MockTransport::new().with_response(HttpResponse::json(r#"{"response_code": 0}"#)),
        );
        let mut vt = scanner(&mock);
        assert!(matches!(vt.rescan(HASH), Err(ScanError::NotAccepted { .. })));
        assert_eq!(mock.requests()[0].url, format!("{API_BASE}/file/rescan"));
    }

    #[test]
    fn test_max_scan_size_override() {
        let mock = Arc::new(MockTransport::new());
        assert_eq!(scanner(&mock).max_scan_size(), MAX_SCAN_SIZE);
        assert_eq!(scanner(&mock).with_max_scan_size(10).max_scan_size(), 10);
    }
}
