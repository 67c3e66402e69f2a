//! Test doubles shared by the unit tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::report::{Provider, ProviderDetails, Report};
use crate::scanner::{CachePolicy, ScanError, Scanner};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_of(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// A VirusTotal style report with the given response code and positives.
pub fn report(response_code: i64, positives: u32) -> Report {
    Report {
        response_code,
        scan_id: None,
        scan_date: String::new(),
        scan_time: None,
        positives,
        total: 60,
        engines: Vec::new(),
        permalink: String::new(),
        md5: None,
        sha1: None,
        sha256: None,
        details: ProviderDetails::VirusTotal {
            resource: String::new(),
            verbose_msg: String::new(),
        },
    }
}

/// Scanner that answers from a map and records every call.
///
/// Unknown resources get a clean report. Scan ids are `scan-<n>`.
#[derive(Debug)]
pub struct StubScanner {
    pub reports: BTreeMap<String, Report>,
    /// Answer every lookup with this response code instead.
    pub unexpected_code: Option<i64>,
    pub fail_lookups: bool,
    pub max_size: u64,
    pub lookups: Vec<String>,
    pub submissions: Vec<PathBuf>,
    pub rescans: Vec<String>,
}

impl Default for StubScanner {
    fn default() -> Self {
        Self {
            reports: BTreeMap::new(),
            unexpected_code: None,
            fail_lookups: false,
            max_size: u64::MAX,
            lookups: Vec::new(),
            submissions: Vec::new(),
            rescans: Vec::new(),
        }
    }
}

impl Scanner for StubScanner {
    fn provider(&self) -> Provider {
        Provider::VirusTotal
    }

    fn get_report(&mut self, resource: &str, _cache: &CachePolicy) -> Result<Report, ScanError> {
        self.lookups.push(resource.to_string());
        if self.fail_lookups {
            return Err(ScanError::Status {
                provider: Provider::VirusTotal,
                status: 204,
                reason: "request rate limit exceeded",
            });
        }
        if let Some(code) = self.unexpected_code {
            return Ok(report(code, 0));
        }
        Ok(self
            .reports
            .get(resource)
            .cloned()
            .unwrap_or_else(|| report(1, 0)))
    }

    fn scan(&mut self, path: &Path) -> Result<String, ScanError> {
        self.submissions.push(path.to_path_buf());
        Ok(format!("scan-{}", self.submissions.len()))
    }

    fn rescan(&mut self, resource: &str) -> Result<String, ScanError> {
        self.rescans.push(resource.to_string());
        Ok(format!("rescan-{}", self.rescans.len()))
    }

    fn max_scan_size(&self) -> u64 {
        self.max_size
    }
}
