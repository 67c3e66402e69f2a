//! Scan reports returned by the supported services.
//!
//! Every service speaks its own JSON dialect. Each dialect is deserialized into
//! a private wire struct and then converted into the provider-neutral
//! [`Report`], which keeps the service specific bits as explicit variant
//! payloads ([`ProviderDetails`], [`EngineDetails`]) instead of a type
//! hierarchy.
//!
//! The cache stores the raw response body, so [`Provider::decode`] is used for
//! both live responses and cached files.

pub mod honeypot;
pub mod metascan;
pub mod virustotal;

use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Response code: the resource is known and a report is available.
pub const RESPONSE_FOUND: i64 = 1;
/// Response code: the resource is not known to the service.
pub const RESPONSE_NOT_FOUND: i64 = 0;
/// Response code: the resource is queued for analysis.
pub const RESPONSE_QUEUED: i64 = -2;

/// The scanning services this tool can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// VirusTotal public API, version 2.
    #[default]
    #[value(name = "virustotal", alias = "vt")]
    VirusTotal,
    /// Legacy VirusTotal honeypot API.
    Honeypot,
    /// Metascan / Metadefender Cloud.
    #[value(alias = "metadefender")]
    Metascan,
}

impl Provider {
    /// Human readable service name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::VirusTotal => "VirusTotal",
            Self::Honeypot => "VirusTotal honeypot",
            Self::Metascan => "Metadefender",
        }
    }

    /// Directory name of this service's report cache below `~/.scan-tool`.
    #[must_use]
    pub fn cache_dir_name(self) -> &'static str {
        match self {
            Self::VirusTotal => "vt-cache",
            Self::Honeypot => "honeypot-cache",
            Self::Metascan => "metascan-cache",
        }
    }

    /// Decode a raw response body (live or cached) into a [`Report`].
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the body is not a report of this service.
    pub fn decode(self, body: &[u8]) -> Result<Report, serde_json::Error> {
        match self {
            Self::VirusTotal => virustotal::decode(body),
            Self::Honeypot => honeypot::decode(body),
            Self::Metascan => metascan::decode(body),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a single antivirus engine inside a report.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResult {
    /// Engine name, unique within one report.
    pub engine: String,
    /// Whether the engine flagged the file.
    pub detected: bool,
    /// Threat label, empty when nothing was found.
    pub result: String,
    /// Service specific engine metadata.
    pub details: EngineDetails,
}

/// Engine metadata only some services provide.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineDetails {
    /// VirusTotal engine version and definition date.
    VirusTotal { version: String, update: String },
    /// The honeypot API only reports the threat label.
    Honeypot,
    /// Metadefender numeric verdict, definition time and scan duration.
    Metascan {
        scan_result: i64,
        def_time: String,
        scan_time_ms: u64,
    },
}

/// Report level data only some services provide.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderDetails {
    /// VirusTotal echoes the requested resource.
    VirusTotal { resource: String, verbose_msg: String },
    Honeypot,
    /// Metadefender job state.
    Metascan {
        data_id: String,
        scan_all_result: Option<i64>,
        scan_all_result_text: String,
        progress_percentage: Option<u32>,
    },
}

/// A decoded scan report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Normalized response code, see [`RESPONSE_FOUND`] and friends.
    pub response_code: i64,
    /// Scan id for follow-up requests, if the service returned one.
    pub scan_id: Option<String>,
    /// Scan date as sent by the service.
    pub scan_date: String,
    /// Parsed scan date, `None` when the date could not be parsed.
    pub scan_time: Option<DateTime<Utc>>,
    /// Number of engines that flagged the file.
    pub positives: u32,
    /// Number of engines consulted.
    pub total: u32,
    /// Per engine results, sorted by engine name.
    pub engines: Vec<EngineResult>,
    /// Link to the human readable report.
    pub permalink: String,
    /// MD5 of the content, if the service sent it.
    pub md5: Option<String>,
    /// SHA-1 of the content, if the service sent it.
    pub sha1: Option<String>,
    /// SHA-256 of the content, if the service sent it.
    pub sha256: Option<String>,
    /// Service specific payload.
    pub details: ProviderDetails,
}

impl Report {
    /// The report is complete and carries a verdict.
    #[must_use]
    pub fn successful_retrieval(&self) -> bool {
        match &self.details {
            ProviderDetails::Metascan {
                data_id,
                scan_all_result_text,
                ..
            } => !self.engines.is_empty() && !scan_all_result_text.is_empty() && !data_id.is_empty(),
            _ => self.response_code == RESPONSE_FOUND,
        }
    }

    /// The service does not know the resource.
    #[must_use]
    pub fn not_found(&self) -> bool {
        match &self.details {
            ProviderDetails::Metascan { data_id, .. } => {
                !self.still_in_queue() && (data_id.is_empty() || self.engines.is_empty())
            }
            _ => self.response_code == RESPONSE_NOT_FOUND,
        }
    }

    /// The resource is queued or being analysed.
    #[must_use]
    pub fn still_in_queue(&self) -> bool {
        match &self.details {
            ProviderDetails::Metascan {
                data_id,
                progress_percentage,
                ..
            } => !data_id.is_empty() && progress_percentage.is_some_and(|p| p < 100),
            _ => self.response_code == RESPONSE_QUEUED,
        }
    }

    /// Whether the report is older than `max_age` at `now`.
    ///
    /// Reports without a parsable scan date are never considered stale.
    #[must_use]
    pub fn is_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.scan_time.is_some_and(|t| t < now - max_age)
    }

    /// Content hash embedded in the report, used to verify cache entries.
    ///
    /// Falls back to the echoed VirusTotal resource when it is a SHA-256.
    #[must_use]
    pub fn embedded_sha256(&self) -> Option<&str> {
        if let Some(sha256) = self.sha256.as_deref().filter(|s| !s.is_empty()) {
            return Some(sha256);
        }
        match &self.details {
            ProviderDetails::VirusTotal { resource, .. } if crate::hash::is_sha256(resource) => {
                Some(resource)
            }
            _ => None,
        }
    }

    /// Classify a completed report against `maybe_limit`.
    ///
    /// Counts detecting engines. A Metadefender report whose aggregate
    /// result flags the file is at least possibly infected, even when no
    /// single engine did.
    #[must_use]
    pub fn verdict(&self, maybe_limit: u32) -> Verdict {
        match classify(self.positives, maybe_limit) {
            Verdict::Clean if metascan::aggregate_infected(self) => Verdict::PossiblyInfected,
            verdict => verdict,
        }
    }

    /// Engines that flagged the file.
    pub fn detections(&self) -> impl Iterator<Item = &EngineResult> {
        self.engines.iter().filter(|e| e.detected)
    }
}

/// Outcome of classifying a completed report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No engine flagged the file.
    Clean,
    /// At least one but no more than the configured limit of engines.
    PossiblyInfected,
    /// More engines than the configured limit.
    Infected,
}

/// Classify a positives count against the "maybe" limit.
#[must_use]
pub fn classify(positives: u32, maybe_limit: u32) -> Verdict {
    if positives == 0 {
        Verdict::Clean
    } else if positives <= maybe_limit {
        Verdict::PossiblyInfected
    } else {
        Verdict::Infected
    }
}

/// Parse the `YYYY-MM-DD HH:MM:SS` dates used by VirusTotal as UTC.
pub(crate) fn parse_vt_date(date: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(date.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
