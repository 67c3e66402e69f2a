//! Metascan / Metadefender hash lookup and job responses.
//!
//! Metadefender has no response code. A lookup for an unknown hash returns an
//! object of the form `{"<HASH>": "Not Found"}`, a queued job returns a data id
//! with a progress below 100, and a finished job carries per engine details.
//! The normalized response code is derived from that shape.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{
    EngineDetails, EngineResult, ProviderDetails, Report, RESPONSE_FOUND, RESPONSE_NOT_FOUND,
    RESPONSE_QUEUED,
};

#[derive(Debug, Default, Deserialize)]
struct WireReport {
    #[serde(default)]
    data_id: Option<String>,
    #[serde(default)]
    scan_results: WireScanResults,
    #[serde(default)]
    file_info: WireFileInfo,
}

#[derive(Debug, Default, Deserialize)]
struct WireScanResults {
    #[serde(default)]
    data_id: Option<String>,
    #[serde(default)]
    scan_details: BTreeMap<String, WireEngine>,
    #[serde(default)]
    scan_all_result_i: Option<i64>,
    #[serde(default)]
    scan_all_result_a: String,
    #[serde(default)]
    start_time: String,
    #[serde(default)]
    total_avs: Option<u32>,
    #[serde(default)]
    progress_percentage: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFileInfo {
    #[serde(default)]
    md5: Option<String>,
    #[serde(default)]
    sha1: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEngine {
    #[serde(default)]
    scan_result_i: i64,
    #[serde(default)]
    threat_found: String,
    #[serde(default)]
    def_time: String,
    #[serde(default)]
    scan_time: u64,
}

/// Whether a Metadefender result code marks the file as detected.
///
/// 1 is "infected/known", 2 "suspicious" and 8 "skipped: blacklisted".
#[must_use]
pub fn result_code_detected(code: i64) -> bool {
    matches!(code, 1 | 2 | 8)
}

pub(crate) fn decode(body: &[u8]) -> Result<Report, serde_json::Error> {
    let wire: WireReport = serde_json::from_slice(body)?;
    let results = wire.scan_results;

    let data_id = wire
        .data_id
        .or(results.data_id)
        .unwrap_or_default();

    let engines: Vec<EngineResult> = results
        .scan_details
        .into_iter()
        .map(|(engine, scan)| EngineResult {
            engine,
            detected: result_code_detected(scan.scan_result_i) || !scan.threat_found.is_empty(),
            result: scan.threat_found,
            details: EngineDetails::Metascan {
                scan_result: scan.scan_result_i,
                def_time: scan.def_time,
                scan_time_ms: scan.scan_time,
            },
        })
        .collect();

    let positives = u32::try_from(engines.iter().filter(|e| e.detected).count()).unwrap_or(u32::MAX);
    let total = results
        .total_avs
        .unwrap_or_else(|| u32::try_from(engines.len()).unwrap_or(u32::MAX));

    let queued = !data_id.is_empty() && results.progress_percentage.is_some_and(|p| p < 100);
    let complete =
        !engines.is_empty() && !results.scan_all_result_a.is_empty() && !data_id.is_empty();
    let response_code = if queued {
        RESPONSE_QUEUED
    } else if complete {
        RESPONSE_FOUND
    } else {
        RESPONSE_NOT_FOUND
    };

    let scan_time = chrono::DateTime::parse_from_rfc3339(&results.start_time)
        .ok()
        .map(|t| t.with_timezone(&chrono::Utc));

    Ok(Report {
        response_code,
        scan_id: (!data_id.is_empty()).then(|| data_id.clone()),
        scan_date: results.start_time,
        scan_time,
        positives,
        total,
        engines,
        permalink: if data_id.is_empty() {
            String::new()
        } else {
            format!("https://metadefender.opswat.com/results#!/file/{data_id}/regular/overview")
        },
        md5: wire.file_info.md5,
        sha1: wire.file_info.sha1,
        sha256: wire.file_info.sha256,
        details: ProviderDetails::Metascan {
            data_id,
            scan_all_result: results.scan_all_result_i,
            scan_all_result_text: results.scan_all_result_a,
            progress_percentage: results.progress_percentage,
        },
    })
}

/// Whether the aggregate verdict of a Metadefender report means "infected".
#[must_use]
pub fn aggregate_infected(report: &Report) -> bool {
    match &report.details {
        ProviderDetails::Metascan {
            scan_all_result, ..
        } => scan_all_result.is_some_and(result_code_detected),
        _ => false,
    }
}
