//! Legacy VirusTotal honeypot API responses.
//!
//! The report payload is a two element array: the scan date followed by an
//! object mapping engine names to threat labels. An engine counts as having
//! detected something when its label is not empty.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{parse_vt_date, EngineDetails, EngineResult, ProviderDetails, Report};

#[derive(Debug, Deserialize)]
struct WireReport {
    #[serde(alias = "result")]
    response_code: i64,
    #[serde(default)]
    report: Option<(String, BTreeMap<String, Option<String>>)>,
    #[serde(default)]
    scan_id: Option<String>,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    md5: Option<String>,
    #[serde(default)]
    sha1: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
}

pub(crate) fn decode(body: &[u8]) -> Result<Report, serde_json::Error> {
    let wire: WireReport = serde_json::from_slice(body)?;
    let (scan_date, scans) = wire.report.unwrap_or_default();

    let engines: Vec<EngineResult> = scans
        .into_iter()
        .map(|(engine, label)| {
            let result = label.unwrap_or_default();
            EngineResult {
                engine,
                detected: !result.is_empty(),
                result,
                details: EngineDetails::Honeypot,
            }
        })
        .collect();

    let positives = engines.iter().filter(|e| e.detected).count();

    Ok(Report {
        response_code: wire.response_code,
        scan_id: wire.scan_id,
        scan_time: parse_vt_date(&scan_date),
        scan_date,
        positives: u32::try_from(positives).unwrap_or(u32::MAX),
        total: u32::try_from(engines.len()).unwrap_or(u32::MAX),
        engines,
        permalink: wire.permalink,
        md5: wire.md5,
        sha1: wire.sha1,
        sha256: wire.sha256,
        details: ProviderDetails::Honeypot,
    })
}
