//! VirusTotal API v2 `file/report` responses.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{parse_vt_date, EngineDetails, EngineResult, ProviderDetails, Report};

#[derive(Debug, Deserialize)]
struct WireReport {
    response_code: i64,
    #[serde(default)]
    verbose_msg: String,
    #[serde(default)]
    resource: String,
    #[serde(default)]
    scan_id: Option<String>,
    #[serde(default)]
    md5: Option<String>,
    #[serde(default)]
    sha1: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    scan_date: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    positives: u32,
    #[serde(default)]
    total: u32,
    #[serde(default)]
    scans: BTreeMap<String, WireEngine>,
}

#[derive(Debug, Deserialize)]
struct WireEngine {
    #[serde(default)]
    detected: bool,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    update: Option<String>,
}

pub(crate) fn decode(body: &[u8]) -> Result<Report, serde_json::Error> {
    let wire: WireReport = serde_json::from_slice(body)?;

    let engines = wire
        .scans
        .into_iter()
        .map(|(engine, scan)| EngineResult {
            engine,
            detected: scan.detected,
            result: scan.result.unwrap_or_default(),
            details: EngineDetails::VirusTotal {
                version: scan.version.unwrap_or_default(),
                update: scan.update.unwrap_or_default(),
            },
        })
        .collect();

    Ok(Report {
        response_code: wire.response_code,
        scan_id: wire.scan_id,
        scan_time: parse_vt_date(&wire.scan_date),
        scan_date: wire.scan_date,
        positives: wire.positives,
        total: wire.total,
        engines,
        permalink: wire.permalink,
        md5: wire.md5,
        sha1: wire.sha1,
        sha256: wire.sha256,
        details: ProviderDetails::VirusTotal {
            resource: wire.resource,
            verbose_msg: wire.verbose_msg,
        },
    })
}
