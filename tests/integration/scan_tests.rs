//! End-to-end scan runs against the in-memory transport.

use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use scan_tool::cache::CacheManager;
use scan_tool::context::RunContext;
use scan_tool::driver::{collect_files, drain_queue, label_for};
use scan_tool::handler::{handlers_for, ArchiveKind};
use scan_tool::hash::sha256_file;
use scan_tool::http::{HttpResponse, MockTransport};
use scan_tool::report::Provider;
use scan_tool::scanner::{build_scanner_with_transport, CachePolicy, Scanner, ScannerSettings};
use scan_tool::strategy::{Strategy, StrategyKind, StrategySettings};
use scan_tool::summary::Summary;
use tempfile::tempdir;

fn settings(provider: Provider) -> ScannerSettings {
    ScannerSettings {
        provider,
        api_key: "secret".to_string(),
        honour_time_limit: false,
        certificate_file: None,
        metascan_url: None,
        max_scan_size: None,
        shutdown_flag: None,
    }
}

fn vt_scanner(mock: &Arc<MockTransport>) -> Box<dyn Scanner> {
    build_scanner_with_transport(&settings(Provider::VirusTotal), Box::new(Arc::clone(mock)))
}

fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// A finished VirusTotal report with `positives` detecting engines.
fn vt_found(hash: &str, positives: u32) -> HttpResponse {
    vt_found_at(hash, positives, &now())
}

fn vt_found_at(hash: &str, positives: u32, date: &str) -> HttpResponse {
    let mut scans: Vec<String> = (0..positives)
        .map(|i| format!(r#""Engine{i}": {{"detected": true, "result": "Trojan.Gen"}}"#))
        .collect();
    scans.push(r#""Clean": {"detected": false, "result": null}"#.to_string());
    HttpResponse::json(format!(
        r#"{{"response_code": 1, "resource": "{hash}", "sha256": "{hash}", "scan_id": "{hash}-1", "scan_date": "{date}", "permalink": "https://www.virustotal.com/file/{hash}/analysis/", "positives": {positives}, "total": {total}, "scans": {{{scans}}}}}"#,
        total = positives + 1,
        scans = scans.join(", ")
    ))
}

fn vt_unknown(hash: &str) -> HttpResponse {
    HttpResponse::json(format!(
        r#"{{"response_code": 0, "resource": "{hash}", "verbose_msg": "The requested resource is not among the finished, queued or pending scans"}}"#
    ))
}

fn vt_still_queued(hash: &str) -> HttpResponse {
    HttpResponse::json(format!(
        r#"{{"response_code": -2, "resource": "{hash}", "scan_id": "{hash}-1", "verbose_msg": "Your resource is queued for analysis"}}"#
    ))
}

fn vt_queued_scan(hash: &str) -> HttpResponse {
    HttpResponse::json(format!(
        r#"{{"response_code": 1, "resource": "{hash}", "scan_id": "{hash}-1", "verbose_msg": "Scan request successfully queued"}}"#
    ))
}

fn default_strategy(cache: CachePolicy) -> Strategy {
    strategy(StrategyKind::Default, cache)
}

fn strategy(kind: StrategyKind, cache: CachePolicy) -> Strategy {
    Strategy::new(
        kind,
        StrategySettings {
            cache,
            ..StrategySettings::default()
        },
    )
}

fn run(strategy: &Strategy, scanner: &mut dyn Scanner, ctx: &mut RunContext, inputs: &[&Path]) {
    let inputs: Vec<_> = inputs.iter().map(|p| p.to_path_buf()).collect();
    for file in collect_files(&inputs).unwrap() {
        strategy.scan(scanner, ctx, &file, &label_for(&file)).unwrap();
    }
    drain_queue(strategy, scanner, ctx, Duration::ZERO).unwrap();
}

#[test]
fn test_known_infected_file_is_reported() {
    let dir = tempdir().unwrap();
    let sample = dir.path().join("dropper.exe");
    fs::write(&sample, b"malicious bytes").unwrap();
    let hash = sha256_file(&sample).unwrap();

    let mock = Arc::new(MockTransport::new().with_response(vt_found(&hash, 12)));
    let mut scanner = vt_scanner(&mock);
    let mut ctx = RunContext::new();
    run(
        &default_strategy(CachePolicy::disabled()),
        scanner.as_mut(),
        &mut ctx,
        &[&sample],
    );

    assert_eq!(mock.requests().len(), 1);
    let summary = Summary::new(&ctx, 3);
    assert_eq!(summary.infected().count(), 1);
    let text = summary.render();
    assert!(text.contains("dropper.exe"));
    assert!(text.contains("(12/13)"));
    assert!(text.contains("Engine0"));
}

#[test]
fn test_unknown_file_is_submitted_and_polled() {
    let dir = tempdir().unwrap();
    let sample = dir.path().join("new.bin");
    fs::write(&sample, b"never seen before").unwrap();
    let hash = sha256_file(&sample).unwrap();

    let mock = Arc::new(
        MockTransport::new()
            .with_response(vt_unknown(&hash))
            .with_response(vt_queued_scan(&hash))
            .with_response(vt_found(&hash, 1)),
    );
    let mut scanner = vt_scanner(&mock);
    let mut ctx = RunContext::new();
    run(
        &default_strategy(CachePolicy::disabled()),
        scanner.as_mut(),
        &mut ctx,
        &[dir.path()],
    );

    let requests = mock.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].url.ends_with("/file/report"));
    assert_eq!(requests[0].field_value("resource"), Some(hash.as_str()));
    assert!(requests[1].url.ends_with("/file/scan"));
    assert_eq!(requests[1].files[0].1, sample);
    assert_eq!(
        requests[2].field_value("resource"),
        Some(format!("{hash}-1").as_str())
    );

    assert!(ctx.queued.is_empty());
    assert_eq!(Summary::new(&ctx, 3).possibly_infected().count(), 1);
    assert_eq!(ctx.file_hashes.values().next(), Some(&hash));
}

#[test]
fn test_cached_report_avoids_network() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let sample = dir.path().join("sample.doc");
    fs::write(&sample, b"macro document").unwrap();
    let hash = sha256_file(&sample).unwrap();
    let strategy = default_strategy(CachePolicy::read_write(&cache_dir));

    let first = Arc::new(MockTransport::new().with_response(vt_found(&hash, 5)));
    let mut scanner = vt_scanner(&first);
    let mut ctx = RunContext::new();
    run(&strategy, scanner.as_mut(), &mut ctx, &[&sample]);
    assert_eq!(first.requests().len(), 1);

    let second = Arc::new(MockTransport::new());
    let mut scanner = vt_scanner(&second);
    let mut ctx = RunContext::new();
    run(&strategy, scanner.as_mut(), &mut ctx, &[&sample]);
    assert!(second.requests().is_empty());
    assert_eq!(Summary::new(&ctx, 3).infected().count(), 1);
}

#[test]
fn test_oversized_file_is_listed_not_uploaded() {
    let dir = tempdir().unwrap();
    let sample = dir.path().join("big.iso");
    fs::write(&sample, vec![0u8; 2048]).unwrap();
    let hash = sha256_file(&sample).unwrap();

    let mock = Arc::new(MockTransport::new().with_response(vt_unknown(&hash)));
    let mut scanner = build_scanner_with_transport(
        &ScannerSettings {
            max_scan_size: Some(1024),
            ..settings(Provider::VirusTotal)
        },
        Box::new(Arc::clone(&mock)),
    );
    let mut ctx = RunContext::new();
    run(
        &default_strategy(CachePolicy::disabled()),
        scanner.as_mut(),
        &mut ctx,
        &[&sample],
    );

    assert_eq!(mock.requests().len(), 1);
    assert_eq!(ctx.large_files.len(), 1);
    assert_eq!(ctx.large_files[0].size, 2048);
    assert!(Summary::new(&ctx, 3).render().contains("big.iso"));
}

#[test]
fn test_zip_members_are_scanned_individually() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("bundle.zip");
    {
        let mut zip = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
        let options = zip::write::FileOptions::default();
        zip.start_file("inner/evil.exe", options).unwrap();
        zip.write_all(b"evil").unwrap();
        zip.finish().unwrap();
    }
    let member_hash = format!("{:x}", <sha2::Sha256 as sha2::Digest>::digest(b"evil"));

    let mock = Arc::new(MockTransport::new().with_response(vt_found(&member_hash, 20)));
    let mut scanner = vt_scanner(&mock);
    let strategy = default_strategy(CachePolicy::disabled())
        .with_handlers(handlers_for(&[ArchiveKind::Zip], false));
    let mut ctx = RunContext::new();
    run(&strategy, scanner.as_mut(), &mut ctx, &[&archive]);

    assert_eq!(mock.requests().len(), 1);
    assert_eq!(
        mock.requests()[0].field_value("resource"),
        Some(member_hash.as_str())
    );
    let (label, _) = ctx.findings().next().unwrap();
    assert!(label.ends_with("bundle.zip/inner/evil.exe"));
}

#[test]
fn test_metascan_lookup_uses_hash_endpoint() {
    let dir = tempdir().unwrap();
    let sample = dir.path().join("clean.txt");
    fs::write(&sample, b"hello").unwrap();
    let hash = sha256_file(&sample).unwrap();

    let mock = Arc::new(MockTransport::new().with_response(HttpResponse::json(format!(
        r#"{{"{hash}": "Not Found"}}"#
    ))));
    let mut scanner = build_scanner_with_transport(
        &ScannerSettings {
            metascan_url: Some("https://md.example.org/v2/".to_string()),
            ..settings(Provider::Metascan)
        },
        Box::new(Arc::clone(&mock)),
    );
    let _ = scanner.get_report(&hash, &CachePolicy::disabled());

    let request = &mock.requests()[0];
    assert_eq!(request.url, format!("https://md.example.org/v2/hash/{hash}"));
    assert_eq!(request.header_value("apikey"), Some("secret"));
}

#[test]
fn test_queued_report_is_asked_again_next_run() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let sample = dir.path().join("pending.exe");
    fs::write(&sample, b"still being analysed").unwrap();
    let hash = sha256_file(&sample).unwrap();
    let strategy = default_strategy(CachePolicy::read_write(&cache_dir));

    // Lookup, then the drain poll by scan id: both still queued.
    let first = Arc::new(
        MockTransport::new()
            .with_response(vt_still_queued(&hash))
            .with_response(vt_still_queued(&hash)),
    );
    let mut scanner = vt_scanner(&first);
    let mut ctx = RunContext::new();
    run(&strategy, scanner.as_mut(), &mut ctx, &[&sample]);

    assert_eq!(first.requests().len(), 2);
    assert_eq!(ctx.queued.len(), 1);
    assert_eq!(ctx.queued[0].file, label_for(&sample));
    assert!(Summary::new(&ctx, 3)
        .render()
        .contains("Submitted files without a report yet:"));
    assert!(!CacheManager::new(&cache_dir)
        .path_for(&hash)
        .unwrap()
        .exists());

    let second = Arc::new(MockTransport::new().with_response(vt_found(&hash, 9)));
    let mut scanner = vt_scanner(&second);
    let mut ctx = RunContext::new();
    run(&strategy, scanner.as_mut(), &mut ctx, &[&sample]);

    assert_eq!(second.requests().len(), 1);
    assert!(ctx.queued.is_empty());
    assert_eq!(Summary::new(&ctx, 3).infected().count(), 1);
}

#[test]
fn test_stale_cached_report_is_rescanned_and_evicted() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let sample = dir.path().join("old.exe");
    fs::write(&sample, b"seen years ago").unwrap();
    let hash = sha256_file(&sample).unwrap();

    let cache = CacheManager::new(&cache_dir);
    cache.create_cache_directory().unwrap();
    let cached = cache.path_for(&hash).unwrap();
    fs::write(&cached, vt_found_at(&hash, 7, "2015-03-01 10:00:00").body).unwrap();

    let mock = Arc::new(MockTransport::new().with_response(vt_queued_scan(&hash)));
    let mut scanner = vt_scanner(&mock);
    let mut ctx = RunContext::new();
    run(
        &default_strategy(CachePolicy::read_write(&cache_dir)),
        scanner.as_mut(),
        &mut ctx,
        &[&sample],
    );

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].url.ends_with("/file/rescan"));
    assert_eq!(requests[0].field_value("resource"), Some(hash.as_str()));
    assert!(!cached.exists());
    assert_eq!(Summary::new(&ctx, 3).infected().count(), 1);
    assert!(ctx.queued.is_empty());
}

#[test]
fn test_no_rescan_keeps_stale_report_and_polls_submissions() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let old = dir.path().join("old.exe");
    let new = dir.path().join("new.exe");
    fs::write(&old, b"seen years ago").unwrap();
    fs::write(&new, b"brand new").unwrap();
    let old_hash = sha256_file(&old).unwrap();
    let new_hash = sha256_file(&new).unwrap();

    let cache = CacheManager::new(&cache_dir);
    cache.create_cache_directory().unwrap();
    let cached = cache.path_for(&old_hash).unwrap();
    fs::write(&cached, vt_found_at(&old_hash, 7, "2015-03-01 10:00:00").body).unwrap();

    let mock = Arc::new(
        MockTransport::new()
            .with_response(vt_unknown(&new_hash))
            .with_response(vt_queued_scan(&new_hash))
            .with_response(vt_found(&new_hash, 2)),
    );
    let mut scanner = vt_scanner(&mock);
    let mut ctx = RunContext::new();
    run(
        &strategy(StrategyKind::NoRescan, CachePolicy::read_write(&cache_dir)),
        scanner.as_mut(),
        &mut ctx,
        &[&old, &new],
    );

    let urls: Vec<String> = mock.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(urls.len(), 3);
    assert!(urls.iter().all(|url| !url.ends_with("/file/rescan")));
    assert!(urls[2].ends_with("/file/report"));
    assert!(cached.exists());

    let summary = Summary::new(&ctx, 3);
    assert_eq!(summary.infected().count(), 1);
    assert_eq!(summary.possibly_infected().count(), 1);
    assert!(ctx.queued.is_empty());
}

#[test]
fn test_scan_and_forget_never_polls() {
    let dir = tempdir().unwrap();
    let sample = dir.path().join("new.bin");
    fs::write(&sample, b"fire and forget").unwrap();
    let hash = sha256_file(&sample).unwrap();

    let mock = Arc::new(
        MockTransport::new()
            .with_response(vt_unknown(&hash))
            .with_response(vt_queued_scan(&hash)),
    );
    let mut scanner = vt_scanner(&mock);
    let mut ctx = RunContext::new();
    run(
        &strategy(StrategyKind::ScanAndForget, CachePolicy::disabled()),
        scanner.as_mut(),
        &mut ctx,
        &[&sample],
    );

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].url.ends_with("/file/scan"));
    assert!(ctx.queued.is_empty());
    assert!(ctx.last_submission.is_some());
    assert!(Summary::new(&ctx, 3)
        .render()
        .contains("No infected files found."));
}
