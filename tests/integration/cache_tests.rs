//! Cache maintenance through the public API and the `cache` subcommands.

use std::fs;
use std::path::Path;

use clap::Parser;
use scan_tool::cache::{CacheManager, SHARD_COUNT};
use scan_tool::cli::Cli;
use scan_tool::error::ExitCode;
use scan_tool::report::Provider;
use tempfile::tempdir;

fn id(prefix: &str) -> String {
    format!("{prefix}{}", "0".repeat(64 - prefix.len()))
}

fn found(sha256: &str) -> String {
    format!(r#"{{"response_code": 1, "sha256": "{sha256}", "positives": 1, "total": 2}}"#)
}

fn run(args: &[&str]) -> ExitCode {
    let mut argv = vec!["scan-tool", "--silent"];
    argv.extend_from_slice(args);
    scan_tool::run_app(Cli::try_parse_from(argv).unwrap()).unwrap()
}

fn shard_dirs(root: &Path) -> usize {
    fs::read_dir(root)
        .unwrap()
        .flatten()
        .filter(|e| e.path().is_dir() && e.file_name().len() == 2)
        .count()
}

#[test]
fn test_cache_init_creates_all_shards() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vt");
    let code = run(&["cache", "init", "--cache-dir", root.to_str().unwrap()]);
    assert_eq!(code, ExitCode::Success);
    assert_eq!(shard_dirs(&root), SHARD_COUNT);

    // Idempotent
    assert_eq!(
        run(&["cache", "init", "--cache-dir", root.to_str().unwrap()]),
        ExitCode::Success
    );
}

#[test]
fn test_migrate_then_check_is_clean() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let flat = id("ab");
    let sharded = id("c");
    fs::write(root.join(format!("{flat}.json")), found(&flat)).unwrap();
    fs::create_dir(root.join("c")).unwrap();
    fs::write(root.join("c").join(format!("{sharded}.json")), found(&sharded)).unwrap();

    let code = run(&["cache", "migrate", "--cache-dir", root.to_str().unwrap()]);
    assert_eq!(code, ExitCode::Success);

    let cache = CacheManager::new(root);
    assert!(cache.path_for(&flat).unwrap().is_file());
    assert!(cache.path_for(&sharded).unwrap().is_file());
    assert!(!root.join("c").exists());

    let report = cache
        .check_integrity(Provider::VirusTotal, false, false)
        .unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.corrupted, 0);
}

#[test]
fn test_check_reports_and_deletes_corruption() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let cache = CacheManager::new(root);
    cache.create_cache_directory().unwrap();

    let good = id("11");
    let misplaced = id("22");
    fs::write(cache.path_for(&good).unwrap(), found(&good)).unwrap();
    // Embedded hash does not match the file name.
    fs::write(cache.path_for(&misplaced).unwrap(), found(&good)).unwrap();

    let code = run(&["cache", "check", "--cache-dir", root.to_str().unwrap()]);
    assert_eq!(code, ExitCode::FileError);
    assert!(cache.path_for(&misplaced).unwrap().exists());

    let code = run(&[
        "cache",
        "check",
        "--delete-corrupted",
        "--cache-dir",
        root.to_str().unwrap(),
    ]);
    assert_eq!(code, ExitCode::Success);
    assert!(!cache.path_for(&misplaced).unwrap().exists());
    assert!(cache.path_for(&good).unwrap().exists());
}

#[test]
fn test_check_missing_cache_is_file_error() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("absent");
    let cli = Cli::try_parse_from([
        "scan-tool",
        "--silent",
        "cache",
        "check",
        "--cache-dir",
        missing.to_str().unwrap(),
    ])
    .unwrap();
    let err = scan_tool::run_app(cli).unwrap_err();
    assert_eq!(scan_tool::error::exit_code_for(&err), ExitCode::FileError);
}

#[test]
fn test_delete_unknown_prunes_metascan_misses() {
    let dir = tempdir().unwrap();
    let cache = CacheManager::new(dir.path());
    cache.create_cache_directory().unwrap();
    let hash = id("ee");
    fs::write(
        cache.path_for(&hash).unwrap(),
        format!(r#"{{"{hash}": "Not Found"}}"#),
    )
    .unwrap();

    let report = cache.check_integrity(Provider::Metascan, false, true).unwrap();
    assert_eq!(report.unknown_pruned, 1);
    assert_eq!(report.corrupted, 0);
    assert!(!cache.path_for(&hash).unwrap().exists());
}
