//! `run_app` outcomes that need no network access.

use clap::Parser;
use scan_tool::cli::Cli;
use scan_tool::error::{exit_code_for, ExitCode, StructuredError};
use tempfile::tempdir;

fn run_err(args: &[&str]) -> anyhow::Error {
    let mut argv = vec!["scan-tool", "--silent", "--no-color"];
    argv.extend_from_slice(args);
    scan_tool::run_app(Cli::try_parse_from(argv).unwrap()).unwrap_err()
}

#[test]
fn test_missing_input_is_file_error() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nothing-here");
    let err = run_err(&[
        "scan",
        "--apikey",
        "secret",
        "--disable-cache",
        missing.to_str().unwrap(),
    ]);
    assert_eq!(exit_code_for(&err), ExitCode::FileError);
    assert!(format!("{err:#}").contains("nothing-here"));
}

#[test]
fn test_missing_config_file_is_general_error() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("absent.toml");
    let err = run_err(&["--config", config.to_str().unwrap(), "cache", "init"]);
    assert_eq!(exit_code_for(&err), ExitCode::GeneralError);

    let structured = StructuredError::new(&err, ExitCode::GeneralError);
    assert_eq!(structured.code, "ST001");
    assert!(structured.message.contains("absent.toml"));
}

#[test]
fn test_malformed_config_file_is_general_error() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("scan-tool.toml");
    std::fs::write(&config, "maybe_limit = [1, 2]").unwrap();
    let err = run_err(&["--config", config.to_str().unwrap(), "cache", "init"]);
    assert_eq!(exit_code_for(&err), ExitCode::GeneralError);
}

#[test]
fn test_config_file_selects_cache_dir() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("from-config");
    let config = dir.path().join("scan-tool.toml");
    std::fs::write(
        &config,
        format!("cache_dir = {:?}\n", cache_dir.to_str().unwrap()),
    )
    .unwrap();

    let cli = Cli::try_parse_from([
        "scan-tool",
        "--silent",
        "--config",
        config.to_str().unwrap(),
        "cache",
        "init",
    ])
    .unwrap();
    assert_eq!(scan_tool::run_app(cli).unwrap(), ExitCode::Success);
    assert!(cache_dir.join("ff").is_dir());
}
