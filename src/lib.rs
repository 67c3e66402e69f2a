//! scan-tool: submit files to online malware scanners.
//!
//! Files are looked up by SHA-256 on VirusTotal, the VirusTotal honeypot API
//! or Metadefender, uploaded when the service does not know them, and their
//! reports are kept in a sharded on-disk cache. Requests are paced to the
//! public API quotas and archives can be expanded before scanning.

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod handler;
pub mod hash;
pub mod http;
pub mod logging;
pub mod report;
pub mod scanner;
pub mod signal;
pub mod strategy;
pub mod summary;

#[cfg(test)]
mod testing;

use std::io::Write;

use anyhow::{Context, Result};

use crate::cache::CacheManager;
use crate::cli::{CacheCommand, Cli, Commands, ScanArgs};
use crate::config::Config;
use crate::context::RunContext;
use crate::error::{ExitCode, RunError};
use crate::handler::handlers_for;
use crate::scanner::{build_scanner, CachePolicy, ScannerSettings};
use crate::strategy::{Strategy, StrategySettings};
use crate::summary::Summary;

/// Run the command described by `cli`.
///
/// # Errors
///
/// Returns configuration errors, cache errors and the [`RunError`] that
/// ended a scan. The summary of a scan is printed before its error is
/// returned.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.silent);
    if cli.no_color {
        yansi::disable();
    }

    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match &cli.command {
        Commands::Scan(args) => {
            config.merge_scan_args(args);
            run_scan_command(&config, args)
        }
        Commands::Cache(args) => {
            config.merge_cache_target(args.action.target());
            run_cache_command(&config, &args.action)
        }
    }
}

fn run_scan_command(config: &Config, args: &ScanArgs) -> Result<ExitCode> {
    let api_key = config
        .apikey
        .clone()
        .filter(|key| !key.is_empty())
        .context("No API key: use --apikey, SCAN_TOOL_APIKEY or the configuration file")?;

    let shutdown = signal::install_handler()?;
    let cache = prepare_cache(config, args)?;

    let settings = ScannerSettings {
        provider: config.service,
        api_key,
        honour_time_limit: config.honour_time_limit,
        certificate_file: config.certificate_file.clone(),
        metascan_url: config.metascan_url.clone(),
        max_scan_size: args.max_size,
        shutdown_flag: Some(shutdown.flag()),
    };
    let mut scanner = build_scanner(&settings).map_err(RunError::from)?;
    log::debug!(
        "Using {} with strategy {:?}",
        config.service,
        args.strategy
    );

    let strategy = Strategy::new(
        args.strategy,
        StrategySettings {
            maybe_limit: config.maybe_limit,
            max_age: config.max_age(),
            cache,
        },
    )
    .with_handlers(handlers_for(
        &args.archive_kinds(),
        args.ignore_extraction_errors,
    ));
    let mut ctx = RunContext::new().with_shutdown_flag(shutdown.flag());

    let outcome = driver::collect_files(&args.paths)
        .and_then(|files| driver::run_scan(&strategy, scanner.as_mut(), &mut ctx, &files));

    let mut stdout = std::io::stdout().lock();
    Summary::new(&ctx, config.maybe_limit)
        .write_to(&mut stdout)
        .context("Failed to write summary")?;
    stdout.flush().context("Failed to write summary")?;

    outcome?;
    Ok(ExitCode::Success)
}

/// Create and migrate the cache unless it is disabled.
fn prepare_cache(config: &Config, args: &ScanArgs) -> Result<CachePolicy> {
    if args.disable_cache {
        return Ok(CachePolicy::disabled());
    }

    let manager = CacheManager::new(config.cache_root());
    let stats = manager
        .perform_transition(config.service)
        .with_context(|| format!("Cannot prepare cache {}", manager.root().display()))?;
    if stats.moved > 0 || stats.deleted_corrupt > 0 || stats.deleted_unknown > 0 {
        log::info!(
            "Migrated {} cached reports ({} corrupted, {} unknown removed)",
            stats.moved,
            stats.deleted_corrupt,
            stats.deleted_unknown
        );
    }

    let root = manager.root().to_path_buf();
    Ok(if args.no_cache {
        CachePolicy::write_only(root)
    } else {
        CachePolicy::read_write(root)
    })
}

fn run_cache_command(config: &Config, command: &CacheCommand) -> Result<ExitCode> {
    let manager = CacheManager::new(config.cache_root());
    let root = manager.root().display().to_string();

    match command {
        CacheCommand::Init(_) => {
            manager
                .create_cache_directory()
                .with_context(|| format!("Cannot create cache {root}"))?;
            println!("Cache ready at {root}");
            Ok(ExitCode::Success)
        }
        CacheCommand::Check(args) => {
            let report = manager
                .check_integrity(config.service, args.delete_corrupted, args.delete_unknown)
                .with_context(|| format!("Cannot check cache {root}"))?;
            println!(
                "Checked {} entries in {root}: {} corrupted, {} deleted, {} unknown pruned",
                report.checked, report.corrupted, report.deleted, report.unknown_pruned
            );
            if report.delete_failures > 0 || report.corrupted > report.deleted {
                Ok(ExitCode::FileError)
            } else {
                Ok(ExitCode::Success)
            }
        }
        CacheCommand::Migrate(_) => {
            let stats = manager
                .perform_transition(config.service)
                .with_context(|| format!("Cannot migrate cache {root}"))?;
            println!(
                "Moved {} entries, removed {} corrupted and {} unknown, {} failed",
                stats.moved, stats.deleted_corrupt, stats.deleted_unknown, stats.failed
            );
            Ok(if stats.failed > 0 {
                ExitCode::FileError
            } else {
                ExitCode::Success
            })
        }
    }
}
