//! Diagnostics on stderr.
//!
//! Everything scan-tool reports while it works (rate limit waits,
//! submissions, cache evictions, skipped files) goes through the `log`
//! facade and is printed by `env_logger` on stderr. Stdout only carries the
//! summary, so it can be redirected on its own.
//!
//! `RUST_LOG` overrides the command-line flags when it is set:
//!
//! ```bash
//! RUST_LOG=scan_tool::scanner=trace scan-tool scan sample.exe
//! ```

use std::io::Write;

use env_logger::Builder;
use log::LevelFilter;

/// How much the user asked to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// `--silent`: warnings and errors.
    Silent,
    /// Progress messages.
    Normal,
    /// `-v`: request details, with timestamps and module paths.
    Debug,
    /// `-vv` and more.
    Trace,
}

impl Verbosity {
    /// Map the command-line flags. `silent` wins over any `-v`.
    #[must_use]
    pub fn from_flags(verbose: u8, silent: bool) -> Self {
        match (silent, verbose) {
            (true, _) => Self::Silent,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Debug,
            (false, _) => Self::Trace,
        }
    }

    #[must_use]
    pub fn level(self) -> LevelFilter {
        match self {
            Self::Silent => LevelFilter::Warn,
            Self::Normal => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
            Self::Trace => LevelFilter::Trace,
        }
    }

    fn detailed(self) -> bool {
        matches!(self, Self::Debug | Self::Trace)
    }
}

/// Install the stderr logger for the given flags.
///
/// Only the first call in a process installs a logger; later calls are
/// ignored, so `run_app` can be invoked repeatedly from tests.
pub fn init_logging(verbose: u8, silent: bool) {
    let verbosity = Verbosity::from_flags(verbose, silent);
    let mut builder = Builder::new();

    if std::env::var_os("RUST_LOG").is_some() {
        builder.parse_default_env();
    } else {
        builder.filter_level(verbosity.level());
    }

    let detailed = verbosity.detailed();
    builder.format(move |buf, record| {
        let style = buf.default_level_style(record.level());
        if detailed {
            writeln!(
                buf,
                "{} {style}{:<5}{style:#} {}: {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        } else {
            writeln!(buf, "{style}{:<5}{style:#} {}", record.level(), record.args())
        }
    });

    if builder.try_init().is_ok() {
        log::debug!("Logging at {:?} ({})", verbosity, log::max_level());
    }
}
