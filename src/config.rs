//! Layered configuration.
//!
//! Settings are merged from, in increasing priority:
//!
//! 1. compiled defaults ([`Config::default`])
//! 2. the TOML file `~/.scan-tool/scan-tool.toml` (or `--config <PATH>`)
//! 3. environment variables prefixed with `SCAN_TOOL_`, e.g.
//!    `SCAN_TOOL_APIKEY` or `SCAN_TOOL_MAX_AGE_DAYS`
//! 4. command-line flags ([`Config::merge_scan_args`])
//!
//! ```toml
//! apikey = "0123456789abcdef"
//! service = "metascan"
//! maybe_limit = 5
//! max_age_days = 30
//! metascan_url = "https://metadefender.example.org/v2"
//! ```

use std::path::{Path, PathBuf};

use directories::BaseDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cache::default_cache_root;
use crate::cli::{CacheTarget, ScanArgs};
use crate::report::Provider;

/// Name of the per-user directory below the home directory.
pub const APP_DIR_NAME: &str = ".scan-tool";
/// File name of the default configuration file inside [`app_dir`].
pub const CONFIG_FILE_NAME: &str = "scan-tool.toml";
/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "SCAN_TOOL_";

/// Errors while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration file named on the command line does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    /// A layer could not be parsed or has values of the wrong type.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

/// Per-user settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API key of the scanning service.
    pub apikey: Option<String>,
    /// Scanning service to use.
    pub service: Provider,
    /// Detections up to which a file is only "possibly infected".
    pub maybe_limit: u32,
    /// Reports older than this many days are rescanned.
    pub max_age_days: u32,
    /// Report cache directory; defaults to the service's directory in [`app_dir`].
    pub cache_dir: Option<PathBuf>,
    /// Extra CA certificate for the Metadefender endpoint.
    pub certificate_file: Option<PathBuf>,
    /// Base URL of an on-premise Metadefender server.
    pub metascan_url: Option<String>,
    /// Wait between requests as the public APIs require.
    pub honour_time_limit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apikey: None,
            service: Provider::VirusTotal,
            maybe_limit: 3,
            max_age_days: 90,
            cache_dir: None,
            certificate_file: None,
            metascan_url: None,
            honour_time_limit: true,
        }
    }
}

impl Config {
    /// Load defaults, the configuration file and the environment.
    ///
    /// `path` is the file given with `--config`. Without it the default file
    /// is read if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `path` does not exist and
    /// [`ConfigError::Invalid`] if a layer cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if !path.is_file() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => default_config_path(),
        };
        Self::load_from_path(&file)
    }

    /// Like [`Config::load`] with an explicit file that may be missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a layer cannot be parsed.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::figment(path).extract().map_err(Box::new)?;
        log::debug!("Configuration loaded (file: {})", path.display());
        Ok(config)
    }

    /// The merged configuration layers, before extraction.
    #[must_use]
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Apply the flags of the scan subcommand.
    pub fn merge_scan_args(&mut self, args: &ScanArgs) {
        if let Some(apikey) = &args.apikey {
            self.apikey = Some(apikey.clone());
        }
        if let Some(service) = args.service {
            self.service = service;
        }
        if let Some(limit) = args.maybe_limit {
            self.maybe_limit = limit;
        }
        if let Some(days) = args.max_age {
            self.max_age_days = days;
        }
        if let Some(dir) = &args.cache_dir {
            self.cache_dir = Some(dir.clone());
        }
        if let Some(cert) = &args.certificate_file {
            self.certificate_file = Some(cert.clone());
        }
        if let Some(url) = &args.metascan_url {
            self.metascan_url = Some(url.clone());
        }
        if args.no_time_limit {
            self.honour_time_limit = false;
        }
    }

    /// Apply the flags of a cache subcommand.
    pub fn merge_cache_target(&mut self, target: &CacheTarget) {
        if let Some(service) = target.service {
            self.service = service;
        }
        if let Some(dir) = &target.cache_dir {
            self.cache_dir = Some(dir.clone());
        }
    }

    /// Cache directory of the configured service.
    #[must_use]
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| default_cache_root(self.service))
    }

    /// Report age beyond which a rescan is requested.
    #[must_use]
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.max_age_days))
    }
}

/// The per-user directory holding caches and the configuration file.
///
/// `~/.scan-tool`, or `.scan-tool` in the temporary directory when no home
/// directory can be determined.
#[must_use]
pub fn app_dir() -> PathBuf {
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(APP_DIR_NAME),
        None => {
            log::debug!("No home directory, using the temporary directory");
            std::env::temp_dir().join(APP_DIR_NAME)
        }
    }
}

#[must_use]
pub fn default_config_path() -> PathBuf {
    app_dir().join(CONFIG_FILE_NAME)
}
