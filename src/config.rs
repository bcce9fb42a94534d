//! Session configuration.
//!
//! A [`Config`] is assembled once per invocation from built-in defaults, an
//! optional TOML file and command-line overrides, validated, and then passed
//! by reference to every component. Nothing below the command layer reads
//! environment variables or configuration files on its own.

use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Package name, used for the configuration and data directories.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
/// Default configuration file name.
pub const CONFIG_NAME: &str = "config.toml";

pub const DEFAULT_RETENTION: usize = 7;
pub const DEFAULT_MIN_FREE_MB: u64 = 500;
pub const DEFAULT_PROGRESS_THRESHOLD_MB: u64 = 200;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_REMOTE_PORT: u16 = 22;

/// Immutable settings for one backup or restore session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Number of archives kept per destination.
    pub retention: usize,
    /// Minimum free space required at a local destination, in MB.
    pub min_free_mb: u64,
    /// Source size above which archiving reports progress, in MB.
    pub progress_threshold_mb: u64,
    /// Upper bound for the remote connectivity probe, in seconds.
    pub connect_timeout_secs: u64,
    /// SSH port used for remote destinations.
    pub remote_port: u16,
    /// Directory receiving the per-day session log files.
    pub log_dir: PathBuf,
    /// Where temporary archives are written before placement.
    pub staging_dir: Option<PathBuf>,
    /// Whether progress may be shown at all.
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            min_free_mb: DEFAULT_MIN_FREE_MB,
            progress_threshold_mb: DEFAULT_PROGRESS_THRESHOLD_MB,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            remote_port: DEFAULT_REMOTE_PORT,
            log_dir: default_log_dir(),
            staging_dir: None,
            progress: true,
        }
    }
}

/// Values given on the command line or through `RBACKUP_*` variables.
///
/// `None` keeps whatever the file or the defaults say.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub retention: Option<usize>,
    pub min_free_mb: Option<u64>,
    pub progress_threshold_mb: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub remote_port: Option<u16>,
    pub log_dir: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub no_progress: bool,
}

impl Config {
    /// Builds the session configuration.
    ///
    /// An explicit `file` must exist. Without one, the default config file is
    /// read when present and silently skipped otherwise.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let base = match file {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_file = config_file();
                if default_file.exists() {
                    Self::from_file(&default_file)?
                } else {
                    Self::default()
                }
            }
        };
        let config = base.with_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML configuration file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let toml_str = fs::read_to_string(path).map_err(|e| {
            BackupError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&toml_str)
            .map_err(|e| BackupError::config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Returns a copy with every set override applied.
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(retention) = overrides.retention {
            self.retention = retention;
        }
        if let Some(mb) = overrides.min_free_mb {
            self.min_free_mb = mb;
        }
        if let Some(mb) = overrides.progress_threshold_mb {
            self.progress_threshold_mb = mb;
        }
        if let Some(secs) = overrides.connect_timeout_secs {
            self.connect_timeout_secs = secs;
        }
        if let Some(port) = overrides.remote_port {
            self.remote_port = port;
        }
        if let Some(dir) = &overrides.log_dir {
            self.log_dir = dir.clone();
        }
        if let Some(dir) = &overrides.staging_dir {
            self.staging_dir = Some(dir.clone());
        }
        if overrides.no_progress {
            self.progress = false;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention == 0 {
            return Err(BackupError::config(
                "retention must keep at least 1 archive",
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(BackupError::config(
                "connect_timeout_secs must be at least 1",
            ));
        }
        if self.remote_port == 0 {
            return Err(BackupError::config("remote_port must not be 0"));
        }
        Ok(())
    }

    /// Log directory for reporting a configuration that failed to load.
    ///
    /// Takes the override, then the file's own setting when the file parses,
    /// then the default.
    pub fn fallback_log_dir(file: Option<&Path>, overrides: &Overrides) -> PathBuf {
        if let Some(dir) = &overrides.log_dir {
            return dir.clone();
        }
        let file = file.map(Path::to_path_buf).unwrap_or_else(config_file);
        Self::from_file(&file)
            .map(|config| config.log_dir)
            .unwrap_or_else(|_| default_log_dir())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Staging root for temporary archives.
    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Renders the configuration as TOML, as the `config` command prints it.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BackupError::config(e.to_string()))
    }
}

/// Returns the absolute path to the default configuration file.
pub fn config_file() -> PathBuf {
    config_dir().join(CONFIG_NAME)
}

/// Returns the configuration directory for the application, platform-specific.
#[cfg(not(target_os = "macos"))]
fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(PKG_NAME)
}

/// Returns the configuration directory for the application, platform-specific.
#[cfg(target_os = "macos")]
fn config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .unwrap_or_else(std::env::temp_dir)
        .join(PKG_NAME)
}

/// Default directory for session logs.
fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(PKG_NAME)
        .join("logs")
}
