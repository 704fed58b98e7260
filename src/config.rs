//! Configuration file support.
//!
//! A TOML file can preset any run option. Command line flags still win.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::cli::args::OutputFormat;
use crate::RunConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "CHECKRUN_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

/// Contents of a configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub label_filter: Option<String>,
    pub timeout_secs: Option<u64>,
    pub format: Option<OutputFormat>,
    pub output: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub tags: Option<Vec<String>>,
    pub handle_signals: Option<bool>,
    pub log_level: Option<String>,
    pub accepted_kernel_taints: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overwrite the fields of `config` this file sets.
    pub fn apply(self, config: &mut RunConfig) -> Result<(), ConfigError> {
        if let Some(filter) = self.label_filter {
            config.label_filter = filter;
        }
        if let Some(secs) = self.timeout_secs {
            if secs == 0 {
                return Err(ConfigError::ZeroTimeout);
            }
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if self.output.is_some() {
            config.output = self.output;
        }
        if self.catalog.is_some() {
            config.catalog = self.catalog;
        }
        if let Some(tags) = self.tags {
            config.tags = tags;
        }
        if let Some(handle_signals) = self.handle_signals {
            config.handle_signals = handle_signals;
        }
        if self.log_level.is_some() {
            config.log_level = self.log_level;
        }
        if let Some(modules) = self.accepted_kernel_taints {
            config.accepted_kernel_taints = modules;
        }
        Ok(())
    }
}

/// The explicit path if given, else the one named by `CHECKRUN_CONFIG`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
