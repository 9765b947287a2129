use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{default_config_dir, StoreError};

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to resolve config directory: {0}")]
    ConfigDir(#[from] StoreError),
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional `settings.toml` next to the state file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Settings {
    #[serde(default)]
    pub log_filter: Option<String>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Settings {
    pub fn load_default() -> Result<Self, SettingsError> {
        let path = default_config_dir()?.join("settings.toml");
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `SQLNAV_LOG` wins over the file, which wins over `info`.
    #[must_use]
    pub fn effective_log_filter(&self) -> String {
        env::var("SQLNAV_LOG")
            .ok()
            .filter(|filter| !filter.trim().is_empty())
            .or_else(|| self.log_filter.clone())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    }

    pub fn effective_log_file(&self) -> Result<PathBuf, SettingsError> {
        match &self.log_file {
            Some(path) => Ok(path.clone()),
            None => Ok(default_config_dir()?.join("sqlnav.log")),
        }
    }
}
