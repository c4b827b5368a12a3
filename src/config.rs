// ⚙️ Configuration - settings file, then environment, then CLI flags
//
// The settings file is optional JSON; every key has a default. Environment
// variables override the file, and the binaries apply their own flags last.

use crate::reconciliation::ReconcileStrategy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const ENV_DATABASE: &str = "DOCMGR_DB";
pub const ENV_STRATEGY: &str = "DOCMGR_STRATEGY";
pub const ENV_SERVER_ADDR: &str = "DOCMGR_SERVER_ADDR";
pub const ENV_LOG_FORMAT: &str = "DOCMGR_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}' (expected text or json)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub strategy: ReconcileStrategy,
    pub server_addr: String,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("documents.db"),
            strategy: ReconcileStrategy::default(),
            server_addr: "127.0.0.1:3000".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Settings file (if given) overridden by the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `lookup` (normally `std::env::var`). Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(db) = value(ENV_DATABASE) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(strategy) = value(ENV_STRATEGY) {
            self.strategy = strategy.parse().map_err(|message| ConfigError::InvalidValue {
                key: ENV_STRATEGY,
                message,
            })?;
        }
        if let Some(addr) = value(ENV_SERVER_ADDR) {
            self.server_addr = addr;
        }
        if let Some(format) = value(ENV_LOG_FORMAT) {
            self.log_format = format.parse().map_err(|message| ConfigError::InvalidValue {
                key: ENV_LOG_FORMAT,
                message,
            })?;
        }

        Ok(())
    }
}
