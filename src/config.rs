//! Configuration for gametrics
//!
//! Settings are read once from a TOML file and handed to the fetcher as a
//! read-only value.

use directories::ProjectDirs;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sentinel that permits every metric
pub const ALLOW_ALL: &str = "*";

/// Default time-to-live for cached values: one day
pub const DEFAULT_CACHE_TTL_SECONDS: i64 = 86_400;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required setting is missing or empty
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Which metric names may be fetched
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AllowedMetrics {
    /// Every metric is permitted (`"*"`)
    #[default]
    All,
    /// Only the listed metrics are permitted
    Only(BTreeSet<String>),
}

impl AllowedMetrics {
    pub fn only<I, S>(metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(metrics.into_iter().map(Into::into).collect())
    }

    /// True if `metric` may be fetched
    pub fn permits(&self, metric: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(metrics) => metrics.contains(metric),
        }
    }
}

impl<'de> Deserialize<'de> for AllowedMetrics {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Sentinel(String),
            List(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Sentinel(s) if s == ALLOW_ALL => Ok(Self::All),
            Raw::Sentinel(s) => Err(de::Error::custom(format!(
                "allowed_metrics must be \"{}\" or a list, got \"{}\"",
                ALLOW_ALL, s
            ))),
            Raw::List(list) => Ok(Self::only(list)),
        }
    }
}

/// Settings for fetching and caching metrics
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Metrics that may be requested
    #[serde(default)]
    pub allowed_metrics: AllowedMetrics,
    /// Analytics view (profile) id, without the `ga:` prefix
    #[serde(default)]
    pub view_id: String,
    /// Service account identity; defaults to the key file's `client_email`
    #[serde(default)]
    pub service_account_email: Option<String>,
    /// Path to the service account JSON key file
    #[serde(default)]
    pub credential_path: Option<PathBuf>,
    /// How long fetched values stay fresh
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: i64,
    /// Cache location; defaults to the XDG cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Analytics API base URL override
    #[serde(default)]
    pub api_base_url: Option<String>,
}

fn default_cache_ttl() -> i64 {
    DEFAULT_CACHE_TTL_SECONDS
}

impl Config {
    /// Creates a configuration for `view_id` with every other setting defaulted
    pub fn new(view_id: impl Into<String>) -> Self {
        Self {
            allowed_metrics: AllowedMetrics::All,
            view_id: view_id.into(),
            service_account_email: None,
            credential_path: None,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            cache_dir: None,
            api_base_url: None,
        }
    }

    /// Default config file location (`~/.config/gametrics/config.toml` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "gametrics").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parses configuration from TOML text and validates it
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Checks the settings every fetch needs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.view_id.trim().is_empty() {
            return Err(ConfigError::Missing("view_id"));
        }
        Ok(())
    }

    /// The key file path, required before anything is fetched live
    pub fn require_credential_path(&self) -> Result<&Path, ConfigError> {
        self.credential_path
            .as_deref()
            .ok_or(ConfigError::Missing("credential_path"))
    }
}
