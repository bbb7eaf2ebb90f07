//! Command-line interface for gametrics
//!
//! This module parses CLI arguments with clap and wires configuration, cache
//! and Analytics client into a ready-to-use parser function.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::CacheManager;
use crate::config::{Config, ConfigError};
use crate::data::auth::ServiceAccountKey;
use crate::data::{AnalyticsClient, AuthError, ServiceAccountAuth, SessionTokenCache};
use crate::fetcher::MetricFetcher;
use crate::markup::ParserFunction;

/// Error types for CLI setup
#[derive(Debug, Error)]
pub enum CliError {
    /// No --config given and no default location exists
    #[error("No config file given and no default config directory available; pass --config")]
    NoConfigPath,

    /// No cache_dir configured and no default location exists
    #[error("No cache_dir configured and no default cache directory available")]
    NoCacheDir,

    /// The configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The service account key could not be loaded
    #[error(transparent)]
    Credentials(#[from] AuthError),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// gametrics - Show a Google Analytics metric inline in wiki pages
#[derive(Parser, Debug)]
#[command(name = "gametrics")]
#[command(about = "Fetch and cache a single Google Analytics metric for wiki pages")]
#[command(version)]
pub struct Cli {
    /// Path to the TOML config file (defaults to the user config directory)
    #[arg(long, short, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print one metric, as the parser function would render it
    ///
    /// Examples:
    ///   gametrics fetch pageviews
    ///   gametrics fetch sessions 2020-01-01 today
    Fetch {
        /// Metric name without the "ga:" prefix
        metric: String,
        /// Start date (default 2005-01-01)
        start_date: Option<String>,
        /// End date (default today)
        end_date: Option<String>,
    },
    /// Expand every {{#googleanalyticsmetrics:...}} in a page body
    Render {
        /// Page file to read; stdin when omitted
        file: Option<PathBuf>,
    },
    /// Delete expired cache entries
    Purge,
}

impl Cli {
    /// Positional arguments for the parser function, if this is a fetch
    pub fn invocation_args(&self) -> Option<Vec<&str>> {
        match &self.command {
            Command::Fetch {
                metric,
                start_date,
                end_date,
            } => {
                let mut args = vec![metric.as_str()];
                args.extend(start_date.as_deref());
                if end_date.is_some() {
                    args.resize(2, "");
                    args.extend(end_date.as_deref());
                }
                Some(args)
            }
            _ => None,
        }
    }

    /// Loads the configuration named on the command line, or the default one
    pub fn load_config(&self) -> Result<Config, CliError> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => Config::default_path().ok_or(CliError::NoConfigPath)?,
        };
        Ok(Config::load(&path)?)
    }
}

/// Opens the cache configured by `config`
pub fn open_cache(config: &Config) -> Result<CacheManager, CliError> {
    match &config.cache_dir {
        Some(dir) => Ok(CacheManager::with_dir(dir.clone())),
        None => CacheManager::new().ok_or(CliError::NoCacheDir),
    }
}

/// Builds the parser function backed by the live Analytics API
pub fn build_parser_function(
    config: Config,
    cache: CacheManager,
) -> Result<ParserFunction<AnalyticsClient>, CliError> {
    let key = ServiceAccountKey::from_file(config.require_credential_path()?)?
        .with_email(config.service_account_email.as_deref());
    let auth = ServiceAccountAuth::new(key, Arc::new(SessionTokenCache::new()));

    let client = match &config.api_base_url {
        Some(url) => AnalyticsClient::with_base_url(auth, url.clone())?,
        None => AnalyticsClient::new(auth)?,
    };

    Ok(ParserFunction::new(MetricFetcher::new(config, cache, client)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_cli_parse_fetch_metric_only() {
        let cli = Cli::parse_from(["gametrics", "fetch", "pageviews"]);
        assert_eq!(
            cli.command,
            Command::Fetch {
                metric: "pageviews".to_string(),
                start_date: None,
                end_date: None,
            }
        );
        assert_eq!(cli.invocation_args(), Some(vec!["pageviews"]));
    }

    #[test]
    fn test_cli_parse_fetch_with_dates() {
        let cli = Cli::parse_from(["gametrics", "fetch", "sessions", "2020-01-01", "today"]);
        assert_eq!(
            cli.invocation_args(),
            Some(vec!["sessions", "2020-01-01", "today"])
        );
    }

    #[test]
    fn test_empty_start_date_keeps_end_date_position() {
        let cli = Cli::parse_from(["gametrics", "fetch", "sessions", "", "yesterday"]);
        assert_eq!(cli.invocation_args(), Some(vec!["sessions", "", "yesterday"]));
    }

    #[test]
    fn test_cli_parse_global_config() {
        let cli = Cli::parse_from(["gametrics", "purge", "--config", "/tmp/g.toml"]);
        assert_eq!(cli.command, Command::Purge);
        assert_eq!(cli.config.as_deref(), Some(Path::new("/tmp/g.toml")));
        assert!(cli.invocation_args().is_none());
    }

    #[test]
    fn test_cli_parse_render() {
        let cli = Cli::parse_from(["gametrics", "render", "page.wiki"]);
        assert_eq!(
            cli.command,
            Command::Render {
                file: Some(PathBuf::from("page.wiki"))
            }
        );
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["gametrics"]).is_err());
    }

    #[test]
    fn test_open_cache_uses_configured_dir() {
        let mut config = Config::new("1");
        config.cache_dir = Some(PathBuf::from("/var/cache/gametrics"));
        let cache = open_cache(&config).unwrap();
        assert_eq!(cache.dir(), Path::new("/var/cache/gametrics"));
    }

    #[test]
    fn test_build_requires_credentials() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = CacheManager::with_dir(temp_dir.path().to_path_buf());

        let result = build_parser_function(Config::new("1"), cache);

        assert!(matches!(
            result,
            Err(CliError::Config(ConfigError::Missing("credential_path")))
        ));
    }

    #[test]
    fn test_build_with_fixture_key() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = CacheManager::with_dir(temp_dir.path().to_path_buf());
        let mut config = Config::new("1");
        config.credential_path =
            Some(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/service_account.json"));

        assert!(build_parser_function(config, cache).is_ok());
    }
}
