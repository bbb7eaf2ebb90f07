//! gametrics library
//!
//! Resolves a single Google Analytics metric for wiki page markup, with a
//! disk cache that serves stale values when the API is unavailable.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod fetcher;
pub mod logging;
pub mod markup;

pub use cache::{CacheError, CacheManager};
pub use config::{AllowedMetrics, Config, ConfigError};
pub use data::{AnalyticsApi, AnalyticsClient, AnalyticsError, MetricRequest, MetricValue};
pub use fetcher::{MetricError, MetricFetcher};
pub use markup::ParserFunction;
