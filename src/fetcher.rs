//! Metric fetcher: cache first, fetch on miss, stale value on failure
//!
//! Resolves one scalar metric for a date range. Fresh cache entries are
//! served directly; misses go to the Analytics API and are written back;
//! API failures fall back to the last cached value, however old.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheManager};
use crate::config::Config;
use crate::data::{AnalyticsApi, AnalyticsError, MetricRequest, MetricValue};

/// Earliest date the Analytics API accepts; used when no start date is given
pub const DEFAULT_START_DATE: &str = "2005-01-01";

/// End date used when none is given
pub const DEFAULT_END_DATE: &str = "today";

/// Why a metric could not be resolved
#[derive(Debug, Error)]
pub enum MetricError {
    /// The metric is not on the allow-list
    #[error("metric '{metric}' is not allowed")]
    Forbidden { metric: String },

    /// The API failed and nothing was cached for the request
    #[error("metric unavailable: {0}")]
    Unavailable(#[source] AnalyticsError),

    /// A fresh value could not be written to the cache
    #[error("failed to write cache: {0}")]
    CacheWrite(#[from] CacheError),
}

impl MetricError {
    /// True for errors that must abort the render instead of showing a placeholder
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CacheWrite(_))
    }
}

/// Resolves metrics through the cache and the Analytics API
#[derive(Debug)]
pub struct MetricFetcher<A> {
    config: Config,
    cache: CacheManager,
    api: A,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

impl<A: AnalyticsApi> MetricFetcher<A> {
    pub fn new(config: Config, cache: CacheManager, api: A) -> Self {
        Self { config, cache, api }
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &CacheManager {
        &self.cache
    }

    #[cfg(test)]
    pub(crate) fn api(&self) -> &A {
        &self.api
    }

    /// Builds the request for `metric`, filling in default dates
    pub fn request_for(
        &self,
        metric: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> MetricRequest {
        MetricRequest::new(
            self.config.view_id.as_str(),
            non_empty(start_date).unwrap_or(DEFAULT_START_DATE),
            non_empty(end_date).unwrap_or(DEFAULT_END_DATE),
            metric,
        )
    }

    /// Fetches a single metric value
    ///
    /// # Arguments
    /// * `metric` - Metric name without the `ga:` prefix
    /// * `start_date` - Start of the range; `None` or empty means `2005-01-01`
    /// * `end_date` - End of the range; `None` or empty means `today`
    ///
    /// # Returns
    /// * `Ok(MetricValue)` - Fresh cached value, newly fetched value, or stale value after an API failure
    /// * `Err(MetricError::Forbidden)` - Metric not allowed; nothing was read, written or fetched
    /// * `Err(MetricError::Unavailable)` - API failed and no value was ever cached
    /// * `Err(MetricError::CacheWrite)` - A fetched value could not be stored
    pub async fn fetch_metric(
        &self,
        metric: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<MetricValue, MetricError> {
        let request = self.request_for(metric, start_date, end_date);

        if !self.config.allowed_metrics.permits(metric) {
            debug!(metric, "Metric not on allow-list");
            return Err(MetricError::Forbidden {
                metric: metric.to_string(),
            });
        }

        if let Some(value) = self.cache.get(&request, false) {
            debug!(metric, fingerprint = %request.fingerprint(), "Cache hit");
            return Ok(value);
        }

        match self.fetch_from_api(&request).await {
            Ok(value) => {
                self.cache
                    .set(&request, &value, self.config.cache_ttl_seconds)?;
                Ok(value)
            }
            Err(e) => {
                warn!(metric, error = %e, "Analytics query failed");

                if let Some(stale) = self.cache.get(&request, true) {
                    info!(metric, "Serving stale cached value");
                    return Ok(stale);
                }
                Err(MetricError::Unavailable(e))
            }
        }
    }

    /// Queries the API and pulls the single data point from the first row
    async fn fetch_from_api(&self, request: &MetricRequest) -> Result<MetricValue, AnalyticsError> {
        let rows = self.api.query(request).await?;

        rows.into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .map(MetricValue::from)
            .ok_or(AnalyticsError::EmptyResponse)
    }
}
