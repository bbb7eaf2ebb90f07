//! Core data models for gametrics
//!
//! This module contains the request and value types shared by the cache and
//! the analytics client, plus the clients that talk to the Analytics API.

pub mod analytics;
pub mod auth;

pub use analytics::{AnalyticsApi, AnalyticsClient, AnalyticsError};
pub use auth::{AccessToken, AuthError, ServiceAccountAuth, SessionTokenCache, TokenCache};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Version tag mixed into every fingerprint. Bump it when the encoding changes.
const FINGERPRINT_VERSION: &str = "gametrics-request/v1";

/// Prefix the Analytics API expects on view ids and metric names
const API_PREFIX: &str = "ga:";

/// A single metric lookup: one view, one date range, one metric
///
/// Metric and view are stored without the `ga:` prefix; the API-facing
/// forms are produced by [`MetricRequest::api_view_id`] and
/// [`MetricRequest::api_metric`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricRequest {
    /// Analytics view (profile) identifier
    pub view_id: String,
    /// Start of the date range, as accepted by the API (`YYYY-MM-DD`, `today`, `7daysAgo`...)
    pub start_date: String,
    /// End of the date range
    pub end_date: String,
    /// Metric name, e.g. `pageviews`
    pub metric: String,
}

impl MetricRequest {
    pub fn new(
        view_id: impl Into<String>,
        start_date: impl Into<String>,
        end_date: impl Into<String>,
        metric: impl Into<String>,
    ) -> Self {
        Self {
            view_id: view_id.into(),
            start_date: start_date.into(),
            end_date: end_date.into(),
            metric: metric.into(),
        }
    }

    /// The view id in the form the API takes for `ids`
    pub fn api_view_id(&self) -> String {
        format!("{}{}", API_PREFIX, self.view_id)
    }

    /// The metric in the form the API takes for `metrics`
    pub fn api_metric(&self) -> String {
        format!("{}{}", API_PREFIX, self.metric)
    }

    /// Deterministic cache key for this request
    ///
    /// The ordered tuple (view, start, end, metric) is written as
    /// length-prefixed fields after a version tag, then hashed with SHA-256.
    /// The result is 64 lowercase hex characters.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION.as_bytes());
        for field in [
            &self.view_id,
            &self.start_date,
            &self.end_date,
            &self.metric,
        ] {
            hasher.update(format!("{}:", field.len()).as_bytes());
            hasher.update(field.as_bytes());
            hasher.update(b";");
        }
        hex::encode(hasher.finalize())
    }
}

/// A scalar metric value exactly as the API reported it
///
/// Values such as `"0"` are legitimate results; absence is always expressed
/// with `Option<MetricValue>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricValue(String);

impl MetricValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        Self(value)
    }
}
