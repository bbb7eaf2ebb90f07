//! Google Analytics Core Reporting API client
//!
//! This module queries the `data/ga` endpoint for a single metric over a date
//! range and returns the raw result rows.

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::auth::{AuthError, ServiceAccountAuth};
use super::MetricRequest;

/// Base URL for the Analytics Core Reporting API
pub const ANALYTICS_BASE_URL: &str = "https://www.googleapis.com/analytics/v3";

/// Application name reported to the API
const APPLICATION_NAME: &str = "GoogleAnalyticsMetrics";

/// Errors that can occur when querying the Analytics API
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// No usable access token could be obtained
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("Analytics API returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response held no data point to extract
    #[error("Analytics API returned no rows")]
    EmptyResponse,
}

/// The query capability the metric fetcher depends on
///
/// Given a request, return the rows of result data or fail.
pub trait AnalyticsApi {
    fn query(
        &self,
        request: &MetricRequest,
    ) -> impl std::future::Future<Output = Result<Vec<Vec<String>>, AnalyticsError>> + Send;
}

/// Response body of `data/ga`; `rows` is omitted when there is no data
#[derive(Debug, Deserialize)]
struct GaDataResponse {
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

/// Client for the Analytics API authenticated as a service account
#[derive(Debug, Clone)]
pub struct AnalyticsClient {
    http_client: Client,
    auth: ServiceAccountAuth,
    /// Base URL for the API (allows override for testing)
    base_url: String,
}

impl AnalyticsClient {
    /// Creates a new AnalyticsClient against the public API
    pub fn new(auth: ServiceAccountAuth) -> Result<Self, reqwest::Error> {
        Self::with_base_url(auth, ANALYTICS_BASE_URL.to_string())
    }

    /// Creates a new AnalyticsClient with a custom base URL
    ///
    /// # Errors
    /// Returns the builder error if the HTTP client cannot be set up
    pub fn with_base_url(auth: ServiceAccountAuth, base_url: String) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().user_agent(APPLICATION_NAME).build()?;
        Ok(Self {
            http_client,
            auth,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl AnalyticsApi for AnalyticsClient {
    async fn query(&self, request: &MetricRequest) -> Result<Vec<Vec<String>>, AnalyticsError> {
        let token = self.auth.access_token().await?;
        let url = format!("{}/data/ga", self.base_url);

        debug!(
            view = %request.view_id,
            metric = %request.metric,
            start = %request.start_date,
            end = %request.end_date,
            "Querying Analytics API"
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("ids", request.api_view_id()),
                ("start-date", request.start_date.clone()),
                ("end-date", request.end_date.clone()),
                ("metrics", request.api_metric()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyticsError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: GaDataResponse = response.json().await?;
        Ok(data.rows)
    }
}
