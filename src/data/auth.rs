//! Service account authentication for the Analytics API
//!
//! Signs an RS256 JWT assertion with the service account's private key and
//! exchanges it for a bearer token. Issued tokens are kept in an injected
//! [`TokenCache`] and reused until they are about to expire.

use chrono::{DateTime, Duration, TimeDelta, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// Read-only Analytics scope requested for every token
pub const ANALYTICS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/analytics.readonly";

/// Token endpoint used when the key file does not name one
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth grant type for signed JWT assertions
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each assertion
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Tokens this close to expiry are refreshed instead of reused
const EXPIRY_SKEW_SECS: i64 = 30;

/// Errors that can occur while obtaining an access token
#[derive(Debug, Error)]
pub enum AuthError {
    /// The key file could not be read
    #[error("failed to read key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The key file is not a service account key
    #[error("invalid service account key: {0}")]
    InvalidKey(#[from] serde_json::Error),

    /// The private key could not sign the assertion
    #[error("failed to sign assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// HTTP request to the token endpoint failed
    #[error("token request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The token endpoint refused the assertion
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// The parts of a service account key file this crate uses
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Service account identity, used as the assertion issuer
    pub client_email: String,
    /// PEM-encoded RSA private key
    pub private_key: String,
    /// Where assertions are exchanged for tokens
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Loads a JSON key file as downloaded from the cloud console
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let content = fs::read_to_string(path).map_err(|source| AuthError::KeyFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Replaces the key's own identity with a configured one
    pub fn with_email(mut self, email: Option<&str>) -> Self {
        if let Some(email) = email.filter(|e| !e.is_empty()) {
            self.client_email = email.to_string();
        }
        self
    }
}

/// A bearer token and the instant it stops being accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// True once the token is within the refresh margin of its expiry
    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) >= self.expires_at
    }
}

/// `now + expires_in`, saturating instead of overflowing on absurd lifetimes
fn token_expiry(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    match TimeDelta::try_seconds(expires_in).and_then(|ttl| now.checked_add_signed(ttl)) {
        Some(at) => at,
        None if expires_in < 0 => now,
        None => DateTime::<Utc>::MAX_UTC,
    }
}

/// Storage for the access token of the current caller context
pub trait TokenCache: Send + Sync {
    fn get(&self) -> Option<AccessToken>;
    fn set(&self, token: AccessToken);
}

/// In-memory token cache scoped to one session
#[derive(Debug, Default)]
pub struct SessionTokenCache {
    token: Mutex<Option<AccessToken>>,
}

impl SessionTokenCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenCache for SessionTokenCache {
    fn get(&self) -> Option<AccessToken> {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set(&self, token: AccessToken) {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token);
    }
}

/// Claims of the signed assertion
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Obtains bearer tokens for a service account
#[derive(Clone)]
pub struct ServiceAccountAuth {
    http_client: Client,
    key: ServiceAccountKey,
    tokens: Arc<dyn TokenCache>,
}

impl std::fmt::Debug for ServiceAccountAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountAuth")
            .field("client_email", &self.key.client_email)
            .field("token_uri", &self.key.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountAuth {
    /// Creates an authenticator for `key`, caching tokens in `tokens`
    pub fn new(key: ServiceAccountKey, tokens: Arc<dyn TokenCache>) -> Self {
        Self::with_client(Client::new(), key, tokens)
    }

    /// Creates an authenticator with a custom HTTP client
    pub fn with_client(
        http_client: Client,
        key: ServiceAccountKey,
        tokens: Arc<dyn TokenCache>,
    ) -> Self {
        Self {
            http_client,
            key,
            tokens,
        }
    }

    /// Returns a usable bearer token, refreshing it when needed
    pub async fn access_token(&self) -> Result<String, AuthError> {
        if let Some(cached) = self.tokens.get() {
            if !cached.is_expired() {
                return Ok(cached.token);
            }
            debug!("Cached access token expired, refreshing");
        }

        let token = self.request_token().await?;
        self.tokens.set(token.clone());
        Ok(token.token)
    }

    /// Builds the signed JWT assertion for `now`
    fn assertion(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: ANALYTICS_READONLY_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)?)
    }

    /// Exchanges a fresh assertion for an access token
    async fn request_token(&self) -> Result<AccessToken, AuthError> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;

        let response = self
            .http_client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = response.json().await?;
        debug!(expires_in = body.expires_in, "Obtained access token");
        Ok(AccessToken {
            token: body.access_token,
            expires_at: token_expiry(now, body.expires_in),
        })
    }
}
