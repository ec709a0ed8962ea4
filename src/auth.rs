//! Credentials, and how they reach the downstream Hive client.
//!
//! Two things need a token: calls to the fleet API (which send a plain
//! `Authorization` header) and the Hive connection itself, which goes
//! through a gateway expecting `Proxy-Authorization`. The latter is either
//! rendered directly into the connection string, or left to an interceptor
//! in the downstream client, depending on [Authentication].

use async_trait::async_trait;
use http::header::{HeaderMap, HeaderValue, PROXY_AUTHORIZATION};
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{event, instrument, Level};

/// Session key the downstream client turns into a `Proxy-Authorization`
/// header.
pub const PROXY_AUTHORIZATION_SESSION_KEY: &str = "http.header.Proxy-Authorization";

/// Session key naming an interceptor the downstream client should run.
pub const INTERCEPTOR_SESSION_KEY: &str = "http.interceptor";

pub const BEARER_PREFIX: &str = "Bearer ";

// Connection strings can't carry a raw space.
const ENCODED_BEARER_PREFIX: &str = "Bearer%20";

/// If set, [default_credentials] uses this token instead of the metadata
/// server.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

pub const DEFAULT_METADATA_ENDPOINT: &str = "http://metadata.google.internal";
const METADATA_TOKEN_PATH: &str =
    "/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR: &str = "Google";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unable to refresh access token")]
    Refresh(#[source] anyhow::Error),

    #[error("No access token available")]
    NoToken,

    #[error("Access token cannot be used as a header value")]
    InvalidToken(#[from] http::header::InvalidHeaderValue),
}

/// A bearer token, and when it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// A token which never expires.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(value: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= Instant::now())
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A source of access tokens.
#[async_trait]
pub trait Credentials: Send + Sync {
    /// Fetches a new token, replacing the current one.
    async fn refresh(&self) -> Result<(), Error>;

    /// Returns the current token, if one has been fetched.
    fn access_token(&self) -> Option<AccessToken>;

    /// Refreshes only if there is no current token, or it has expired.
    async fn refresh_if_expired(&self) -> Result<(), Error> {
        match self.access_token() {
            Some(token) if !token.is_expired() => Ok(()),
            _ => self.refresh().await,
        }
    }
}

pub type SharedCredentials = Arc<dyn Credentials>;

/// Refreshes `credentials` if needed and returns the resulting token.
pub async fn current_token(credentials: &dyn Credentials) -> Result<AccessToken, Error> {
    credentials.refresh_if_expired().await?;
    credentials.access_token().ok_or(Error::NoToken)
}

/// Credentials with a fixed token, which never needs refreshing.
#[derive(Clone, Debug)]
pub struct StaticToken {
    token: AccessToken,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

#[async_trait]
impl Credentials for StaticToken {
    async fn refresh(&self) -> Result<(), Error> {
        Ok(())
    }

    fn access_token(&self) -> Option<AccessToken> {
        Some(self.token.clone())
    }
}

/// Configuration options for [MetadataServerCredentials].
#[derive(Clone, Debug)]
pub struct MetadataServerConfig {
    /// Base URL of the metadata server.
    ///
    /// Default: [DEFAULT_METADATA_ENDPOINT]
    pub endpoint: String,

    /// Treat tokens as expired this long before the server says they are.
    ///
    /// Default: 60 seconds
    pub refresh_margin: Duration,

    /// How long to wait for the metadata server.
    ///
    /// Default: 10 seconds
    pub request_timeout: Duration,
}

impl Default for MetadataServerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            refresh_margin: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl TokenResponse {
    fn into_token(self, now: Instant, refresh_margin: Duration) -> AccessToken {
        let lifetime = Duration::from_secs(self.expires_in).saturating_sub(refresh_margin);
        match now.checked_add(lifetime) {
            Some(expires_at) => AccessToken::expiring_at(self.access_token, expires_at),
            None => AccessToken::new(self.access_token),
        }
    }
}

/// Fetches service account tokens from the compute metadata server.
pub struct MetadataServerCredentials {
    client: reqwest::Client,
    config: MetadataServerConfig,
    token: Mutex<Option<AccessToken>>,
}

impl MetadataServerCredentials {
    pub fn new(config: MetadataServerConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Refresh(e.into()))?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Credentials for MetadataServerCredentials {
    #[instrument(skip(self), err, name = "MetadataServerCredentials::refresh")]
    async fn refresh(&self) -> Result<(), Error> {
        let url = format!("{}{METADATA_TOKEN_PATH}", self.config.endpoint);
        let response: TokenResponse = self
            .client
            .get(url)
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::Refresh(e.into()))?
            .json()
            .await
            .map_err(|e| Error::Refresh(e.into()))?;

        event!(
            Level::DEBUG,
            expires_in = response.expires_in,
            "Refreshed access token from metadata server"
        );
        let token = response.into_token(Instant::now(), self.config.refresh_margin);
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
        Ok(())
    }

    fn access_token(&self) -> Option<AccessToken> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Obtains the application's default credentials.
///
/// Uses the token in [ACCESS_TOKEN_ENV] if it is set, and the metadata server
/// otherwise. No token is fetched until the credentials are first used.
pub fn default_credentials() -> Result<SharedCredentials, Error> {
    match std::env::var(ACCESS_TOKEN_ENV) {
        Ok(token) if !token.is_empty() => {
            event!(Level::DEBUG, "Using access token from environment");
            Ok(Arc::new(StaticToken::new(token)))
        }
        _ => Ok(Arc::new(MetadataServerCredentials::new(
            MetadataServerConfig::default(),
        )?)),
    }
}

/// Sets `Proxy-Authorization` on outbound requests to the Hive gateway.
///
/// This is the interceptor named by [Authentication::Interceptor], for
/// downstream clients which run on top of this crate.
#[derive(Clone)]
pub struct ProxyAuthorization {
    credentials: SharedCredentials,
}

impl ProxyAuthorization {
    /// Creates the interceptor, fetching a token up front so that a
    /// misconfigured environment fails at connect time.
    pub async fn new(credentials: SharedCredentials) -> Result<Self, Error> {
        credentials.refresh().await?;
        Ok(Self { credentials })
    }

    /// Replaces any `Proxy-Authorization` header with a current token.
    pub async fn process(&self, headers: &mut HeaderMap) -> Result<(), Error> {
        let token = current_token(self.credentials.as_ref()).await?;
        let mut value = HeaderValue::from_str(&format!("{BEARER_PREFIX}{}", token.value()))?;
        value.set_sensitive(true);
        headers.remove(PROXY_AUTHORIZATION);
        headers.insert(PROXY_AUTHORIZATION, value);
        Ok(())
    }
}

/// How the rendered connection string authenticates to the Hive gateway.
#[derive(Clone, Default)]
pub enum Authentication {
    /// No authentication parameters are rendered.
    #[default]
    None,

    /// Render a live bearer token into the connection string.
    BearerToken(SharedCredentials),

    /// Render the name of an interceptor which the downstream client invokes
    /// to attach a token at connect time.
    Interceptor(String),
}

impl Authentication {
    /// Session parameters to render after the driver-managed ones.
    pub async fn session_params(&self) -> Result<Vec<(String, String)>, Error> {
        let ssl = ("ssl".to_string(), "true".to_string());
        match self {
            Authentication::None => Ok(vec![]),
            Authentication::BearerToken(credentials) => {
                let token = current_token(credentials.as_ref()).await?;
                Ok(vec![
                    ssl,
                    (
                        PROXY_AUTHORIZATION_SESSION_KEY.to_string(),
                        format!("{ENCODED_BEARER_PREFIX}{}", token.value()),
                    ),
                ])
            }
            Authentication::Interceptor(name) => Ok(vec![
                ssl,
                (INTERCEPTOR_SESSION_KEY.to_string(), name.clone()),
            ]),
        }
    }
}

impl std::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authentication::None => f.write_str("None"),
            Authentication::BearerToken(_) => f.write_str("BearerToken(..)"),
            Authentication::Interceptor(name) => {
                f.debug_tuple("Interceptor").field(name).finish()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Hands out "token-<n>" on the n'th refresh, each valid for `lifetime`.
    struct CountingCredentials {
        refreshes: AtomicUsize,
        lifetime: Duration,
        token: Mutex<Option<AccessToken>>,
    }

    impl CountingCredentials {
        fn new(lifetime: Duration) -> Self {
            Self {
                refreshes: AtomicUsize::new(0),
                lifetime,
                token: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Credentials for CountingCredentials {
        async fn refresh(&self) -> Result<(), Error> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            *self.token.lock().unwrap() = Some(AccessToken::expiring_at(
                format!("token-{n}"),
                Instant::now() + self.lifetime,
            ));
            Ok(())
        }

        fn access_token(&self) -> Option<AccessToken> {
            self.token.lock().unwrap().clone()
        }
    }

    struct BrokenCredentials;

    #[async_trait]
    impl Credentials for BrokenCredentials {
        async fn refresh(&self) -> Result<(), Error> {
            Err(Error::Refresh(anyhow::anyhow!("no credentials here")))
        }

        fn access_token(&self) -> Option<AccessToken> {
            None
        }
    }

    #[tokio::test]
    async fn refresh_if_expired_reuses_live_tokens() {
        let credentials = CountingCredentials::new(Duration::from_secs(3600));
        assert_eq!(current_token(&credentials).await.unwrap().value(), "token-1");
        assert_eq!(current_token(&credentials).await.unwrap().value(), "token-1");
        assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_if_expired_replaces_expired_tokens() {
        let credentials = CountingCredentials::new(Duration::ZERO);
        assert_eq!(current_token(&credentials).await.unwrap().value(), "token-1");
        assert_eq!(current_token(&credentials).await.unwrap().value(), "token-2");
    }

    #[tokio::test]
    async fn proxy_authorization_replaces_existing_header() {
        let credentials: SharedCredentials = Arc::new(StaticToken::new("abc"));
        let interceptor = ProxyAuthorization::new(credentials).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.append(PROXY_AUTHORIZATION, HeaderValue::from_static("Bearer stale"));
        headers.append(PROXY_AUTHORIZATION, HeaderValue::from_static("Bearer staler"));
        interceptor.process(&mut headers).await.unwrap();

        let values: Vec<_> = headers.get_all(PROXY_AUTHORIZATION).iter().collect();
        assert_eq!(values, vec!["Bearer abc"]);
        assert!(values[0].is_sensitive());
    }

    #[tokio::test]
    async fn proxy_authorization_surfaces_refresh_failures() {
        let credentials: SharedCredentials = Arc::new(BrokenCredentials);
        assert!(matches!(
            ProxyAuthorization::new(credentials).await,
            Err(Error::Refresh(_))
        ));
    }

    #[tokio::test]
    async fn proxy_authorization_rejects_unprintable_tokens() {
        let credentials: SharedCredentials = Arc::new(StaticToken::new("bad\ntoken"));
        let interceptor = ProxyAuthorization::new(credentials).await.unwrap();
        let mut headers = HeaderMap::new();
        assert!(matches!(
            interceptor.process(&mut headers).await,
            Err(Error::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn authentication_session_params() {
        assert!(Authentication::None.session_params().await.unwrap().is_empty());

        let bearer = Authentication::BearerToken(Arc::new(StaticToken::new("tok")));
        assert_eq!(
            bearer.session_params().await.unwrap(),
            vec![
                ("ssl".to_string(), "true".to_string()),
                (
                    "http.header.Proxy-Authorization".to_string(),
                    "Bearer%20tok".to_string()
                ),
            ]
        );

        let interceptor = Authentication::Interceptor("ProxyAuthorization".to_string());
        assert_eq!(
            interceptor.session_params().await.unwrap(),
            vec![
                ("ssl".to_string(), "true".to_string()),
                (
                    "http.interceptor".to_string(),
                    "ProxyAuthorization".to_string()
                ),
            ]
        );
        assert!(!format!("{bearer:?}").contains("tok"));
    }

    #[test]
    fn token_response_expiry_respects_margin() {
        let now = Instant::now();
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "ya29.abc",
            "expires_in": 3599,
            "token_type": "Bearer"
        }))
        .unwrap();
        let token = response.into_token(now, Duration::from_secs(60));
        assert_eq!(token.value(), "ya29.abc");
        assert_eq!(token.expires_at(), Some(now + Duration::from_secs(3539)));

        let short: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "short",
            "expires_in": 10
        }))
        .unwrap();
        assert_eq!(
            short.into_token(now, Duration::from_secs(60)).expires_at(),
            Some(now)
        );
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("very-secret");
        assert!(!format!("{token:?}").contains("very-secret"));
    }
}
