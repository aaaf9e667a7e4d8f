//! Backend credential resolution
//!
//! Decides how each outbound call is authenticated. Three policies exist, picked once from
//! [`AuthMode`]:
//! - forward the caller's own key (`api-key` header, else `Authorization: Bearer`), falling
//!   back to a configured key,
//! - a fixed backend key,
//! - an Entra ID bearer token, cached and renewed before it expires.
//!
//! The token cache is the only state shared between concurrent requests. It sits behind an
//! async mutex that is held across the refresh, so callers arriving mid-refresh wait for the
//! in-flight fetch instead of starting their own.
use crate::backend::{AuthMode, DEFAULT_UPSTREAM_TIMEOUT, EntraConfig, SecretString};
use crate::client::HttpClient;
use crate::errors::GatewayError;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{
    HeaderMap, HeaderName, HeaderValue, Method, Request,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The header the backend reads static keys from.
pub const API_KEY_HEADER: &str = "api-key";

/// Tokens are renewed this long before they expire.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// A credential ready to be attached to an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(SecretString),
    Bearer(SecretString),
}

impl Credential {
    /// Replace any credential headers on `headers` with this one.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), GatewayError> {
        headers.remove(AUTHORIZATION);
        headers.remove(API_KEY_HEADER);

        let (name, raw) = match self {
            Credential::ApiKey(key) => (
                HeaderName::from_static(API_KEY_HEADER),
                key.expose().to_owned(),
            ),
            Credential::Bearer(token) => (AUTHORIZATION, format!("Bearer {}", token.expose())),
        };
        let mut value = HeaderValue::from_str(&raw).map_err(|_| {
            GatewayError::AuthUnavailable(
                "credential contains characters that are not valid in a header".into(),
            )
        })?;
        value.set_sensitive(true);
        headers.insert(name, value);
        Ok(())
    }
}

/// The credential the caller presented, if any: `api-key` first, then a bearer token.
pub fn presented_credential(headers: &HeaderMap) -> Option<String> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(key) = api_key {
        return Some(key.to_owned());
    }

    let authorization = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match authorization.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
        _ => authorization,
    };
    (!token.is_empty()).then(|| token.to_owned())
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub secret: SecretString,
    pub expires_at: Instant,
}

/// Something that can mint a fresh bearer token.
#[async_trait]
pub trait TokenSource: std::fmt::Debug + Send + Sync {
    async fn fetch(&self) -> Result<AccessToken, GatewayError>;
}

/// Expiry-aware, single-flight cache in front of a [`TokenSource`].
#[derive(Debug)]
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    refresh_margin: Duration,
    fetch_timeout: Duration,
    current: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            fetch_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            current: Mutex::new(None),
        }
    }

    pub fn with_refresh_margin(mut self, refresh_margin: Duration) -> Self {
        self.refresh_margin = refresh_margin;
        self
    }

    /// Upper bound on one fetch. Other callers queue behind the lock for at most this long.
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub async fn token(&self) -> Result<SecretString, GatewayError> {
        let mut current = self.current.lock().await;

        if let Some(token) = current.as_ref()
            && token.expires_at > Instant::now() + self.refresh_margin
        {
            return Ok(token.secret.clone());
        }

        debug!("Refreshing backend bearer token");
        let fetched = tokio::time::timeout(self.fetch_timeout, self.source.fetch())
            .await
            .unwrap_or_else(|_| {
                Err(GatewayError::AuthUnavailable(format!(
                    "token endpoint did not answer within {:?}",
                    self.fetch_timeout
                )))
            });
        match fetched {
            Ok(fresh) => {
                let secret = fresh.secret.clone();
                *current = Some(fresh);
                Ok(secret)
            }
            Err(e) => match current.as_ref() {
                // Still valid, just inside the refresh margin.
                Some(token) if token.expires_at > Instant::now() => {
                    warn!(error = %e, "Token refresh failed, serving cached token");
                    Ok(token.secret.clone())
                }
                _ => Err(e),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Client-credentials grant against an Entra ID tenant.
#[derive(Debug)]
pub struct EntraTokenSource<T> {
    client: T,
    config: EntraConfig,
}

impl<T> EntraTokenSource<T> {
    pub fn new(client: T, config: EntraConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl<T: HttpClient + Send + Sync> TokenSource for EntraTokenSource<T> {
    async fn fetch(&self) -> Result<AccessToken, GatewayError> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("client_secret", self.config.client_secret.expose())
            .append_pair("scope", &self.config.scope)
            .finish();

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.config.token_url())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .map_err(|e| GatewayError::AuthUnavailable(format!("invalid token request: {e}")))?;

        let issued_at = Instant::now();
        let response = self.client.request(request).await.map_err(|e| {
            GatewayError::AuthUnavailable(format!("token endpoint unreachable: {e}"))
        })?;

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| {
                GatewayError::AuthUnavailable(format!("failed to read token response: {e}"))
            })?;
        if !status.is_success() {
            return Err(GatewayError::AuthUnavailable(format!(
                "token endpoint returned {status}"
            )));
        }

        let parsed: TokenResponse = serde_json::from_slice(&bytes).map_err(|e| {
            GatewayError::AuthUnavailable(format!("malformed token response: {e}"))
        })?;
        debug!("Obtained bearer token valid for {}s", parsed.expires_in);

        Ok(AccessToken {
            secret: parsed.access_token.into(),
            expires_at: issued_at + Duration::from_secs(parsed.expires_in),
        })
    }
}

#[derive(Debug, Clone)]
enum Policy {
    Inbound { fallback: Option<SecretString> },
    ApiKey(SecretString),
    Bearer(Arc<TokenCache>),
}

/// Produces the credential for each outbound call.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    policy: Policy,
}

impl CredentialResolver {
    /// Build the resolver for `mode`. `client` is only used to reach the token endpoint, and
    /// each token fetch is abandoned after `fetch_timeout`.
    pub fn from_auth_mode<T>(mode: &AuthMode, client: T, fetch_timeout: Duration) -> Self
    where
        T: HttpClient + Send + Sync + 'static,
    {
        match mode {
            AuthMode::Inbound { fallback_key } => Self::inbound(fallback_key.clone()),
            AuthMode::ApiKey(key) => Self::api_key(key.clone()),
            AuthMode::Entra(entra) => Self::bearer(
                TokenCache::new(Arc::new(EntraTokenSource::new(client, entra.clone())))
                    .with_fetch_timeout(fetch_timeout),
            ),
        }
    }

    pub fn inbound(fallback: Option<SecretString>) -> Self {
        Self {
            policy: Policy::Inbound { fallback },
        }
    }

    pub fn api_key(key: SecretString) -> Self {
        Self {
            policy: Policy::ApiKey(key),
        }
    }

    pub fn bearer(cache: TokenCache) -> Self {
        Self {
            policy: Policy::Bearer(Arc::new(cache)),
        }
    }

    pub async fn resolve(&self, inbound: &HeaderMap) -> Result<Credential, GatewayError> {
        match &self.policy {
            Policy::Inbound { fallback } => presented_credential(inbound)
                .map(SecretString::from)
                .or_else(|| fallback.clone())
                .map(Credential::ApiKey)
                .ok_or_else(|| {
                    GatewayError::AuthUnavailable(
                        "no api-key or bearer token supplied and no fallback key configured"
                            .into(),
                    )
                }),
            Policy::ApiKey(key) => Ok(Credential::ApiKey(key.clone())),
            Policy::Bearer(cache) => cache.token().await.map(Credential::Bearer),
        }
    }
}
