//! Immutable backend configuration
//!
//! Built once at startup (see the binary's `config` module) and shared by `Arc` with the
//! dispatcher, the credential resolver and the translator. Nothing in here changes for the
//! lifetime of the process.
use crate::errors::GatewayError;
use bon::Builder;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_VERSION: &str = "2024-06-01";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_TOKEN_SCOPE: &str = "https://cognitiveservices.azure.com/.default";
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// A credential value that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([redacted])")
    }
}

/// Client-credentials parameters for an Entra ID (Azure AD) token endpoint.
#[derive(Debug, Clone, Builder)]
pub struct EntraConfig {
    #[builder(default = default_authority())]
    pub authority: Url,
    #[builder(into)]
    pub tenant_id: String,
    #[builder(into)]
    pub client_id: String,
    #[builder(into)]
    pub client_secret: SecretString,
    #[builder(into, default = DEFAULT_TOKEN_SCOPE.to_string())]
    pub scope: String,
}

fn default_authority() -> Url {
    Url::parse(DEFAULT_AUTHORITY_HOST).expect("default authority host is a valid URL")
}

impl EntraConfig {
    /// The OAuth2 v2.0 token endpoint for the configured tenant.
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.as_str().trim_end_matches('/'),
            self.tenant_id
        )
    }
}

/// How outbound calls to the backend are authenticated.
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// Forward whatever key the caller presented, falling back to a configured one.
    Inbound { fallback_key: Option<SecretString> },
    /// Always send the same backend key, ignoring the caller's credential.
    ApiKey(SecretString),
    /// Send a bearer token obtained (and renewed) from Entra ID.
    Entra(EntraConfig),
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::Inbound { fallback_key: None }
    }
}

/// Everything translated mode needs to know about the backend.
#[derive(Debug, Clone, Builder)]
pub struct BackendConfig {
    /// Base URL of the backend resource, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: Url,
    #[builder(into, default = DEFAULT_API_VERSION.to_string())]
    pub api_version: String,
    #[builder(default)]
    pub auth: AuthMode,
    /// Explicit model -> deployment names. Models missing from the map are used as-is.
    #[builder(default)]
    pub model_mapping: HashMap<String, String>,
    /// Upper bound on the wait for backend response headers.
    #[builder(default = DEFAULT_UPSTREAM_TIMEOUT)]
    pub upstream_timeout: Duration,
}

/// Where passthrough mode sends requests.
#[derive(Debug, Clone, Builder)]
pub struct PassthroughConfig {
    pub origin: Url,
    #[builder(default = DEFAULT_UPSTREAM_TIMEOUT)]
    pub upstream_timeout: Duration,
}

/// The operating mode, chosen once at startup.
#[derive(Debug, Clone)]
pub enum ProxyMode {
    Translated(BackendConfig),
    Passthrough(PassthroughConfig),
}

/// Parse a `model=deployment,model=deployment` list.
pub fn parse_model_mapping(raw: &str) -> Result<HashMap<String, String>, GatewayError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (model, deployment) = entry
                .split_once('=')
                .map(|(model, deployment)| (model.trim(), deployment.trim()))
                .filter(|(model, deployment)| !model.is_empty() && !deployment.is_empty())
                .ok_or_else(|| {
                    GatewayError::Config(format!(
                        "model mapping entry '{entry}' is not of the form model=deployment"
                    ))
                })?;
            Ok((model.to_owned(), deployment.to_owned()))
        })
        .collect()
}
