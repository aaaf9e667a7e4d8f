//! Configuration parsing and validation for the gateway binary
//!
//! Every option can be given on the command line or through the environment. `validate`
//! turns the raw flags into the immutable [`ProxyMode`] the library is built from, so a
//! misconfigured gateway refuses to start instead of failing on its first request.
use anyhow::{Context, anyhow};
use azure_openai_proxy::backend::{
    AuthMode, BackendConfig, DEFAULT_API_VERSION, DEFAULT_AUTHORITY_HOST, DEFAULT_TOKEN_SCOPE,
    EntraConfig, PassthroughConfig, ProxyMode, SecretString, parse_model_mapping,
};
use azure_openai_proxy::client::PoolSettings;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Translate OpenAI-style requests for an Azure OpenAI resource.
    Azure,
    /// Forward everything verbatim to an OpenAI-compatible origin.
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthKind {
    /// Forward the caller's key, falling back to `--token`.
    Inbound,
    /// Always use `--api-key`.
    ApiKey,
    /// Client-credentials bearer token from Entra ID.
    Entra,
}

#[derive(Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The address on which the gateway will listen.
    #[arg(long, env = "AZURE_OPENAI_PROXY_ADDRESS", default_value = "0.0.0.0:11437")]
    pub address: SocketAddr,

    #[arg(long, env = "AZURE_OPENAI_PROXY_MODE", value_enum, default_value_t = Mode::Azure)]
    pub mode: Mode,

    /// Base URL of the Azure OpenAI resource.
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    pub endpoint: Option<Url>,

    #[arg(long, env = "AZURE_OPENAI_APIVERSION", default_value = DEFAULT_API_VERSION)]
    pub api_version: String,

    /// Comma separated `model=deployment` pairs.
    #[arg(long, env = "AZURE_OPENAI_MODEL_MAPPER", default_value = "")]
    pub model_mapper: String,

    #[arg(long, env = "AZURE_OPENAI_AUTH_MODE", value_enum, default_value_t = AuthKind::Inbound)]
    pub auth_mode: AuthKind,

    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Key used when the caller presents none (inbound auth mode only).
    #[arg(long, env = "AZURE_OPENAI_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, env = "AZURE_TENANT_ID")]
    pub tenant_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    #[arg(long, env = "AZURE_AUTHORITY_HOST", default_value = DEFAULT_AUTHORITY_HOST)]
    pub authority_host: Url,

    #[arg(long, env = "AZURE_OPENAI_TOKEN_SCOPE", default_value = DEFAULT_TOKEN_SCOPE)]
    pub token_scope: String,

    /// Origin used in passthrough (`openai`) mode.
    #[arg(long, env = "OPENAI_API_ENDPOINT", default_value = "https://api.openai.com")]
    pub openai_endpoint: Url,

    /// How long (in seconds) to wait for the backend to start responding.
    #[arg(long, env = "AZURE_OPENAI_PROXY_UPSTREAM_TIMEOUT", default_value_t = 300)]
    pub upstream_timeout_secs: u64,

    /// Maximum number of idle HTTP connections to keep alive per upstream host.
    #[arg(long, default_value_t = 100)]
    pub pool_max_idle_per_host: usize,

    /// How long (in seconds) to keep idle HTTP connections alive.
    #[arg(long, default_value_t = 90)]
    pub pool_idle_timeout_secs: u64,

    /// Whether to enable the metrics endpoint.
    #[arg(short = 'm', long, default_value_t = true, action = clap::ArgAction::Set)]
    pub metrics: bool,

    /// The port on which the metrics server will listen.
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// The prefix to use for metrics.
    #[arg(long, default_value = "azure_openai_proxy")]
    pub metrics_prefix: String,
}

// Secrets stay out of the startup log.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "[redacted]");
        f.debug_struct("Config")
            .field("address", &self.address)
            .field("mode", &self.mode)
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("model_mapper", &self.model_mapper)
            .field("auth_mode", &self.auth_mode)
            .field("api_key", &redacted(&self.api_key))
            .field("token", &redacted(&self.token))
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(&self.client_secret))
            .field("authority_host", &self.authority_host)
            .field("token_scope", &self.token_scope)
            .field("openai_endpoint", &self.openai_endpoint)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("pool_idle_timeout_secs", &self.pool_idle_timeout_secs)
            .field("metrics", &self.metrics)
            .field("metrics_port", &self.metrics_port)
            .field("metrics_prefix", &self.metrics_prefix)
            .finish()
    }
}

impl Config {
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_idle_per_host: self.pool_max_idle_per_host,
            idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
        }
    }

    /// Check the flags for the chosen mode and build the gateway's mode from them.
    pub fn validate(&self) -> Result<ProxyMode, anyhow::Error> {
        let upstream_timeout = Duration::from_secs(self.upstream_timeout_secs);
        if upstream_timeout.is_zero() {
            return Err(anyhow!("--upstream-timeout-secs must be greater than zero"));
        }

        if self.mode == Mode::Openai {
            return Ok(ProxyMode::Passthrough(
                PassthroughConfig::builder()
                    .origin(self.openai_endpoint.clone())
                    .upstream_timeout(upstream_timeout)
                    .build(),
            ));
        }

        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| anyhow!("AZURE_OPENAI_ENDPOINT must be set in azure mode"))?;
        if endpoint.cannot_be_a_base() || endpoint.host_str().is_none() {
            return Err(anyhow!("AZURE_OPENAI_ENDPOINT '{endpoint}' is not a base URL"));
        }
        if self.api_version.trim().is_empty() {
            return Err(anyhow!("AZURE_OPENAI_APIVERSION must not be empty"));
        }

        let model_mapping = parse_model_mapping(&self.model_mapper)
            .context("Invalid AZURE_OPENAI_MODEL_MAPPER")?;

        let auth = match self.auth_mode {
            AuthKind::Inbound => AuthMode::Inbound {
                fallback_key: self.token.clone().map(SecretString::from),
            },
            AuthKind::ApiKey => AuthMode::ApiKey(
                self.api_key
                    .clone()
                    .map(SecretString::from)
                    .ok_or_else(|| anyhow!("AZURE_OPENAI_API_KEY must be set for api-key auth"))?,
            ),
            AuthKind::Entra => {
                let required = |value: &Option<String>, name: &str| {
                    value
                        .clone()
                        .ok_or_else(|| anyhow!("{name} must be set for entra auth"))
                };
                AuthMode::Entra(
                    EntraConfig::builder()
                        .authority(self.authority_host.clone())
                        .tenant_id(required(&self.tenant_id, "AZURE_TENANT_ID")?)
                        .client_id(required(&self.client_id, "AZURE_CLIENT_ID")?)
                        .client_secret(required(&self.client_secret, "AZURE_CLIENT_SECRET")?)
                        .scope(self.token_scope.clone())
                        .build(),
                )
            }
        };

        Ok(ProxyMode::Translated(
            BackendConfig::builder()
                .endpoint(endpoint)
                .api_version(self.api_version.clone())
                .auth(auth)
                .model_mapping(model_mapping)
                .upstream_timeout(upstream_timeout)
                .build(),
        ))
    }
}
