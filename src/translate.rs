//! Path and deployment translation
//!
//! Inbound requests use the OpenAI path layout (`/v1/chat/completions`, `/v1/files/{id}`, ...).
//! The backend instead scopes model-bound operations under a deployment
//! (`/openai/deployments/{deployment}/chat/completions`), keeps account-level operations on
//! flat paths (`/openai/files/{id}`), and requires an `api-version` query parameter on every
//! call. Every supported endpoint is enumerated in [`Endpoint`]; anything else is rejected
//! rather than guessed at.
use crate::backend::BackendConfig;
use crate::errors::GatewayError;
use axum::http::{Method, Uri};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use url::Url;

pub const API_VERSION_PARAM: &str = "api-version";

/// The logical endpoints the gateway knows how to translate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    ChatCompletions,
    Completions,
    Embeddings,
    ImageGenerations,
    AudioSpeech,
    AudioVoices,
    AudioTranscriptions,
    AudioTranslations,
    FineTunes,
    FineTune(String),
    FineTuneCancel(String),
    FineTuneEvents(String),
    Files,
    File(String),
    FileContent(String),
    Deployments,
    Deployment(String),
    ModelCapabilities(String),
    /// Only issued by the model catalog, never proxied directly.
    Models,
}

impl Endpoint {
    /// Identify the logical endpoint for an inbound method and path.
    pub fn classify(method: &Method, path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return None;
        }
        let endpoint = match (method, segments.as_slice()) {
            (&Method::POST, ["v1", "chat", "completions"]) => Endpoint::ChatCompletions,
            (&Method::POST, ["v1", "completions"]) => Endpoint::Completions,
            (&Method::POST, ["v1", "embeddings"]) => Endpoint::Embeddings,
            (&Method::POST, ["v1", "images", "generations"]) => Endpoint::ImageGenerations,
            (&Method::POST, ["v1", "audio", "speech"]) => Endpoint::AudioSpeech,
            (&Method::GET, ["v1", "audio", "voices"]) => Endpoint::AudioVoices,
            (&Method::POST, ["v1", "audio", "transcriptions"]) => Endpoint::AudioTranscriptions,
            (&Method::POST, ["v1", "audio", "translations"]) => Endpoint::AudioTranslations,
            (&Method::POST | &Method::GET, ["v1", "fine_tunes"]) => Endpoint::FineTunes,
            (&Method::GET, ["v1", "fine_tunes", ft]) => Endpoint::FineTune(ft.to_string()),
            (&Method::POST, ["v1", "fine_tunes", ft, "cancel"]) => {
                Endpoint::FineTuneCancel(ft.to_string())
            }
            (&Method::GET, ["v1", "fine_tunes", ft, "events"]) => {
                Endpoint::FineTuneEvents(ft.to_string())
            }
            (&Method::POST | &Method::GET, ["v1", "files"]) => Endpoint::Files,
            (&Method::GET | &Method::DELETE, ["v1", "files", file]) => {
                Endpoint::File(file.to_string())
            }
            (&Method::GET, ["v1", "files", file, "content"]) => {
                Endpoint::FileContent(file.to_string())
            }
            (&Method::GET, ["deployments"]) => Endpoint::Deployments,
            (&Method::GET, ["deployments", deployment]) => {
                Endpoint::Deployment(deployment.to_string())
            }
            (&Method::GET, ["v1", "models", model, "capabilities"]) => {
                Endpoint::ModelCapabilities(model.to_string())
            }
            (&Method::GET, ["v1", "models"]) => Endpoint::Models,
            _ => return None,
        };
        Some(endpoint)
    }

    /// Whether the backend addresses this operation through a deployment.
    pub fn is_deployment_scoped(&self) -> bool {
        matches!(self.shape(), Shape::Deployment(_))
    }

    fn shape(&self) -> Shape {
        match self {
            Endpoint::ChatCompletions => Shape::Deployment("chat/completions"),
            Endpoint::Completions => Shape::Deployment("completions"),
            Endpoint::Embeddings => Shape::Deployment("embeddings"),
            Endpoint::ImageGenerations => Shape::Deployment("images/generations"),
            Endpoint::AudioSpeech => Shape::Deployment("audio/speech"),
            Endpoint::AudioVoices => Shape::Deployment("audio/voices"),
            Endpoint::AudioTranscriptions => Shape::Deployment("audio/transcriptions"),
            Endpoint::AudioTranslations => Shape::Deployment("audio/translations"),
            Endpoint::FineTunes => Shape::Account("/openai/fine-tunes".to_owned()),
            Endpoint::FineTune(id) => Shape::Account(format!("/openai/fine-tunes/{id}")),
            Endpoint::FineTuneCancel(id) => {
                Shape::Account(format!("/openai/fine-tunes/{id}/cancel"))
            }
            Endpoint::FineTuneEvents(id) => {
                Shape::Account(format!("/openai/fine-tunes/{id}/events"))
            }
            Endpoint::Files => Shape::Account("/openai/files".to_owned()),
            Endpoint::File(id) => Shape::Account(format!("/openai/files/{id}")),
            Endpoint::FileContent(id) => Shape::Account(format!("/openai/files/{id}/content")),
            Endpoint::Deployments => Shape::Account("/openai/deployments".to_owned()),
            Endpoint::Deployment(id) => Shape::Account(format!("/openai/deployments/{id}")),
            Endpoint::ModelCapabilities(id) => {
                Shape::Account(format!("/openai/models/{id}/capabilities"))
            }
            Endpoint::Models => Shape::Account("/openai/models".to_owned()),
        }
    }
}

/// Where an endpoint lives on the backend.
enum Shape {
    /// Operation suffix below `/openai/deployments/{deployment}`.
    Deployment(&'static str),
    /// Flat account-level path.
    Account(String),
}

/// Maps a requested model to the deployment that serves it.
pub trait DeploymentResolver: Debug + Send + Sync {
    fn deployment_for(&self, model: &str) -> String;
}

/// Deployments named exactly after their model.
#[derive(Debug, Clone, Default)]
pub struct IdentityDeployments;

impl DeploymentResolver for IdentityDeployments {
    fn deployment_for(&self, model: &str) -> String {
        model.to_owned()
    }
}

/// An explicit model -> deployment table; unmapped models pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct MappedDeployments {
    mapping: HashMap<String, String>,
}

impl MappedDeployments {
    pub fn new(mapping: HashMap<String, String>) -> Self {
        Self { mapping }
    }
}

impl DeploymentResolver for MappedDeployments {
    fn deployment_for(&self, model: &str) -> String {
        self.mapping
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_owned())
    }
}

/// Rewrites logical endpoints into backend paths with the API version attached.
#[derive(Debug, Clone)]
pub struct Translator {
    api_version: String,
    deployments: Arc<dyn DeploymentResolver>,
}

impl Translator {
    pub fn new(api_version: impl Into<String>, deployments: Arc<dyn DeploymentResolver>) -> Self {
        Self {
            api_version: api_version.into(),
            deployments,
        }
    }

    pub fn from_backend(config: &BackendConfig) -> Self {
        let deployments: Arc<dyn DeploymentResolver> = if config.model_mapping.is_empty() {
            Arc::new(IdentityDeployments)
        } else {
            Arc::new(MappedDeployments::new(config.model_mapping.clone()))
        };
        Self::new(config.api_version.clone(), deployments)
    }

    /// Produce the backend path and query for `endpoint`.
    ///
    /// `model` is only consulted for deployment-scoped endpoints, where it is required.
    /// Inbound query parameters are kept, except `api-version`, which is replaced.
    pub fn translate(
        &self,
        endpoint: &Endpoint,
        model: Option<&str>,
        inbound_query: Option<&str>,
    ) -> Result<String, GatewayError> {
        let path = match endpoint.shape() {
            Shape::Deployment(operation) => {
                let model = model
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .ok_or(GatewayError::MissingModel)?;
                let deployment = self.deployments.deployment_for(model);
                if !is_valid_deployment_name(&deployment) {
                    return Err(GatewayError::BadRequest(format!(
                        "'{deployment}' is not a valid deployment name"
                    )));
                }
                format!("/openai/deployments/{deployment}/{operation}")
            }
            Shape::Account(path) => path,
        };

        // Inbound pairs are kept as raw text so their encoding survives untouched.
        let api_version = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(API_VERSION_PARAM, &self.api_version)
            .finish();
        let query: Vec<&str> = inbound_query
            .into_iter()
            .flat_map(|q| q.split('&'))
            .filter(|pair| !pair.is_empty() && !is_api_version_pair(pair))
            .chain(std::iter::once(api_version.as_str()))
            .collect();

        Ok(format!("{path}?{}", query.join("&")))
    }
}

fn is_api_version_pair(pair: &str) -> bool {
    url::form_urlencoded::parse(pair.as_bytes())
        .next()
        .is_some_and(|(key, _)| key == API_VERSION_PARAM)
}

fn is_valid_deployment_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Join a translated path and query onto the backend base URL.
pub fn outbound_uri(base: &Url, path_and_query: &str) -> Result<Uri, GatewayError> {
    let base = base.as_str().trim_end_matches('/');
    Uri::try_from(format!("{base}{path_and_query}"))
        .map_err(|e| GatewayError::BadRequest(format!("cannot build backend URI: {e}")))
}
