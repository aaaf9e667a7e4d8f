//! An OpenAI-compatible gateway in front of Azure OpenAI
//!
//! This library accepts requests shaped like the OpenAI HTTP API and forwards them to an Azure
//! OpenAI resource: paths are rewritten to deployment-scoped backend paths, the API version is
//! attached, and the backend credential is injected. Responses, streamed ones included, are
//! relayed as they arrive. `/v1/models` is synthesised from the backend's deployment and model
//! listings. A passthrough mode forwards everything verbatim to an OpenAI-shaped origin instead.

use axum::Router;
use axum::http::HeaderMap;
use axum::middleware;
use axum::routing::{any, get, post};
use axum_prometheus::{
    GenericMetricLayer, Handle, PrometheusMetricLayerBuilder,
    metrics_exporter_prometheus::PrometheusHandle,
};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{info, instrument};

pub mod auth;
pub mod backend;
pub mod catalog;
pub mod client;
pub mod cors;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod proxy;
pub mod sse;
pub mod translate;

use auth::CredentialResolver;
use backend::{BackendConfig, PassthroughConfig, ProxyMode};
use client::{HttpClient, HyperClient, PoolSettings};
use handlers::{azure_proxy_handler, models as models_handler, passthrough_handler};
use models::{ExtractedModel, model_from_multipart};
use translate::Translator;

const MODEL_OVERRIDE_HEADER: &str = "model-override";

/// State for translated mode: the HTTP client plus everything derived from the backend config.
#[derive(Clone, Debug)]
pub struct AppState<T: HttpClient> {
    pub http_client: T,
    pub backend: Arc<BackendConfig>,
    pub translator: Translator,
    pub credentials: CredentialResolver,
}

impl AppState<HyperClient> {
    /// Create a new AppState with the default Hyper client
    pub fn new(backend: BackendConfig, pool: PoolSettings) -> Self {
        Self::with_client(backend, client::create_hyper_client(pool))
    }
}

impl<T: HttpClient + Clone + Send + Sync + 'static> AppState<T> {
    /// Create a new AppState with a custom HTTP client (useful for testing)
    pub fn with_client(backend: BackendConfig, http_client: T) -> Self {
        let translator = Translator::from_backend(&backend);
        let credentials = CredentialResolver::from_auth_mode(
            &backend.auth,
            http_client.clone(),
            backend.upstream_timeout,
        );
        Self {
            http_client,
            backend: Arc::new(backend),
            translator,
            credentials,
        }
    }
}

/// State for passthrough mode.
#[derive(Clone, Debug)]
pub struct PassthroughState<T: HttpClient> {
    pub http_client: T,
    pub config: Arc<PassthroughConfig>,
}

impl<T: HttpClient> PassthroughState<T> {
    pub fn with_client(config: PassthroughConfig, http_client: T) -> Self {
        Self {
            http_client,
            config: Arc::new(config),
        }
    }
}

/// Extract the model name from a request
///
/// Order of precedence:
/// 1. the `model-override` header
/// 2. the `model` field of a JSON body
/// 3. the `model` field of a `multipart/form-data` body
/// 4. a `model` query parameter
pub fn extract_model_from_request(
    headers: &HeaderMap,
    query: Option<&str>,
    body_bytes: &[u8],
) -> Option<String> {
    if let Some(header_value) = headers.get(MODEL_OVERRIDE_HEADER) {
        return header_value.to_str().ok().map(str::to_owned);
    }

    if let Ok(extracted) = serde_json::from_slice::<ExtractedModel>(body_bytes) {
        return Some(extracted.model.into_owned());
    }

    let multipart = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.starts_with("multipart/form-data"))
        .and_then(|content_type| model_from_multipart(content_type, body_bytes));
    if multipart.is_some() {
        return multipart;
    }

    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == "model")
            .map(|(_, value)| value.into_owned())
    })
}

/// Build the router for translated mode
///
/// Every supported endpoint is bound explicitly; `/v1/models` is answered by the model catalog
/// and everything else by the translating proxy. `OPTIONS` on any path gets the CORS
/// preflight answer.
#[instrument(skip(state))]
pub fn build_router<T: HttpClient + Clone + Send + Sync + 'static>(state: AppState<T>) -> Router {
    info!("Building translated router");
    Router::new()
        .route("/v1/models", get(models_handler))
        .route("/v1/chat/completions", post(azure_proxy_handler))
        .route("/v1/completions", post(azure_proxy_handler))
        .route("/v1/embeddings", post(azure_proxy_handler))
        .route("/v1/images/generations", post(azure_proxy_handler))
        .route("/v1/audio/speech", post(azure_proxy_handler))
        .route("/v1/audio/voices", get(azure_proxy_handler))
        .route("/v1/audio/transcriptions", post(azure_proxy_handler))
        .route("/v1/audio/translations", post(azure_proxy_handler))
        .route(
            "/v1/fine_tunes",
            post(azure_proxy_handler).get(azure_proxy_handler),
        )
        .route("/v1/fine_tunes/{fine_tune_id}", get(azure_proxy_handler))
        .route(
            "/v1/fine_tunes/{fine_tune_id}/cancel",
            post(azure_proxy_handler),
        )
        .route(
            "/v1/fine_tunes/{fine_tune_id}/events",
            get(azure_proxy_handler),
        )
        .route("/v1/files", post(azure_proxy_handler).get(azure_proxy_handler))
        .route(
            "/v1/files/{file_id}",
            get(azure_proxy_handler).delete(azure_proxy_handler),
        )
        .route("/v1/files/{file_id}/content", get(azure_proxy_handler))
        .route("/deployments", get(azure_proxy_handler))
        .route("/deployments/{deployment_id}", get(azure_proxy_handler))
        .route(
            "/v1/models/{model_id}/capabilities",
            get(azure_proxy_handler),
        )
        .method_not_allowed_fallback(azure_proxy_handler)
        .fallback(azure_proxy_handler)
        .layer(middleware::from_fn(cors::preflight))
        .with_state(state)
}

/// Build the router for passthrough mode: every path and method goes to the origin verbatim.
#[instrument(skip(state))]
pub fn build_passthrough_router<T: HttpClient + Clone + Send + Sync + 'static>(
    state: PassthroughState<T>,
) -> Router {
    info!("Building passthrough router");
    Router::new()
        .route("/", any(passthrough_handler))
        .route("/{*path}", any(passthrough_handler))
        .with_state(state)
}

/// Bind the routes for `mode`, which is fixed for the lifetime of the router.
pub fn build_gateway_router<T: HttpClient + Clone + Send + Sync + 'static>(
    mode: ProxyMode,
    http_client: T,
) -> Router {
    match mode {
        ProxyMode::Translated(backend) => {
            build_router(AppState::with_client(backend, http_client))
        }
        ProxyMode::Passthrough(config) => {
            build_passthrough_router(PassthroughState::with_client(config, http_client))
        }
    }
}

/// Builds a router for the metrics endpoint.
#[instrument(skip(handle))]
pub fn build_metrics_router(handle: PrometheusHandle) -> Router {
    info!("Building metrics router");
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

type MetricsLayerAndHandle = (
    GenericMetricLayer<'static, PrometheusHandle, Handle>,
    PrometheusHandle,
);

/// Builds a layer and handle for prometheus metrics collection.
///
/// # Parameters
/// - `prefix`: A string prefix for the metrics, which can be either a string literal or an
///   owned string.
pub fn build_metrics_layer_and_handle(
    prefix: impl Into<Cow<'static, str>>,
) -> MetricsLayerAndHandle {
    info!("Building metrics layer");
    PrometheusMetricLayerBuilder::new()
        .with_prefix(prefix)
        .enable_response_body_size(true)
        .with_endpoint_label_type(axum_prometheus::EndpointLabel::Exact)
        .with_default_metrics()
        .build_pair()
}
