/// Axum handlers for the gateway
use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::models::ModelList;
use crate::translate::{Endpoint, outbound_uri};
use crate::{AppState, PassthroughState, catalog, extract_model_from_request, proxy, sse};
use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use tracing::{debug, info, instrument, warn};

/// Translated mode: rewrite the request for the backend, authenticate it and relay the
/// response.
///
/// Also serves as the router fallback, so paths the route table does not spell exactly
/// (trailing slashes, wrong methods) are classified here and refused if unknown.
#[instrument(skip(state, req), fields(method = %req.method(), path = %req.uri().path()))]
pub async fn azure_proxy_handler<T: HttpClient>(
    State(state): State<AppState<T>>,
    req: Request,
) -> Result<Response, GatewayError> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let endpoint = Endpoint::classify(&method, &path).ok_or_else(|| {
        GatewayError::UnknownEndpoint {
            method: method.to_string(),
            path: path.clone(),
        }
    })?;

    if endpoint == Endpoint::Models {
        return Ok(models(State(state), req.headers().clone()).await?.into_response());
    }

    let (mut parts, mut body) = req.into_parts();

    // Only model-bound calls need the body read; everything else (file uploads included)
    // streams straight through.
    let model = if endpoint.is_deployment_scoped() {
        let body_bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| GatewayError::BadRequest(format!("failed to read request body: {e}")))?;
        debug!("Received request body of size: {}", body_bytes.len());
        let model = extract_model_from_request(&parts.headers, parts.uri.query(), &body_bytes);
        body = Body::from(body_bytes);
        model
    } else {
        None
    };

    info!("Received {:?} request for model {:?}", endpoint, model);

    let path_and_query = state
        .translator
        .translate(&endpoint, model.as_deref(), parts.uri.query())?;
    let credential = state.credentials.resolve(&parts.headers).await?;
    credential.apply(&mut parts.headers)?;
    parts.uri = outbound_uri(&state.backend.endpoint, &path_and_query)?;

    let response = proxy::forward(
        &state.http_client,
        Request::from_parts(parts, body),
        state.backend.upstream_timeout,
    )
    .await?;

    if response.status().is_client_error() || response.status().is_server_error() {
        warn!(
            "Backend request failed: {} {}, status: {}",
            method,
            path,
            response.status()
        );
    }

    Ok(sse::terminate_event_stream(response))
}

/// `GET /v1/models`: the deployed subset of the backend's model listing.
#[instrument(skip(state, headers))]
pub async fn models<T: HttpClient>(
    State(state): State<AppState<T>>,
    headers: HeaderMap,
) -> Result<Json<ModelList>, GatewayError> {
    let list = catalog::deployed_models(&state, &headers).await?;
    info!("Serving {} deployed models", list.data.len());
    Ok(Json(list))
}

/// Passthrough mode: same path, query, headers and body, different origin.
#[instrument(skip(state, req), fields(method = %req.method(), path = %req.uri().path()))]
pub async fn passthrough_handler<T: HttpClient>(
    State(state): State<PassthroughState<T>>,
    mut req: Request,
) -> Result<Response, GatewayError> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|v| v.as_str())
        .unwrap_or(req.uri().path())
        .to_owned();
    *req.uri_mut() = outbound_uri(&state.config.origin, &path_and_query)?;

    proxy::forward(&state.http_client, req, state.config.upstream_timeout).await
}
