//! Model catalog for `GET /v1/models`
//!
//! The backend lists deployments and model metadata separately, and only the model listing
//! carries capabilities and lifecycle data. The catalog fetches both, keeps the models that
//! at least one deployment serves, and preserves the model listing's order. Either call
//! failing fails the whole listing; a partial catalog is never returned.
use crate::AppState;
use crate::auth::Credential;
use crate::client::HttpClient;
use crate::errors::GatewayError;
use crate::models::{Deployment, Listing, Model, ModelList};
use crate::proxy;
use crate::translate::{Endpoint, outbound_uri};
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use tracing::{debug, warn};

const DEPLOYMENTS: &str = "deployments";
const MODELS: &str = "models";

/// The models that are both known to the backend and deployed, in backend order.
pub async fn deployed_models<T: HttpClient>(
    state: &AppState<T>,
    inbound: &HeaderMap,
) -> Result<ModelList, GatewayError> {
    let credential = state.credentials.resolve(inbound).await?;

    let deployments: Vec<Deployment> = decode_entries(
        DEPLOYMENTS,
        fetch_listing(state, &credential, Endpoint::Deployments, DEPLOYMENTS).await?,
    );
    let models: Vec<Model> = decode_entries(
        MODELS,
        fetch_listing(state, &credential, Endpoint::Models, MODELS).await?,
    );

    let deployed = keep_deployed(&deployments, models);
    debug!(
        "{} deployments cover {} listed models",
        deployments.len(),
        deployed.len()
    );
    Ok(ModelList::new(deployed))
}

/// Filter `models` down to those whose id some deployment serves. Order follows `models`.
pub fn keep_deployed(deployments: &[Deployment], models: Vec<Model>) -> Vec<Model> {
    let served: HashSet<&str> = deployments.iter().map(|d| d.model.as_str()).collect();
    models
        .into_iter()
        .filter(|model| served.contains(model.id.as_str()))
        .collect()
}

/// Decode listing entries one by one, dropping those that don't fit `D`.
fn decode_entries<D: DeserializeOwned>(listing: &str, entries: Vec<serde_json::Value>) -> Vec<D> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Skipping malformed entry in {} listing: {}", listing, e);
                None
            }
        })
        .collect()
}

async fn fetch_listing<T: HttpClient>(
    state: &AppState<T>,
    credential: &Credential,
    endpoint: Endpoint,
    listing: &'static str,
) -> Result<Vec<serde_json::Value>, GatewayError> {
    let failed = |detail: String| GatewayError::Aggregation { listing, detail };

    let path_and_query = state.translator.translate(&endpoint, None, None)?;
    let uri = outbound_uri(&state.backend.endpoint, &path_and_query)?;
    let mut req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .map_err(|e| failed(e.to_string()))?;
    credential.apply(req.headers_mut())?;

    let timeout = state.backend.upstream_timeout;
    let response = proxy::forward(&state.http_client, req, timeout)
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX);
    let bytes = tokio::time::timeout(timeout, body)
        .await
        .map_err(|_| failed(format!("body not received within {}s", timeout.as_secs())))?
        .map_err(|e| failed(e.to_string()))?;

    if !status.is_success() {
        return Err(failed(format!(
            "backend returned {status}: {}",
            String::from_utf8_lossy(&bytes)
        )));
    }

    let parsed: Listing = serde_json::from_slice(&bytes).map_err(|e| failed(e.to_string()))?;
    Ok(parsed.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendConfig;
    use crate::test_utils::MockHttpClient;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::Response;
    use serde_json::json;
    use std::time::Duration;

    fn model(id: &str) -> Model {
        serde_json::from_value(json!({"id": id})).unwrap()
    }

    fn deployment(model: &str) -> Deployment {
        Deployment {
            id: None,
            model: model.to_string(),
        }
    }

    fn ids(models: &[Model]) -> Vec<&str> {
        models.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_keep_deployed_follows_model_order_and_collapses_duplicates() {
        let deployments = vec![
            deployment("gpt-4"),
            deployment("gpt-4"),
            deployment("text-embedding-ada-002"),
        ];
        let models = vec![
            model("gpt-4"),
            model("gpt-35-turbo"),
            model("text-embedding-ada-002"),
        ];

        let kept = keep_deployed(&deployments, models);
        assert_eq!(ids(&kept), vec!["gpt-4", "text-embedding-ada-002"]);
    }

    #[test]
    fn test_keep_deployed_ignores_deployment_order() {
        let models = || vec![model("a"), model("b"), model("c")];
        let forward = keep_deployed(&[deployment("a"), deployment("c")], models());
        let reverse = keep_deployed(&[deployment("c"), deployment("a")], models());
        assert_eq!(ids(&forward), vec!["a", "c"]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_keep_deployed_with_nothing_deployed() {
        assert!(keep_deployed(&[], vec![model("a")]).is_empty());
        assert!(keep_deployed(&[deployment("a")], vec![]).is_empty());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let entries = vec![
            json!({"model": "gpt-4"}),
            json!({"id": "no-model-field"}),
            json!("not an object"),
            json!({"model": "gpt-4o", "id": "prod"}),
        ];
        let decoded: Vec<Deployment> = decode_entries(DEPLOYMENTS, entries);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].id.as_deref(), Some("prod"));
    }

    fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn state(mock_client: MockHttpClient) -> AppState<MockHttpClient> {
        let backend = BackendConfig::builder()
            .endpoint("https://example.openai.azure.com".parse().unwrap())
            .api_version("2024-06-01")
            .build();
        AppState::with_client(backend, mock_client)
    }

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer sk-caller"));
        headers
    }

    #[tokio::test]
    async fn test_deployed_models_issues_both_listings() {
        let mock_client = MockHttpClient::from_fn(|req| {
            if req.uri.contains("/openai/deployments") {
                json_response(
                    StatusCode::OK,
                    json!({"data": [
                        {"model": "gpt-4"},
                        {"model": "gpt-4"},
                        {"model": "text-embedding-ada-002"}
                    ]}),
                )
            } else {
                json_response(
                    StatusCode::OK,
                    json!({"object": "list", "data": [
                        {"id": "gpt-4", "capabilities": {"chat_completion": true}},
                        {"id": "gpt-35-turbo"},
                        {"id": "text-embedding-ada-002", "capabilities": {"embeddings": true}}
                    ]}),
                )
            }
        });

        let list = deployed_models(&state(mock_client.clone()), &inbound())
            .await
            .unwrap();
        assert_eq!(list.object, "list");
        assert_eq!(ids(&list.data), vec!["gpt-4", "text-embedding-ada-002"]);
        assert!(list.data[0].capabilities.chat_completion);
        assert!(list.data[1].capabilities.embeddings);

        let requests = mock_client.get_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].uri,
            "https://example.openai.azure.com/openai/deployments?api-version=2024-06-01"
        );
        assert_eq!(
            requests[1].uri,
            "https://example.openai.azure.com/openai/models?api-version=2024-06-01"
        );
        for request in &requests {
            assert_eq!(request.method, "GET");
            assert_eq!(request.header("api-key"), Some("sk-caller"));
            assert_eq!(request.header("authorization"), None);
        }
    }

    #[tokio::test]
    async fn test_failed_deployment_listing_fails_whole_catalog() {
        let mock_client = MockHttpClient::from_fn(|req| {
            if req.uri.contains("/openai/deployments") {
                json_response(
                    StatusCode::UNAUTHORIZED,
                    json!({"error": {"code": "401", "message": "Access denied"}}),
                )
            } else {
                json_response(StatusCode::OK, json!({"data": [{"id": "gpt-4"}]}))
            }
        });

        let err = deployed_models(&state(mock_client.clone()), &inbound())
            .await
            .unwrap_err();
        match err {
            GatewayError::Aggregation { listing, detail } => {
                assert_eq!(listing, DEPLOYMENTS);
                assert!(detail.contains("Access denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The model listing is never requested.
        assert_eq!(mock_client.get_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_model_listing_fails_whole_catalog() {
        let mock_client = MockHttpClient::from_fn(|req| {
            if req.uri.contains("/openai/deployments") {
                json_response(StatusCode::OK, json!({"data": [{"model": "gpt-4"}]}))
            } else {
                json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "boom"}))
            }
        });

        let err = deployed_models(&state(mock_client), &inbound())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Aggregation {
                listing: MODELS,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_undecodable_listing_fails_whole_catalog() {
        let mock_client = MockHttpClient::new(StatusCode::OK, "not json");
        let err = deployed_models(&state(mock_client), &inbound())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Aggregation { .. }));
    }

    fn state_with_timeout(
        mock_client: MockHttpClient,
        timeout: Duration,
    ) -> AppState<MockHttpClient> {
        let backend = BackendConfig::builder()
            .endpoint("https://example.openai.azure.com".parse().unwrap())
            .upstream_timeout(timeout)
            .build();
        AppState::with_client(backend, mock_client)
    }

    #[tokio::test]
    async fn test_slow_listing_fails_in_time() {
        let mock_client = MockHttpClient::new(StatusCode::OK, r#"{"data": []}"#)
            .with_delay(Duration::from_secs(30));
        let state = state_with_timeout(mock_client, Duration::from_millis(100));

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            deployed_models(&state, &inbound()),
        )
        .await
        .expect("catalog must give up on a slow backend")
        .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Aggregation {
                listing: DEPLOYMENTS,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stalled_listing_body_fails_in_time() {
        let mock_client = MockHttpClient::from_fn(|_| {
            let partial =
                futures_util::stream::iter(vec![Ok::<_, std::io::Error>("{\"data\": [")]);
            Response::builder()
                .status(StatusCode::OK)
                .body(Body::from_stream(futures_util::StreamExt::chain(
                    partial,
                    futures_util::stream::pending(),
                )))
                .unwrap()
        });
        let state = state_with_timeout(mock_client, Duration::from_millis(100));

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            deployed_models(&state, &inbound()),
        )
        .await
        .expect("catalog must give up on a stalled body")
        .unwrap_err();
        assert!(matches!(err, GatewayError::Aggregation { .. }));
    }

    #[tokio::test]
    async fn test_missing_credential_makes_no_backend_calls() {
        let mock_client = MockHttpClient::new(StatusCode::OK, r#"{"data": []}"#);
        let err = deployed_models(&state(mock_client.clone()), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AuthUnavailable(_)));
        assert!(mock_client.get_requests().is_empty());
    }
}
