//! Errors surfaced by the gateway
//!
//! Every failure the gateway produces itself is rendered as a JSON body of the form
//! `{"error": {"type": ..., "message": ...}}`. Errors reported by the backend are not
//! represented here: those responses are forwarded to the caller untouched.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No usable backend credential: {0}")]
    AuthUnavailable(String),

    #[error("Request does not name a model to route to")]
    MissingModel,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("No translation for {method} {path}")]
    UnknownEndpoint { method: String, path: String },

    #[error("Backend unreachable: {0}")]
    Upstream(String),

    #[error("Backend did not respond within {0} seconds")]
    UpstreamTimeout(u64),

    #[error("Failed to fetch {listing}: {detail}")]
    Aggregation { listing: &'static str, detail: String },
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Config(_) | GatewayError::Aggregation { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::AuthUnavailable(_) => StatusCode::UNAUTHORIZED,
            GatewayError::MissingModel | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnknownEndpoint { .. } => StatusCode::NOT_FOUND,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            GatewayError::Config(_) | GatewayError::Aggregation { .. } => "server_error",
            GatewayError::AuthUnavailable(_) => "authentication_error",
            GatewayError::MissingModel | GatewayError::BadRequest(_) => "invalid_request_error",
            GatewayError::UnknownEndpoint { .. } => "not_found_error",
            GatewayError::Upstream(_) | GatewayError::UpstreamTimeout(_) => "gateway_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed inside the gateway");
        }
        let body = json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string()
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_body_is_structured() {
        let response = GatewayError::MissingModel.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(
            body["error"]["message"],
            "Request does not name a model to route to"
        );
    }

    #[test]
    fn test_transport_failures_are_gateway_side() {
        assert_eq!(
            GatewayError::Upstream("connection refused".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamTimeout(30).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::AuthUnavailable("no key".into()).status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
