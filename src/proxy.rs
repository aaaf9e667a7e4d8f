//! Reverse proxy transport
//!
//! Sends an already-translated request to the backend and hands the response back without
//! reading its body, so streamed completions reach the caller as the backend produces them.
//! The wait for response headers is bounded, and so is every gap between body chunks: a body
//! may run for as long as the backend keeps sending, but one that goes quiet for a whole
//! timeout is failed. If the caller goes away, axum drops the response body, which drops the
//! backend connection with it.
use crate::client::HttpClient;
use crate::errors::GatewayError;
use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::Response;
use std::time::Duration;
use tokio_stream::StreamExt as _;
use tracing::{debug, error};

/// Point the `Host` header at the request's URI authority.
pub fn set_host_header(req: &mut axum::extract::Request) -> Result<(), GatewayError> {
    let Some(authority) = req.uri().authority() else {
        return Err(GatewayError::BadRequest(format!(
            "backend URI {} has no host",
            req.uri()
        )));
    };
    let value = HeaderValue::from_str(authority.as_str())
        .map_err(|e| GatewayError::BadRequest(format!("invalid backend host: {e}")))?;
    req.headers_mut().insert(header::HOST, value);
    Ok(())
}

/// Fail `response`'s body once no bytes have arrived for `idle_timeout`.
///
/// The deadline restarts with every chunk, so long-running streams are unaffected.
pub fn with_idle_timeout(response: Response, idle_timeout: Duration) -> Response {
    response.map(|body| {
        let guarded = body
            .into_data_stream()
            .timeout(idle_timeout)
            .map(|chunk| chunk.unwrap_or_else(|elapsed| Err(axum::Error::new(elapsed))));
        Body::from_stream(guarded)
    })
}

/// Execute `req` against the backend.
///
/// Transport failures (DNS, refused connections, no headers within `timeout`) become
/// gateway errors. Any HTTP response, including 4xx/5xx, is returned as-is: backend
/// rejections are the caller's to see. Nothing is retried. The returned body is subject to
/// the same `timeout` between chunks.
pub async fn forward<T: HttpClient>(
    client: &T,
    mut req: axum::extract::Request,
    timeout: Duration,
) -> Result<Response, GatewayError> {
    set_host_header(&mut req)?;
    let method = req.method().clone();
    let uri = req.uri().clone();
    debug!("Forwarding {} {}", method, uri);

    match tokio::time::timeout(timeout, client.request(req)).await {
        Ok(Ok(response)) => Ok(with_idle_timeout(response, timeout)),
        Ok(Err(e)) => {
            error!("Error forwarding {} {}: {}", method, uri, e);
            Err(GatewayError::Upstream(e.to_string()))
        }
        Err(_) => {
            error!(
                "Backend did not answer {} {} within {}s",
                method,
                uri,
                timeout.as_secs()
            );
            Err(GatewayError::UpstreamTimeout(timeout.as_secs()))
        }
    }
}
