//! SSE (Server-Sent Events) stream termination
//!
//! Some clients only consider an event stream finished once they see a blank line after the
//! last event, but the backend may close the connection straight after the final `data:`
//! line. Responses with a `text/event-stream` content type therefore get exactly one extra
//! `\n` after the backend's last byte. Bytes are passed through as they arrive; nothing is
//! buffered.

use axum::body::Body;
use axum::http::{HeaderMap, header};
use axum::response::Response;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

pub const EVENT_STREAM: &str = "text/event-stream";

const TRAILING_DELIMITER: &[u8] = b"\n";

/// A stream wrapper that yields one trailing delimiter once the inner stream ends cleanly.
pub struct EventStreamTerminator<S> {
    inner: S,
    finished: bool,
}

impl<S> EventStreamTerminator<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            finished: false,
        }
    }
}

impl<S, E> Stream for EventStreamTerminator<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                // A broken stream is not terminated on the backend's behalf.
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(Some(Ok(Bytes::from_static(TRAILING_DELIMITER))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Whether the headers declare an event stream (parameters such as `charset` are ignored).
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(EVENT_STREAM))
}

/// Append the trailing delimiter to event-stream responses; return others untouched.
pub fn terminate_event_stream(response: Response) -> Response {
    if !is_event_stream(response.headers()) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    // The body grows by one byte.
    parts.headers.remove(header::CONTENT_LENGTH);
    let body = Body::from_stream(EventStreamTerminator::new(body.into_data_stream()));
    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use futures_util::StreamExt;
    use std::convert::Infallible;

    /// Helper to create a stream from chunks
    fn chunks_to_stream(
        chunks: Vec<&'static [u8]>,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Unpin {
        futures_util::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    #[tokio::test]
    async fn test_delimiter_appended_after_last_chunk() {
        let chunks = vec![
            b"data: {\"hel".as_slice(),
            b"lo\": \"world\"}\n\n".as_slice(),
            b"data: [DONE]\n".as_slice(),
        ];
        let stream = EventStreamTerminator::new(chunks_to_stream(chunks));
        let results: Vec<_> = stream.collect().await;

        // Chunks are passed through as-is, not regrouped.
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().as_ref(), b"data: {\"hel");
        assert_eq!(results[2].as_ref().unwrap().as_ref(), b"data: [DONE]\n");
        assert_eq!(results[3].as_ref().unwrap().as_ref(), b"\n");
    }

    #[tokio::test]
    async fn test_empty_stream_still_terminated() {
        let stream = EventStreamTerminator::new(chunks_to_stream(vec![]));
        let results: Vec<_> = stream.collect().await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().as_ref(), b"\n");
    }

    #[tokio::test]
    async fn test_no_delimiter_after_stream_error() {
        let chunks: Vec<Result<Bytes, &'static str>> =
            vec![Ok(Bytes::from_static(b"data: partial")), Err("reset")];
        let stream = EventStreamTerminator::new(futures_util::stream::iter(chunks));
        let results: Vec<_> = stream.collect().await;

        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn test_terminator_is_fused() {
        let mut stream = EventStreamTerminator::new(chunks_to_stream(vec![b"data: x\n\n"]));
        while stream.next().await.is_some() {}
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_is_event_stream() {
        let mut headers = HeaderMap::new();
        assert!(!is_event_stream(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        assert!(is_event_stream(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream; charset=utf-8"),
        );
        assert!(is_event_stream(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_event_stream(&headers));
    }

    #[tokio::test]
    async fn test_terminate_event_stream_only_touches_event_streams() {
        let json = Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, "2")
            .body(Body::from("{}"))
            .unwrap();
        let json = terminate_event_stream(json);
        assert_eq!(json.headers().get(header::CONTENT_LENGTH).unwrap(), "2");
        let bytes = axum::body::to_bytes(json.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"{}");

        let sse = Response::builder()
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CONTENT_LENGTH, "13")
            .body(Body::from("data: done\n\n\n"))
            .unwrap();
        let sse = terminate_event_stream(sse);
        assert!(sse.headers().get(header::CONTENT_LENGTH).is_none());
        let bytes = axum::body::to_bytes(sse.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"data: done\n\n\n\n");
    }
}
