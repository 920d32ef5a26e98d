//! Server-sent-event responses for streaming callables.
//!
//! Each streamed element becomes exactly one `data: {...}` frame; the
//! connection closes after the last frame.

use std::convert::Infallible;

use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream;

pub fn stream_response(frames: Vec<serde_json::Value>) -> Response {
    let events = frames.into_iter().map(|frame| {
        Ok::<Event, Infallible>(Event::default().data(frame.to_string()))
    });
    Sse::new(stream::iter(events)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn frames_are_data_lines_with_blank_separators() {
        let response = stream_response(vec![
            serde_json::json!({"value": 1}),
            serde_json::json!({"value": 2}),
        ]);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(
            text,
            "data: {\"value\":1}\n\ndata: {\"value\":2}\n\n"
        );
    }

    #[tokio::test]
    async fn empty_stream_closes_cleanly() {
        let response = stream_response(Vec::new());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }
}
