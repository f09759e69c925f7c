use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::HeaderMap;
use tokio::sync::mpsc;

use super::headers::request_context;
use crate::convert::convert_body;
use crate::error::BridgeError;
use crate::state::AppState;
use crate::stream::{run_stream_conversion, BackpressureWriter, ChannelSink, StreamConverter};

#[inline]
fn ok_json_response(body_bytes: Bytes) -> Response {
    let mut response = Response::new(Body::from(body_bytes));
    *response.status_mut() = http::StatusCode::OK;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

#[inline]
fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// `POST /v1/convert/messages`: one chat completion in, one message out.
pub async fn messages_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = match request_context(&headers, &state) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };
    let message = match convert_body(&body, &ctx, &state.converter) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(error = %err, "non-streaming conversion failed");
            return err.into_response();
        }
    };
    tracing::debug!(
        model = %message.model,
        blocks = message.content.len(),
        stop_reason = message.stop_reason.as_deref().unwrap_or(""),
        "message converted"
    );
    match serde_json::to_vec(&message) {
        Ok(bytes) => ok_json_response(Bytes::from(bytes)),
        Err(err) => BridgeError::EncodeFailure(err.to_string()).into_response(),
    }
}

/// `POST /v1/convert/messages/stream`: the upstream SSE body in, Anthropic
/// events out while the body is still arriving.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let ctx = match request_context(&headers, &state) {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.stream.channel_capacity);
    let mut writer = BackpressureWriter::new(ChannelSink::new(tx, state.send_timeout), state.writer);
    let converter = StreamConverter::new(ctx, state.converter, Instant::now());
    tokio::spawn(async move {
        run_stream_conversion(body.into_data_stream(), converter, &mut writer).await;
    });

    let output = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|frame| (Ok::<Bytes, Infallible>(frame), rx))
    });
    sse_ok_response(Body::from_stream(output))
}
