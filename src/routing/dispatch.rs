use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{health_handler, messages_handler, stream_handler};
use crate::error::{anthropic_error_type, ErrorCategory};
use crate::state::AppState;

enum RouteMatch {
    Health,
    ConvertMessages,
    ConvertStream,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path());

    let response = match route {
        RouteMatch::Health => health_handler(State(state)).into_response(),
        RouteMatch::ConvertMessages => {
            let limit = state.config.server.body_limit_bytes;
            let body_bytes = match read_request_body(body, limit).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            messages_handler(State(state), parts.headers, body_bytes).await
        }
        // The stream body is bounded by the converter's input limit instead.
        RouteMatch::ConvertStream => stream_handler(State(state), parts.headers, body).await,
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

async fn read_request_body(body: Body, limit: usize) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, limit).await.map_err(|_| {
        let envelope = serde_json::json!({
            "type": "error",
            "error": {
                "type": anthropic_error_type(ErrorCategory::PayloadTooLarge),
                "message": format!("Request body exceeds {limit} bytes"),
            }
        });
        (StatusCode::PAYLOAD_TOO_LARGE, axum::Json(envelope)).into_response()
    })
}

fn match_route(method: &Method, path: &str) -> RouteMatch {
    let (allowed, matched) = match path {
        "/" | "/health" => (Method::GET, RouteMatch::Health),
        "/v1/convert/messages" => (Method::POST, RouteMatch::ConvertMessages),
        "/v1/convert/messages/stream" => (Method::POST, RouteMatch::ConvertStream),
        _ => return RouteMatch::NotFound,
    };
    if *method == allowed {
        matched
    } else {
        RouteMatch::MethodNotAllowed
    }
}
