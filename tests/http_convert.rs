use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use toolbridge_rs::config::{AppConfig, ServerConfig};
use toolbridge_rs::routing::dispatch_request;
use toolbridge_rs::state::AppState;

const TRIGGER: &str = "<Function_Hh20_Start/>";

fn state() -> Arc<AppState> {
    Arc::new(AppState::new(AppConfig::default()))
}

async fn send(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, String, Vec<u8>) {
    let response = dispatch_request(state, request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, body.to_vec())
}

#[tokio::test]
async fn health_reports_features() {
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, _, body) = send(state(), request).await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["features"]["enable_function_recovery"], true);
}

#[tokio::test]
async fn complete_response_with_recovered_call() {
    let completion = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "upstream-model",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": format!(
                    "<think>need the file</think>Opening it now.\n{TRIGGER}\n\
                     <invoke name=\"read\"><parameter name=\"file_path\">/etc/hosts</parameter></invoke>"
                ),
            },
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 30, "total_tokens": 42}
    });
    let request = Request::post("/v1/convert/messages")
        .header("x-trigger-signal", TRIGGER)
        .header("x-model", "claude-sonnet")
        .header("x-tool-names", "Read,Bash")
        .header("content-type", "application/json")
        .body(Body::from(completion.to_string()))
        .unwrap();

    let (status, content_type, body) = send(state(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/json");

    let message: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(message["type"], "message");
    assert_eq!(message["role"], "assistant");
    assert_eq!(message["model"], "claude-sonnet");
    assert!(message["id"].as_str().unwrap().starts_with("msg_"));
    assert_eq!(message["stop_reason"], "tool_use");

    let content = message["content"].as_array().unwrap();
    let kinds: Vec<&str> = content.iter().filter_map(|b| b["type"].as_str()).collect();
    assert_eq!(kinds, vec!["thinking", "text", "tool_use"]);
    assert_eq!(content[0]["thinking"], "need the file");
    assert_eq!(content[1]["text"].as_str().unwrap().trim(), "Opening it now.");
    assert_eq!(content[2]["name"], "Read");
    assert_eq!(content[2]["input"], json!({"file_path": "/etc/hosts"}));
    assert_eq!(message["usage"]["input_tokens"], 12);
    assert_eq!(message["usage"]["output_tokens"], 30);
}

#[tokio::test]
async fn recovery_can_be_switched_off_per_request() {
    let text = format!("{TRIGGER}<invoke name=\"x\"></invoke>");
    let completion = json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}]
    });
    let request = Request::post("/v1/convert/messages")
        .header("x-trigger-signal", TRIGGER)
        .header("x-recovery-enabled", "false")
        .body(Body::from(completion.to_string()))
        .unwrap();
    let (status, _, body) = send(state(), request).await;
    assert_eq!(status, StatusCode::OK);
    let message: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(message["stop_reason"], "end_turn");
    assert_eq!(message["content"][0]["type"], "text");
    assert_eq!(message["content"][0]["text"], text);
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let request = Request::post("/v1/convert/messages")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(state(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["type"], "error");
    assert_eq!(value["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn body_over_limit_is_rejected() {
    let config = AppConfig {
        server: ServerConfig {
            body_limit_bytes: 64,
            ..ServerConfig::default()
        },
        ..AppConfig::default()
    };
    let request = Request::post("/v1/convert/messages")
        .body(Body::from(vec![b' '; 1024]))
        .unwrap();
    let (status, _, body) = send(Arc::new(AppState::new(config)), request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"]["type"], "request_too_large");
}

#[tokio::test]
async fn unknown_paths_and_methods() {
    let (status, _, _) = send(state(), Request::get("/v1/models").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(
        state(),
        Request::get("/v1/convert/messages").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn streamed_body_converts_to_anthropic_events() {
    let upstream = [
        json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hel"}}]}),
        json!({"choices": [{"index": 0, "delta": {"content": "lo"}}]}),
        json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}),
    ]
    .iter()
    .map(|chunk| format!("data: {chunk}\n\n"))
    .collect::<String>()
        + "data: [DONE]\n\n";

    let request = Request::post("/v1/convert/messages/stream")
        .header("x-model", "claude-haiku")
        .body(Body::from(upstream))
        .unwrap();
    let (status, content_type, body) = send(state(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "text/event-stream");

    let body = String::from_utf8(body).unwrap();
    let events: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect();
    assert_eq!(&events[..2], ["message_start", "content_block_start"]);
    assert_eq!(
        &events[events.len() - 3..],
        ["content_block_stop", "message_delta", "message_stop"]
    );
    let text: String = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .filter_map(|data| data["delta"]["text"].as_str().map(str::to_string))
        .collect();
    assert_eq!(text, "Hello");
    assert!(body.contains("\"model\":\"claude-haiku\""));
    assert!(body.contains("\"stop_reason\":\"end_turn\""));
}
