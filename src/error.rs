/// Error type shared by the recovery engine, the stream converter and the
/// HTTP surface.
///
/// Messages never carry raw model output; only sizes, tool names and short
/// reasons are interpolated.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Unparseable upstream chunk: {0}")]
    UnparseableChunk(String),
    #[error("Unrecoverable tool call '{name}': {reason}")]
    UnrecoverableCall { name: String, reason: String },
    #[error("Input exceeds limit: {size} bytes > {limit} bytes")]
    OversizeInput { size: usize, limit: usize },
    #[error("Downstream write failed: {0}")]
    DownstreamWriteFailure(String),
    #[error("Event encode failed: {0}")]
    EncodeFailure(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code and envelope type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    PayloadTooLarge,
    ServerError,
}

impl BridgeError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::InvalidRequest(_) | BridgeError::UnparseableChunk(_) => {
                ErrorCategory::InvalidRequest
            }
            BridgeError::OversizeInput { .. } => ErrorCategory::PayloadTooLarge,
            BridgeError::UnrecoverableCall { .. }
            | BridgeError::DownstreamWriteFailure(_)
            | BridgeError::EncodeFailure(_)
            | BridgeError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// Whether this failure must end the stream early.
    #[must_use]
    pub fn is_stream_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::OversizeInput { .. } | BridgeError::DownstreamWriteFailure(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code / Anthropic error type
// ---------------------------------------------------------------------------

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::PayloadTooLarge => http::StatusCode::PAYLOAD_TOO_LARGE,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[must_use]
pub fn anthropic_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::PayloadTooLarge => "request_too_large",
        ErrorCategory::ServerError => "api_error",
    }
}

/// Format an error as (`status_code`, Anthropic error envelope).
#[must_use]
pub fn format_error(err: &BridgeError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let body = serde_json::json!({
        "type": "error",
        "error": {
            "type": anthropic_error_type(cat),
            "message": err.to_string(),
        }
    });
    (http_status_for_category(cat), body)
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

impl axum::response::IntoResponse for BridgeError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}
