use crate::error::BridgeError;

use super::OpenAiStreamChunk;

/// One decoded upstream SSE `data:` payload.
#[derive(Debug, Clone)]
pub enum UpstreamFrame {
    Chunk(OpenAiStreamChunk),
    /// The `[DONE]` sentinel.
    Done,
    /// Keep-alive or empty payload.
    Skip,
}

/// Decode the data payload of one upstream SSE event.
///
/// # Errors
///
/// Returns [`BridgeError::UnparseableChunk`] when the payload is neither the
/// done sentinel nor a chat completion chunk. The error text names the decode
/// position only, never the payload.
pub fn parse_openai_sse_data(data: &str) -> Result<UpstreamFrame, BridgeError> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Ok(UpstreamFrame::Skip);
    }
    if trimmed == "[DONE]" {
        return Ok(UpstreamFrame::Done);
    }
    serde_json::from_str::<OpenAiStreamChunk>(trimmed)
        .map(UpstreamFrame::Chunk)
        .map_err(|e| BridgeError::UnparseableChunk(e.to_string()))
}
