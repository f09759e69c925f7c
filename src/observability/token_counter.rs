use crate::protocol::anthropic::AnthropicUsage;
use crate::protocol::mapping::scale_tokens;
use crate::protocol::openai_chat::OpenAiUsage;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Running estimate of the output produced for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputEstimate {
    bytes: u64,
}

impl OutputEstimate {
    #[inline]
    pub fn add(&mut self, text: &str) {
        self.bytes += text.len() as u64;
    }

    #[inline]
    #[must_use]
    pub fn tokens(self) -> u64 {
        self.bytes.div_ceil(4)
    }
}

/// Resolve the usage reported to the client.
///
/// - Upstream non-zero values always win
/// - Missing or zero output tokens fall back to `estimated_output`
/// - Input tokens have no local estimate
/// - Both fields are scaled by `multiplier` last
#[must_use]
pub fn resolve_usage(
    upstream: Option<&OpenAiUsage>,
    estimated_output: u64,
    multiplier: f64,
) -> AnthropicUsage {
    let input_tokens = upstream.map_or(0, |u| u.prompt_tokens);
    let output_tokens = match upstream.map(|u| u.completion_tokens) {
        Some(v) if v > 0 => v,
        _ => estimated_output,
    };
    AnthropicUsage {
        input_tokens: scale_tokens(input_tokens, multiplier),
        output_tokens: scale_tokens(output_tokens, multiplier),
    }
}
