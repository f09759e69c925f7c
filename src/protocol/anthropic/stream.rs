use crate::error::BridgeError;
use crate::protocol::anthropic::{AnthropicDelta, AnthropicStreamEvent};
use crate::util::{push_json_string_escaped, push_usize_decimal};

/// Encode an Anthropic stream event into a full SSE frame
/// (`event: {name}\ndata: {json}\n\n`), appending to `out`.
///
/// Deltas and block stops dominate a stream and are rendered by hand; the
/// remaining lifecycle events go through serde.
///
/// # Errors
///
/// Returns [`BridgeError::EncodeFailure`] when serde rejects the event.
pub fn encode_anthropic_sse_frame(
    event: &AnthropicStreamEvent,
    out: &mut String,
) -> Result<(), BridgeError> {
    match event {
        AnthropicStreamEvent::ContentBlockDelta { index, delta } => {
            out.push_str(
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":",
            );
            push_usize_decimal(out, *index);
            match delta {
                AnthropicDelta::TextDelta { text } => {
                    out.push_str(",\"delta\":{\"type\":\"text_delta\",\"text\":");
                    push_json_string_escaped(out, text);
                }
                AnthropicDelta::ThinkingDelta { thinking } => {
                    out.push_str(",\"delta\":{\"type\":\"thinking_delta\",\"thinking\":");
                    push_json_string_escaped(out, thinking);
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    out.push_str(",\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":");
                    push_json_string_escaped(out, partial_json);
                }
            }
            out.push_str("}}\n\n");
        }
        AnthropicStreamEvent::ContentBlockStop { index } => {
            out.push_str(
                "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":",
            );
            push_usize_decimal(out, *index);
            out.push_str("}\n\n");
        }
        AnthropicStreamEvent::MessageStop {} => {
            out.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
        }
        AnthropicStreamEvent::Ping {} => {
            out.push_str("event: ping\ndata: {\"type\":\"ping\"}\n\n");
        }
        other => {
            let json =
                serde_json::to_string(other).map_err(|e| BridgeError::EncodeFailure(e.to_string()))?;
            out.push_str("event: ");
            out.push_str(other.event_name());
            out.push_str("\ndata: ");
            out.push_str(&json);
            out.push_str("\n\n");
        }
    }
    Ok(())
}

/// Render a complete stream as SSE text. Events that fail to encode are
/// skipped with a warning.
#[must_use]
pub fn render_anthropic_sse(events: &[AnthropicStreamEvent]) -> String {
    let mut out = String::with_capacity(events.len() * 96);
    for event in events {
        if let Err(err) = encode_anthropic_sse_frame(event, &mut out) {
            tracing::warn!(error = %err, event = event.event_name(), "skipping event");
        }
    }
    out
}
