//! Whole-response conversion: one `OpenAI` chat completion in, one Anthropic
//! message out.
use serde_json::Value;

use crate::config::ConverterSettings;
use crate::context::RequestContext;
use crate::error::BridgeError;
use crate::fc::{normalize_calls, parse_function_calls, sanitize_content, try_repair_json};
use crate::observability::token_counter::{resolve_usage, OutputEstimate};
use crate::protocol::anthropic::{AnthropicContentBlock, AnthropicResponse};
use crate::protocol::mapping::{openai_finish_to_stop, StopReason};
use crate::protocol::openai_chat::{OpenAiChatResponse, OpenAiToolCall};
use crate::stream::gate::{CallGate, GateAction, GateRemainder};
use crate::stream::splitter::{ReasoningSplitter, SplitEvent};
use crate::util::{next_message_id, next_tool_use_id};

/// Decode and convert a complete upstream response body.
///
/// # Errors
///
/// - [`BridgeError::OversizeInput`] when the body exceeds `max_input_bytes`
/// - [`BridgeError::InvalidRequest`] when the body is not a chat completion
pub fn convert_body(
    body: &[u8],
    ctx: &RequestContext,
    settings: &ConverterSettings,
) -> Result<AnthropicResponse, BridgeError> {
    if body.len() > settings.max_input_bytes {
        return Err(BridgeError::OversizeInput {
            size: body.len(),
            limit: settings.max_input_bytes,
        });
    }
    let response: OpenAiChatResponse = serde_json::from_slice(body)
        .map_err(|e| BridgeError::InvalidRequest(format!("not a chat completion: {e}")))?;
    Ok(assemble_message(&response, ctx, settings))
}

/// Build the Anthropic message for a complete upstream response.
///
/// Blocks come out as thinking, text (omitted when blank), then tool use:
/// native calls first, recovered calls after them.
#[must_use]
pub fn assemble_message(
    response: &OpenAiChatResponse,
    ctx: &RequestContext,
    settings: &ConverterSettings,
) -> AnthropicResponse {
    let choice = response.choices.first();
    let mut text = choice.map(|c| c.message.text()).unwrap_or_default();
    if text.is_empty() {
        if let Some(refusal) = choice.and_then(|c| c.message.refusal.as_deref()) {
            text = refusal.to_string();
        }
    }

    let mut splitter = ReasoningSplitter::new();
    splitter.feed_str(&text);
    let mut thinking_blocks = Vec::new();
    let mut answer = String::new();
    for event in splitter.finish() {
        match event {
            SplitEvent::Thinking(thinking) => thinking_blocks.push(thinking),
            SplitEvent::Text(part) => answer.push_str(&part),
        }
    }

    let mut estimate = OutputEstimate::default();
    let mut content: Vec<AnthropicContentBlock> = Vec::new();
    for thinking in thinking_blocks {
        estimate.add(&thinking);
        content.push(AnthropicContentBlock::Thinking {
            thinking,
            signature: String::new(),
        });
    }

    let mut tool_blocks: Vec<AnthropicContentBlock> = choice
        .and_then(|c| c.message.tool_calls.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|call| native_tool_block(call, ctx))
        .collect();

    if ctx.recovery_active() {
        let trigger = ctx.trigger();
        let (kept, withheld) = screen_answer(&answer, trigger);
        answer = kept;
        if let Some(withheld) = withheld {
            let calls = normalize_calls(parse_function_calls(&text, trigger), &ctx.tool_names);
            let prose = sanitize_content(&withheld, trigger);
            if !prose.trim().is_empty() {
                answer.push_str(&prose);
            }
            for call in calls {
                let input = Value::Object(call.args);
                tool_blocks.push(AnthropicContentBlock::ToolUse {
                    id: next_tool_use_id(),
                    name: call.name,
                    input,
                });
            }
        }
    }

    if !answer.trim().is_empty() {
        estimate.add(&answer);
        content.push(AnthropicContentBlock::Text { text: answer });
    }
    for block in &tool_blocks {
        if let AnthropicContentBlock::ToolUse { input, .. } = block {
            estimate.add(&input.to_string());
        }
    }

    let stop = if tool_blocks.is_empty() {
        choice
            .and_then(|c| c.finish_reason.as_deref())
            .map_or(StopReason::EndTurn, openai_finish_to_stop)
    } else {
        StopReason::ToolUse
    };
    content.extend(tool_blocks);

    let model = if ctx.model.is_empty() {
        response.model.clone()
    } else {
        ctx.model.clone()
    };
    AnthropicResponse {
        id: next_message_id(),
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model,
        content,
        stop_reason: Some(stop.as_str().to_string()),
        stop_sequence: None,
        usage: resolve_usage(
            response.usage.as_ref(),
            estimate.tokens(),
            settings.usage_multiplier,
        ),
    }
}

/// Split the answer at the first call artifact, the same way the streaming
/// gate does.
fn screen_answer(answer: &str, trigger: Option<&str>) -> (String, Option<String>) {
    let mut gate = CallGate::new(trigger, usize::MAX);
    let mut kept = match gate.feed(answer) {
        GateAction::PassThrough(text) => text,
        GateAction::Withhold { text_before } => text_before,
        GateAction::Overflow {
            text_before,
            withheld,
        } => return (text_before, Some(withheld)),
        GateAction::Hold => String::new(),
    };
    match gate.finish() {
        Some(GateRemainder::Text(text)) => {
            kept.push_str(&text);
            (kept, None)
        }
        Some(GateRemainder::Withheld(text)) => (kept, Some(text)),
        None => (kept, None),
    }
}

fn native_tool_block(call: &OpenAiToolCall, ctx: &RequestContext) -> AnthropicContentBlock {
    let arguments = call.function.arguments.trim();
    let input = if arguments.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str::<Value>(arguments)
            .ok()
            .or_else(|| {
                try_repair_json(arguments).and_then(|fixed| serde_json::from_str(&fixed).ok())
            })
            .filter(Value::is_object)
            .unwrap_or_else(|| {
                tracing::warn!(tool = %call.function.name, "native tool arguments unreadable, using {{}}");
                Value::Object(serde_json::Map::new())
            })
    };
    let id = if call.id.is_empty() {
        next_tool_use_id()
    } else {
        call.id.clone()
    };
    AnthropicContentBlock::ToolUse {
        id,
        name: ctx.tool_names.resolve(&call.function.name).to_string(),
        input,
    }
}
