//! `OpenAI` chat completion chunks in, Anthropic message events out.
//!
//! The converter is synchronous: every call appends the resulting events to a
//! caller-owned buffer, so it can be driven by the async pipeline or fed by
//! hand in tests. One converter serves exactly one upstream stream.
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::warn;

use super::aggregator::Aggregator;
use super::gate::{CallGate, GateAction, GateRemainder};
use super::splitter::{ReasoningSplitter, SplitEvent};
use crate::config::ConverterSettings;
use crate::context::RequestContext;
use crate::error::{anthropic_error_type, BridgeError, ErrorCategory};
use crate::fc::{normalize_calls, parse_function_calls, sanitize_content};
use crate::observability::token_counter::{resolve_usage, OutputEstimate};
use crate::protocol::anthropic::{
    AnthropicContentBlock, AnthropicDelta, AnthropicMessageDeltaBody, AnthropicMessageStart,
    AnthropicStreamEvent, AnthropicUsage, BlockKind,
};
use crate::protocol::mapping::{openai_finish_to_stop, StopReason};
use crate::protocol::openai_chat::stream::{parse_openai_sse_data, UpstreamFrame};
use crate::protocol::openai_chat::{OpenAiStreamChunk, OpenAiStreamToolCall, OpenAiUsage};
use crate::util::{next_message_id, next_tool_use_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenBlock {
    index: usize,
    kind: BlockKind,
}

/// What one conversion produced, for the completion log.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub message_id: String,
    pub model: String,
    pub blocks: usize,
    pub recovered_calls: usize,
    pub native_calls: usize,
    pub input_bytes: usize,
    pub stop_reason: StopReason,
    pub usage: AnthropicUsage,
}

pub struct StreamConverter {
    ctx: RequestContext,
    settings: ConverterSettings,
    phase: Phase,
    message_id: String,
    next_index: usize,
    open: Option<OpenBlock>,
    /// Raw content kept for call recovery, bounded by `accumulation_cap`.
    accumulated: String,
    recovery: bool,
    /// A cap was hit: withheld text is only sanitized, never parsed.
    abandoned: bool,
    input_bytes: usize,
    splitter: ReasoningSplitter,
    gate: CallGate,
    aggregator: Aggregator,
    /// Time of the latest chunk or tick.
    clock: Instant,
    /// Upstream tool-call index -> block index.
    native_tools: FxHashMap<u32, usize>,
    stop_reason: Option<StopReason>,
    upstream_usage: Option<OpenAiUsage>,
    output: OutputEstimate,
    summary: StreamSummary,
    final_sent: bool,
}

impl StreamConverter {
    #[must_use]
    pub fn new(ctx: RequestContext, settings: ConverterSettings, now: Instant) -> Self {
        let message_id = next_message_id();
        let gate = CallGate::new(ctx.trigger(), settings.accumulation_cap);
        let summary = StreamSummary {
            message_id: message_id.clone(),
            model: ctx.model.clone(),
            blocks: 0,
            recovered_calls: 0,
            native_calls: 0,
            input_bytes: 0,
            stop_reason: StopReason::EndTurn,
            usage: AnthropicUsage::default(),
        };
        Self {
            recovery: ctx.recovery_active(),
            abandoned: false,
            ctx,
            settings,
            phase: Phase::Idle,
            message_id,
            next_index: 0,
            open: None,
            accumulated: String::new(),
            input_bytes: 0,
            splitter: ReasoningSplitter::new(),
            gate,
            aggregator: Aggregator::new(settings.aggregation_interval, now),
            clock: now,
            native_tools: FxHashMap::default(),
            stop_reason: None,
            upstream_usage: None,
            output: OutputEstimate::default(),
            summary,
            final_sent: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.final_sent
    }

    #[inline]
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// How often an idle driver should call [`StreamConverter::tick`].
    #[inline]
    #[must_use]
    pub fn tick_interval(&self) -> std::time::Duration {
        self.settings.aggregation_interval
    }

    #[inline]
    #[must_use]
    pub fn summary(&self) -> &StreamSummary {
        &self.summary
    }

    /// Handle the `data` payload of one upstream SSE frame.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::UnparseableChunk`] when the payload is not a chunk;
    ///   nothing was emitted and the stream may continue.
    /// - [`BridgeError::OversizeInput`] when the input limit is exceeded; the
    ///   error and terminal events were already appended to `out`.
    pub fn process_data(
        &mut self,
        data: &str,
        now: Instant,
        out: &mut Vec<AnthropicStreamEvent>,
    ) -> Result<(), BridgeError> {
        if self.final_sent {
            return Ok(());
        }
        self.input_bytes = self.input_bytes.saturating_add(data.len());
        if self.input_bytes > self.settings.max_input_bytes {
            return Err(self.abort_oversize(out));
        }
        match parse_openai_sse_data(data)? {
            UpstreamFrame::Chunk(chunk) => self.process_chunk(&chunk, now, out),
            UpstreamFrame::Done => self.finalize(out),
            UpstreamFrame::Skip => {}
        }
        Ok(())
    }

    /// Handle one decoded chunk.
    pub fn process_chunk(
        &mut self,
        chunk: &OpenAiStreamChunk,
        now: Instant,
        out: &mut Vec<AnthropicStreamEvent>,
    ) {
        if self.final_sent {
            return;
        }
        self.clock = now;
        self.start_message(out);

        let mut finish_reason = None;
        for choice in chunk.choices.iter().filter(|c| c.index == 0) {
            if let Some(content) = choice.delta.content.as_deref() {
                self.process_content(content, out);
            }
            if let Some(tool_calls) = choice.delta.tool_calls.as_deref() {
                self.process_native_tools(tool_calls, out);
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                finish_reason = Some(reason);
            }
        }
        if let Some(usage) = chunk.usage {
            self.upstream_usage = Some(usage);
        }

        if let Some(reason) = finish_reason {
            self.stop_reason = Some(openai_finish_to_stop(reason));
            self.finalize(out);
            return;
        }
        self.tick(now, out);
    }

    /// Emit aggregated text whose window has elapsed.
    pub fn tick(&mut self, now: Instant, out: &mut Vec<AnthropicStreamEvent>) {
        self.clock = now;
        if let Some(text) = self.aggregator.maybe_flush(now) {
            self.emit_text(&text, out);
        }
    }

    /// Close the message. Repeated calls are no-ops.
    pub fn finalize(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.final_sent {
            return;
        }
        self.start_message(out);

        let tail = self.splitter.finish();
        self.route_split_events(tail, out);
        let withheld = match self.gate.finish() {
            Some(GateRemainder::Text(text)) => {
                self.buffer_text(&text, out);
                None
            }
            Some(GateRemainder::Withheld(text)) => Some(text),
            None => None,
        };
        if let Some(text) = self.aggregator.close() {
            self.emit_text(&text, out);
        }

        let mut stop = self.stop_reason.unwrap_or(StopReason::EndTurn);
        if let Some(withheld) = withheld {
            if self.recover_calls(&withheld, out) {
                stop = StopReason::ToolUse;
            }
        }
        self.close_open(out);
        if self.summary.native_calls > 0 {
            stop = StopReason::ToolUse;
        }
        self.finish_message(stop, out);
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    fn process_content(&mut self, content: &str, out: &mut Vec<AnthropicStreamEvent>) {
        if content.is_empty() {
            return;
        }
        self.accumulate(content);
        self.splitter.feed_str(content);
        let events = self.splitter.drain_ready();
        self.route_split_events(events, out);
    }

    fn accumulate(&mut self, content: &str) {
        if !self.recovery || self.abandoned {
            return;
        }
        if self.accumulated.len() + content.len() > self.settings.accumulation_cap {
            warn!(
                cap = self.settings.accumulation_cap,
                "accumulated content over cap, tool call recovery abandoned for this stream"
            );
            self.abandon_recovery();
            return;
        }
        self.accumulated.push_str(content);
    }

    /// The gate keeps screening; only parsing stops.
    fn abandon_recovery(&mut self) {
        self.abandoned = true;
        self.accumulated = String::new();
    }

    /// Withheld text goes out only after sanitizing.
    fn release_withheld(&mut self, withheld: &str, out: &mut Vec<AnthropicStreamEvent>) {
        let prose = sanitize_content(withheld, self.ctx.trigger());
        if !prose.trim().is_empty() {
            self.buffer_text(&prose, out);
        }
    }

    fn route_split_events(&mut self, events: Vec<SplitEvent>, out: &mut Vec<AnthropicStreamEvent>) {
        for event in events {
            match event {
                SplitEvent::Text(text) => self.route_text(&text, out),
                SplitEvent::Thinking(thinking) => {
                    self.flush_text(out);
                    self.emit_thinking(thinking, out);
                }
            }
        }
    }

    fn route_text(&mut self, text: &str, out: &mut Vec<AnthropicStreamEvent>) {
        if !self.recovery {
            self.buffer_text(text, out);
            return;
        }
        match self.gate.feed(text) {
            GateAction::PassThrough(text) => self.buffer_text(&text, out),
            GateAction::Hold => {}
            GateAction::Withhold { text_before } => self.buffer_text(&text_before, out),
            GateAction::Overflow {
                text_before,
                withheld,
            } => {
                warn!(
                    cap = self.settings.accumulation_cap,
                    "withheld text over cap, later text is dropped"
                );
                self.buffer_text(&text_before, out);
                self.abandon_recovery();
                self.release_withheld(&withheld, out);
            }
        }
    }

    fn buffer_text(&mut self, text: &str, out: &mut Vec<AnthropicStreamEvent>) {
        if text.is_empty() {
            return;
        }
        if self.aggregator.append(text).is_err() {
            self.emit_text(text, out);
        }
    }

    fn flush_text(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if let Some(text) = self.aggregator.flush(self.clock) {
            self.emit_text(&text, out);
        }
    }

    // -----------------------------------------------------------------------
    // Tool calls
    // -----------------------------------------------------------------------

    fn process_native_tools(
        &mut self,
        tool_calls: &[OpenAiStreamToolCall],
        out: &mut Vec<AnthropicStreamEvent>,
    ) {
        for call in tool_calls {
            let arguments = call
                .function
                .as_ref()
                .and_then(|f| f.arguments.as_deref())
                .unwrap_or("");
            if let Some(&index) = self.native_tools.get(&call.index) {
                if self.open
                    != Some(OpenBlock {
                        index,
                        kind: BlockKind::ToolUse,
                    })
                {
                    warn!(tool_index = call.index, "late tool argument delta dropped");
                    continue;
                }
                self.push_json_delta(index, arguments, out);
                continue;
            }

            self.flush_text(out);
            let id = call
                .id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map_or_else(next_tool_use_id, str::to_string);
            let name = call
                .function
                .as_ref()
                .and_then(|f| f.name.as_deref())
                .unwrap_or("");
            let name = self.ctx.tool_names.resolve(name).to_string();
            let index = self.open_block(
                AnthropicContentBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
                out,
            );
            self.native_tools.insert(call.index, index);
            self.summary.native_calls += 1;
            self.push_json_delta(index, arguments, out);
        }
    }

    /// Parse the accumulated text and emit the recovered calls. Returns
    /// whether any call was emitted.
    fn recover_calls(&mut self, withheld: &str, out: &mut Vec<AnthropicStreamEvent>) -> bool {
        if self.abandoned {
            let prose = sanitize_content(withheld, self.ctx.trigger());
            if !prose.trim().is_empty() {
                self.emit_text(&prose, out);
            }
            return false;
        }
        let trigger = self.ctx.trigger();
        let calls = normalize_calls(
            parse_function_calls(&self.accumulated, trigger),
            &self.ctx.tool_names,
        );
        let prose = sanitize_content(withheld, trigger);
        if !prose.trim().is_empty() {
            self.emit_text(&prose, out);
        }
        if calls.is_empty() {
            return false;
        }

        self.close_open(out);
        for call in &calls {
            let index = self.open_block(
                AnthropicContentBlock::ToolUse {
                    id: next_tool_use_id(),
                    name: call.name.clone(),
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
                out,
            );
            self.push_json_delta(index, &call.args_json(), out);
            self.close_open(out);
        }
        self.summary.recovered_calls += calls.len();
        true
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    fn start_message(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.phase != Phase::Idle {
            return;
        }
        self.phase = Phase::Streaming;
        out.push(AnthropicStreamEvent::MessageStart {
            message: AnthropicMessageStart::new(self.message_id.clone(), self.ctx.model.clone()),
        });
    }

    fn open_block(
        &mut self,
        content_block: AnthropicContentBlock,
        out: &mut Vec<AnthropicStreamEvent>,
    ) -> usize {
        self.close_open(out);
        let index = self.next_index;
        self.next_index += 1;
        self.open = Some(OpenBlock {
            index,
            kind: content_block.kind(),
        });
        out.push(AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block,
        });
        index
    }

    fn close_open(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if let Some(open) = self.open.take() {
            out.push(AnthropicStreamEvent::ContentBlockStop { index: open.index });
        }
    }

    fn emit_text(&mut self, text: &str, out: &mut Vec<AnthropicStreamEvent>) {
        if text.is_empty() {
            return;
        }
        let index = match self.open {
            Some(OpenBlock {
                index,
                kind: BlockKind::Text,
            }) => index,
            _ => self.open_block(
                AnthropicContentBlock::Text {
                    text: String::new(),
                },
                out,
            ),
        };
        self.output.add(text);
        out.push(AnthropicStreamEvent::text_delta(index, text));
    }

    fn emit_thinking(&mut self, thinking: String, out: &mut Vec<AnthropicStreamEvent>) {
        let index = self.open_block(
            AnthropicContentBlock::Thinking {
                thinking: String::new(),
                signature: String::new(),
            },
            out,
        );
        self.output.add(&thinking);
        out.push(AnthropicStreamEvent::ContentBlockDelta {
            index,
            delta: AnthropicDelta::ThinkingDelta { thinking },
        });
        self.close_open(out);
    }

    fn push_json_delta(&mut self, index: usize, json: &str, out: &mut Vec<AnthropicStreamEvent>) {
        if json.is_empty() {
            return;
        }
        self.output.add(json);
        out.push(AnthropicStreamEvent::ContentBlockDelta {
            index,
            delta: AnthropicDelta::InputJsonDelta {
                partial_json: json.to_string(),
            },
        });
    }

    // -----------------------------------------------------------------------
    // Termination
    // -----------------------------------------------------------------------

    fn finish_message(&mut self, stop: StopReason, out: &mut Vec<AnthropicStreamEvent>) {
        let usage = resolve_usage(
            self.upstream_usage.as_ref(),
            self.output.tokens(),
            self.settings.usage_multiplier,
        );
        out.push(AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDeltaBody {
                stop_reason: Some(stop.as_str().to_string()),
                stop_sequence: None,
            },
            usage,
        });
        out.push(AnthropicStreamEvent::MessageStop {});

        self.final_sent = true;
        self.phase = Phase::Finalized;
        self.summary.blocks = self.next_index;
        self.summary.input_bytes = self.input_bytes;
        self.summary.stop_reason = stop;
        self.summary.usage = usage;
    }

    fn abort_oversize(&mut self, out: &mut Vec<AnthropicStreamEvent>) -> BridgeError {
        let err = BridgeError::OversizeInput {
            size: self.input_bytes,
            limit: self.settings.max_input_bytes,
        };
        warn!(
            size = self.input_bytes,
            limit = self.settings.max_input_bytes,
            "upstream input over limit, aborting stream"
        );
        self.start_message(out);
        self.flush_text(out);
        self.close_open(out);
        out.push(AnthropicStreamEvent::error(
            anthropic_error_type(ErrorCategory::PayloadTooLarge),
            err.to_string(),
        ));
        let stop = self.stop_reason.unwrap_or(StopReason::EndTurn);
        self.finish_message(stop, out);
        err
    }
}
