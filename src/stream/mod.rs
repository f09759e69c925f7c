pub mod aggregator;
pub mod converter;
pub mod gate;
pub mod splitter;
pub mod sse;
pub mod writer;

pub use aggregator::{Aggregator, AggregatorClosed};
pub use converter::{StreamConverter, StreamSummary};
pub use gate::{CallGate, GateAction, GateRemainder};
pub use splitter::{ReasoningSplitter, SplitEvent, SplitMode};
pub use sse::{SseDecoder, SseEvent, SseParser};
pub use writer::{BackpressureWriter, ChannelSink, FrameSink, SinkError, WriterSettings};

use std::fmt::Display;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::observability::log_stream_complete;
use crate::protocol::anthropic::AnthropicStreamEvent;

/// Drive one conversion: read the upstream SSE body, feed the converter and
/// write its events downstream.
///
/// Upstream EOF and read errors both end in a normal finalize. Oversize input
/// ends the stream after the error event. A closed writer stops the driver at
/// the next write without further output.
pub async fn run_stream_conversion<B, E, S>(
    body: B,
    mut converter: StreamConverter,
    writer: &mut BackpressureWriter<S>,
) -> StreamSummary
where
    B: Stream<Item = Result<Bytes, E>>,
    E: Display,
    S: FrameSink,
{
    let started = Instant::now();
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();
    let mut frames: Vec<SseEvent> = Vec::with_capacity(8);
    let mut events: Vec<AnthropicStreamEvent> = Vec::with_capacity(16);
    let tick_interval = converter.tick_interval();

    'read: loop {
        let next = match tokio::time::timeout(tick_interval, body.next()).await {
            Ok(next) => next,
            Err(_) => {
                converter.tick(Instant::now(), &mut events);
                if write_events(writer, &mut events).await.is_err() {
                    break 'read;
                }
                continue;
            }
        };
        match next {
            Some(Ok(bytes)) => decoder.feed_bytes(&bytes, &mut frames),
            Some(Err(err)) => {
                warn!(error = %err, "upstream read failed, finalizing stream");
                break 'read;
            }
            None => break 'read,
        }

        let stop = feed_frames(&mut converter, &mut frames, &mut events);
        if write_events(writer, &mut events).await.is_err() || stop || converter.is_finalized() {
            return complete(converter, writer, started);
        }
    }

    if !writer.is_closed() {
        decoder.finish(&mut frames);
        let _ = feed_frames(&mut converter, &mut frames, &mut events);
        converter.finalize(&mut events);
        let _ = write_events(writer, &mut events).await;
    }
    complete(converter, writer, started)
}

/// Returns `true` when the stream must end early.
fn feed_frames(
    converter: &mut StreamConverter,
    frames: &mut Vec<SseEvent>,
    events: &mut Vec<AnthropicStreamEvent>,
) -> bool {
    for frame in frames.drain(..) {
        match converter.process_data(&frame.data, Instant::now(), events) {
            Ok(()) => {}
            Err(err) if err.is_stream_fatal() => return true,
            Err(err) => warn!(error = %err, "skipping upstream chunk"),
        }
    }
    false
}

async fn write_events<S: FrameSink>(
    writer: &mut BackpressureWriter<S>,
    events: &mut Vec<AnthropicStreamEvent>,
) -> Result<(), BridgeError> {
    for event in events.drain(..) {
        if let Err(err) = writer.send_event(&event).await {
            debug!(error = %err, "downstream gone, stopping stream");
            return Err(err);
        }
    }
    Ok(())
}

fn complete<S: FrameSink>(
    converter: StreamConverter,
    writer: &BackpressureWriter<S>,
    started: Instant,
) -> StreamSummary {
    let summary = converter.summary().clone();
    log_stream_complete(&summary, &writer.stats(), started.elapsed());
    summary
}
