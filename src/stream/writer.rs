//! Downstream writer with backpressure and bounded retries.
//!
//! Critical lifecycle frames (block start/stop, message start/delta/stop,
//! errors) are retried a few times before the writer gives up; content
//! deltas are best effort. Once a send fails terminally the writer is closed
//! for good and every later send fails fast.
use std::future::Future;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::StreamConfig;
use crate::error::BridgeError;
use crate::protocol::anthropic::stream::encode_anthropic_sse_frame;
use crate::protocol::anthropic::AnthropicStreamEvent;

/// Failure of a single frame send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The consumer is gone. Retrying cannot help.
    #[error("downstream closed")]
    Closed,
    /// The consumer did not accept the frame in time.
    #[error("downstream send timed out")]
    Timeout,
}

/// Destination for encoded SSE frames.
pub trait FrameSink: Send {
    fn send_frame(&mut self, frame: Bytes) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Production sink: a bounded channel feeding the HTTP response body.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    send_timeout: Duration,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Bytes>, send_timeout: Duration) -> Self {
        Self { tx, send_timeout }
    }
}

impl FrameSink for ChannelSink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), SinkError> {
        match self.tx.send_timeout(frame, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(SinkError::Timeout),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}

/// Writer tuning, read once from [`StreamConfig`].
#[derive(Debug, Clone, Copy)]
pub struct WriterSettings {
    pub backpressure_threshold: usize,
    pub idle_reset: Duration,
    pub backoff: Duration,
    pub retry_max: u32,
    pub retry_backoff: Duration,
}

impl WriterSettings {
    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            backpressure_threshold: config.backpressure_threshold,
            idle_reset: Duration::from_millis(config.backpressure_idle_reset_ms),
            backoff: Duration::from_millis(config.backpressure_backoff_ms),
            retry_max: config.write_retry_max,
            retry_backoff: Duration::from_millis(config.write_retry_backoff_ms),
        }
    }
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

/// Counters for the per-stream summary log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub frames: u64,
    pub bytes: u64,
    pub retries: u64,
    pub backoffs: u64,
}

pub struct BackpressureWriter<S: FrameSink> {
    sink: S,
    settings: WriterSettings,
    pending: usize,
    last_write: Option<Instant>,
    closed: bool,
    stats: WriterStats,
    scratch: String,
}

impl<S: FrameSink> BackpressureWriter<S> {
    #[must_use]
    pub fn new(sink: S, settings: WriterSettings) -> Self {
        Self {
            sink,
            settings,
            pending: 0,
            last_write: None,
            closed: false,
            stats: WriterStats::default(),
            scratch: String::with_capacity(256),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    #[inline]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Encode and send one event. Encoding failures are logged and the
    /// event is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DownstreamWriteFailure`] when the writer is or
    /// becomes closed.
    pub async fn send_event(&mut self, event: &AnthropicStreamEvent) -> Result<(), BridgeError> {
        self.scratch.clear();
        if let Err(err) = encode_anthropic_sse_frame(event, &mut self.scratch) {
            tracing::warn!(error = %err, event = event.event_name(), "skipping event");
            return Ok(());
        }
        let frame = Bytes::from(std::mem::take(&mut self.scratch));
        self.send(frame, event.is_critical()).await
    }

    /// Send one encoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DownstreamWriteFailure`] when the writer is or
    /// becomes closed.
    pub async fn send(&mut self, frame: Bytes, critical: bool) -> Result<(), BridgeError> {
        if self.closed {
            return Err(closed_error());
        }

        if let Some(last) = self.last_write {
            if last.elapsed() >= self.settings.idle_reset {
                self.pending = 0;
            }
        }
        if self.pending >= self.settings.backpressure_threshold {
            self.stats.backoffs += 1;
            tokio::time::sleep(self.settings.backoff).await;
            self.pending = 0;
        }

        let attempts = if critical {
            self.settings.retry_max.saturating_add(1)
        } else {
            1
        };
        let len = frame.len() as u64;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sink.send_frame(frame.clone()).await {
                Ok(()) => {
                    self.pending += 1;
                    self.last_write = Some(Instant::now());
                    self.stats.frames += 1;
                    self.stats.bytes += len;
                    return Ok(());
                }
                Err(SinkError::Timeout) if attempt < attempts => {
                    self.stats.retries += 1;
                    tracing::debug!(attempt, "downstream busy, retrying frame");
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(err) => {
                    self.closed = true;
                    tracing::debug!(error = %err, critical, attempt, "closing downstream writer");
                    return Err(BridgeError::DownstreamWriteFailure(err.to_string()));
                }
            }
        }
    }
}

fn closed_error() -> BridgeError {
    BridgeError::DownstreamWriteFailure("writer closed".to_string())
}
