use std::time::{Duration, Instant};

/// Returned by [`Aggregator::append`] once the aggregator has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("aggregator is closed")]
pub struct AggregatorClosed;

/// Time-windowed batching of text deltas.
///
/// Upstreams often send one token per chunk; batching them into windows of
/// `interval` keeps the downstream event count proportional to wall time
/// instead of token count. Single producer, owned by the stream task.
#[derive(Debug)]
pub struct Aggregator {
    buffer: String,
    interval: Duration,
    last_emit: Instant,
    closed: bool,
}

impl Aggregator {
    #[must_use]
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            buffer: String::new(),
            interval,
            last_emit: now,
            closed: false,
        }
    }

    /// # Errors
    ///
    /// Returns [`AggregatorClosed`] after [`Aggregator::close`].
    pub fn append(&mut self, text: &str) -> Result<(), AggregatorClosed> {
        if self.closed {
            return Err(AggregatorClosed);
        }
        self.buffer.push_str(text);
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Emit the buffer when at least `interval` has passed since the last
    /// emission.
    pub fn maybe_flush(&mut self, now: Instant) -> Option<String> {
        if self.buffer.is_empty() || now.saturating_duration_since(self.last_emit) < self.interval
        {
            return None;
        }
        self.last_emit = now;
        Some(std::mem::take(&mut self.buffer))
    }

    /// Emit whatever is buffered, regardless of timing. The next window
    /// starts at `now`.
    pub fn flush(&mut self, now: Instant) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        self.last_emit = now;
        Some(std::mem::take(&mut self.buffer))
    }

    /// Flush and reject further input.
    pub fn close(&mut self) -> Option<String> {
        self.closed = true;
        if self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(35);

    #[test]
    fn batches_until_interval_elapses() {
        let start = Instant::now();
        let mut agg = Aggregator::new(WINDOW, start);
        agg.append("a").expect("open");
        agg.append("b").expect("open");
        assert_eq!(agg.maybe_flush(start + Duration::from_millis(10)), None);
        assert_eq!(
            agg.maybe_flush(start + WINDOW),
            Some("ab".to_string())
        );
        agg.append("c").expect("open");
        assert_eq!(agg.maybe_flush(start + WINDOW + Duration::from_millis(34)), None);
        assert_eq!(
            agg.maybe_flush(start + WINDOW * 2),
            Some("c".to_string())
        );
    }

    #[test]
    fn empty_buffer_never_emits() {
        let start = Instant::now();
        let mut agg = Aggregator::new(WINDOW, start);
        assert_eq!(agg.maybe_flush(start + WINDOW * 10), None);
        assert_eq!(agg.flush(start), None);
    }

    #[test]
    fn flush_ignores_timing() {
        let start = Instant::now();
        let mut agg = Aggregator::new(WINDOW, start);
        agg.append("now").expect("open");
        assert_eq!(agg.flush(start), Some("now".to_string()));
        assert!(agg.is_empty());
    }

    #[test]
    fn forced_flush_restarts_the_window() {
        let start = Instant::now();
        let mut agg = Aggregator::new(WINDOW, start);
        let forced = start + WINDOW * 3;
        agg.append("early").expect("open");
        assert_eq!(agg.flush(forced), Some("early".to_string()));
        agg.append("x").expect("open");
        assert_eq!(agg.maybe_flush(forced + Duration::from_millis(1)), None);
        assert_eq!(agg.maybe_flush(forced + WINDOW), Some("x".to_string()));
    }

    #[test]
    fn close_flushes_and_rejects_input() {
        let start = Instant::now();
        let mut agg = Aggregator::new(WINDOW, start);
        agg.append("last").expect("open");
        assert_eq!(agg.close(), Some("last".to_string()));
        assert!(agg.is_closed());
        assert_eq!(agg.append("late"), Err(AggregatorClosed));
        assert_eq!(agg.close(), None);
    }
}
