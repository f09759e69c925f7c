//! Incremental decoding of the upstream SSE byte stream.
//!
//! Bytes arrive in arbitrary chunks: a UTF-8 sequence, a line or a frame can
//! be cut anywhere. [`SseDecoder`] carries the partial UTF-8 tail between
//! chunks and hands complete text to [`SseParser`], which assembles frames.
use memchr::memchr_iter;

/// One dispatched SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// `data: [DONE]`, the `OpenAI` end-of-stream sentinel.
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

// ---------------------------------------------------------------------------
// SseParser
// ---------------------------------------------------------------------------

/// Line-oriented SSE frame assembler.
///
/// - `data:` lines append to the frame (one leading space stripped, multiple
///   lines joined with `\n`)
/// - `event:` names the frame
/// - `:` comments, `id:`, `retry:` and unknown fields are ignored
/// - a blank line dispatches the frame if it carried any data
#[derive(Debug, Default)]
pub struct SseParser {
    line: String,
    event_type: Option<String>,
    data: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed text and append complete frames into `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        let mut consumed = 0;
        for pos in memchr_iter(b'\n', chunk.as_bytes()) {
            let piece = &chunk[consumed..pos];
            consumed = pos + 1;
            if self.line.is_empty() {
                self.process_line(strip_cr(piece), out);
            } else {
                let mut line = std::mem::take(&mut self.line);
                line.push_str(piece);
                self.process_line(strip_cr(&line), out);
            }
        }
        self.line.push_str(&chunk[consumed..]);
    }

    #[must_use]
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// End of input. A final frame missing its blank line is still
    /// dispatched.
    pub fn finish(&mut self, out: &mut Vec<SseEvent>) {
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            self.process_line(strip_cr(&line), out);
        }
        self.dispatch(out);
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if self.has_data {
                self.data.push('\n');
            }
            self.has_data = true;
            self.data.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.event_type = Some(value.to_string());
        }
    }

    fn dispatch(&mut self, out: &mut Vec<SseEvent>) {
        if !self.has_data {
            self.event_type = None;
            return;
        }
        self.has_data = false;
        out.push(SseEvent {
            event: self.event_type.take(),
            data: std::mem::take(&mut self.data),
        });
    }
}

#[inline]
fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

// ---------------------------------------------------------------------------
// SseDecoder
// ---------------------------------------------------------------------------

/// Bytes-to-frames decoder for one upstream body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    parser: SseParser,
    /// Incomplete UTF-8 sequence from the end of the previous chunk.
    remainder: Vec<u8>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk. Invalid UTF-8 sequences are replaced with
    /// U+FFFD; a sequence cut by the chunk boundary is carried over.
    pub fn feed_bytes(&mut self, bytes: &[u8], out: &mut Vec<SseEvent>) {
        if self.remainder.is_empty() {
            let carried = self.decode(bytes, out);
            self.remainder.extend_from_slice(carried);
            return;
        }
        let mut joined = std::mem::take(&mut self.remainder);
        joined.extend_from_slice(bytes);
        let carried = self.decode(&joined, out).to_vec();
        self.remainder = carried;
    }

    /// End of input.
    pub fn finish(&mut self, out: &mut Vec<SseEvent>) {
        if !self.remainder.is_empty() {
            let tail = std::mem::take(&mut self.remainder);
            self.parser
                .feed_into(&String::from_utf8_lossy(&tail), out);
        }
        self.parser.finish(out);
    }

    /// Decode as much of `bytes` as possible; returns the incomplete tail.
    fn decode<'b>(&mut self, mut bytes: &'b [u8], out: &mut Vec<SseEvent>) -> &'b [u8] {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.parser.feed_into(text, out);
                    return &[];
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.parser.feed_into(text, out);
                    }
                    match err.error_len() {
                        // Truncated sequence at the end: wait for more bytes.
                        None => return rest,
                        Some(bad) => {
                            self.parser.feed_into("\u{fffd}", out);
                            bytes = &rest[bad..];
                        }
                    }
                }
            }
        }
    }
}
