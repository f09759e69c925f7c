//! Separates `<think>`/`<thinking>` reasoning spans from answer text in a
//! stream of deltas.
//!
//! Marker detection looks only at the last few characters seen, kept in a
//! fixed ring with an explicit write cursor, so each fed character costs a
//! constant number of comparisons no matter how long the pending span is.

const START_MARKERS: [&str; 2] = ["<thinking>", "<think>"];
const END_MARKERS: [&str; 2] = ["</thinking>", "</think>"];

const fn max_usize(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// Longest marker, in chars (all markers are ASCII).
const RING_CAP: usize = max_usize(
    max_usize(START_MARKERS[0].len(), START_MARKERS[1].len()),
    max_usize(END_MARKERS[0].len(), END_MARKERS[1].len()),
);

/// Quote-like characters a model sometimes leaves at the start of a
/// reasoning span.
const QUOTE_ARTIFACTS: [char; 7] = ['"', '\'', '`', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    Normal,
    Reasoning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitEvent {
    Text(String),
    Thinking(String),
}

// ---------------------------------------------------------------------------
// Ring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MarkerRing {
    slots: [char; RING_CAP],
    /// Next slot to write.
    cursor: usize,
    filled: usize,
}

impl MarkerRing {
    const fn new() -> Self {
        Self {
            slots: ['\0'; RING_CAP],
            cursor: 0,
            filled: 0,
        }
    }

    #[inline]
    fn push(&mut self, ch: char) {
        self.slots[self.cursor] = ch;
        self.cursor = (self.cursor + 1) % RING_CAP;
        if self.filled < RING_CAP {
            self.filled += 1;
        }
    }

    #[inline]
    fn clear(&mut self) {
        self.cursor = 0;
        self.filled = 0;
    }

    /// Whether the most recent chars spell `marker`.
    fn ends_with(&self, marker: &str) -> bool {
        let len = marker.len();
        if len > self.filled {
            return false;
        }
        let mut slot = self.cursor;
        for expected in marker.bytes().rev() {
            slot = if slot == 0 { RING_CAP - 1 } else { slot - 1 };
            if self.slots[slot] != char::from(expected) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Splitter
// ---------------------------------------------------------------------------

/// Per-stream reasoning splitter. Single owner, not shared across tasks.
#[derive(Debug, Clone)]
pub struct ReasoningSplitter {
    mode: SplitMode,
    ring: MarkerRing,
    /// Text of the current mode not yet emitted. Ends with the ring contents.
    pending: String,
    ready: Vec<SplitEvent>,
}

impl ReasoningSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: SplitMode::Normal,
            ring: MarkerRing::new(),
            pending: String::new(),
            ready: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> SplitMode {
        self.mode
    }

    /// Feed one character.
    pub fn feed(&mut self, ch: char) {
        self.pending.push(ch);
        self.ring.push(ch);

        let markers: &[&str] = match self.mode {
            SplitMode::Normal => &START_MARKERS,
            SplitMode::Reasoning => &END_MARKERS,
        };
        let Some(marker) = markers.iter().find(|m| self.ring.ends_with(m)) else {
            return;
        };

        let body_len = self.pending.len().saturating_sub(marker.len());
        self.pending.truncate(body_len);
        let body = std::mem::take(&mut self.pending);
        self.ring.clear();

        match self.mode {
            SplitMode::Normal => {
                if !body.is_empty() {
                    self.ready.push(SplitEvent::Text(body));
                }
                self.mode = SplitMode::Reasoning;
            }
            SplitMode::Reasoning => {
                let thinking = clean_thinking(&body);
                if !thinking.is_empty() {
                    self.ready.push(SplitEvent::Thinking(thinking.to_string()));
                }
                self.mode = SplitMode::Normal;
            }
        }
    }

    pub fn feed_str(&mut self, text: &str) {
        for ch in text.chars() {
            self.feed(ch);
        }
    }

    /// Take completed events. In `Normal` mode, pending text that cannot be
    /// the start of a marker is released as well, so answer text streams
    /// without waiting for the next marker.
    pub fn drain_ready(&mut self) -> Vec<SplitEvent> {
        if self.mode == SplitMode::Normal && !self.pending.is_empty() {
            let hold = held_suffix_len(&self.pending);
            let release = self.pending.len() - hold;
            if release > 0 {
                let tail = self.pending.split_off(release);
                let text = std::mem::replace(&mut self.pending, tail);
                self.ready.push(SplitEvent::Text(text));
            }
        }
        std::mem::take(&mut self.ready)
    }

    /// End of input: emit everything still buffered as an event of the
    /// current mode and reset to `Normal`.
    pub fn finish(&mut self) -> Vec<SplitEvent> {
        let rest = std::mem::take(&mut self.pending);
        match self.mode {
            SplitMode::Normal => {
                if !rest.is_empty() {
                    self.ready.push(SplitEvent::Text(rest));
                }
            }
            SplitMode::Reasoning => {
                let thinking = clean_thinking(&rest);
                if !thinking.is_empty() {
                    self.ready.push(SplitEvent::Thinking(thinking.to_string()));
                }
            }
        }
        self.mode = SplitMode::Normal;
        self.ring.clear();
        std::mem::take(&mut self.ready)
    }
}

impl Default for ReasoningSplitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the longest suffix of `pending` that is a proper prefix of a
/// start marker.
fn held_suffix_len(pending: &str) -> usize {
    let bytes = pending.as_bytes();
    let longest = RING_CAP.saturating_sub(1).min(bytes.len());
    for len in (1..=longest).rev() {
        let suffix = &bytes[bytes.len() - len..];
        if START_MARKERS
            .iter()
            .any(|m| m.len() > len && m.as_bytes().starts_with(suffix))
        {
            return len;
        }
    }
    0
}

/// Trim a reasoning span and drop one leading quote artifact when it is
/// followed by whitespace.
fn clean_thinking(raw: &str) -> &str {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) if QUOTE_ARTIFACTS.contains(&first) && second.is_whitespace() => {
            trimmed[first.len_utf8()..].trim_start()
        }
        (Some(first), None) if QUOTE_ARTIFACTS.contains(&first) => "",
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> Vec<SplitEvent> {
        let mut splitter = ReasoningSplitter::new();
        let mut events = Vec::new();
        for chunk in chunks {
            splitter.feed_str(chunk);
            events.extend(splitter.drain_ready());
        }
        events.extend(splitter.finish());
        events
    }

    /// Merge adjacent events of the same kind, the way a client would see
    /// them once deltas are concatenated.
    fn merged(events: Vec<SplitEvent>) -> Vec<SplitEvent> {
        let mut out: Vec<SplitEvent> = Vec::new();
        for event in events {
            match (out.last_mut(), event) {
                (Some(SplitEvent::Text(prev)), SplitEvent::Text(next)) => prev.push_str(&next),
                (_, event) => out.push(event),
            }
        }
        out
    }

    #[test]
    fn plain_text_streams_immediately() {
        let mut splitter = ReasoningSplitter::new();
        splitter.feed_str("Hello world");
        assert_eq!(
            splitter.drain_ready(),
            vec![SplitEvent::Text("Hello world".to_string())]
        );
    }

    #[test]
    fn partial_marker_is_held_back() {
        let mut splitter = ReasoningSplitter::new();
        splitter.feed_str("Answer <thi");
        assert_eq!(
            splitter.drain_ready(),
            vec![SplitEvent::Text("Answer ".to_string())]
        );
        splitter.feed_str("nk>plan</think>done");
        assert_eq!(
            splitter.drain_ready(),
            vec![
                SplitEvent::Thinking("plan".to_string()),
                SplitEvent::Text("done".to_string())
            ]
        );
    }

    #[test]
    fn thinking_survives_any_chunk_boundary() {
        let input = "Intro <thinking> step one\nstep two </thinking>Answer";
        for split in 1..input.len() {
            let (a, b) = input.split_at(split);
            let events = merged(run(&[a, b]));
            assert_eq!(
                events,
                vec![
                    SplitEvent::Text("Intro ".to_string()),
                    SplitEvent::Thinking("step one\nstep two".to_string()),
                    SplitEvent::Text("Answer".to_string()),
                ],
                "split at {split}"
            );
        }
    }

    #[test]
    fn char_by_char_feed() {
        let input = "<think>x</think>y";
        let chunks: Vec<String> = input.chars().map(String::from).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(
            merged(run(&refs)),
            vec![
                SplitEvent::Thinking("x".to_string()),
                SplitEvent::Text("y".to_string())
            ]
        );
    }

    #[test]
    fn leading_quote_artifact_is_stripped() {
        assert_eq!(
            run(&["<think>\" considering options</think>"]),
            vec![SplitEvent::Thinking("considering options".to_string())]
        );
        assert_eq!(
            run(&["<think>\"quoted\" stays</think>"]),
            vec![SplitEvent::Thinking("\"quoted\" stays".to_string())]
        );
    }

    #[test]
    fn finish_flushes_current_mode() {
        assert_eq!(
            run(&["<think>unterminated"]),
            vec![SplitEvent::Thinking("unterminated".to_string())]
        );
        assert_eq!(
            merged(run(&["tail <thi"])),
            vec![SplitEvent::Text("tail <thi".to_string())]
        );
    }

    #[test]
    fn empty_reasoning_emits_nothing() {
        assert_eq!(
            merged(run(&["<think>  </think>after"])),
            vec![SplitEvent::Text("after".to_string())]
        );
    }

    #[test]
    fn multibyte_text_is_preserved() {
        assert_eq!(
            merged(run(&["caf\u{e9} <think>\u{1f600}</think>\u{4f60}\u{597d}"])),
            vec![
                SplitEvent::Text("caf\u{e9} ".to_string()),
                SplitEvent::Thinking("\u{1f600}".to_string()),
                SplitEvent::Text("\u{4f60}\u{597d}".to_string()),
            ]
        );
    }

    #[test]
    fn ring_matches_only_recent_chars() {
        let mut ring = MarkerRing::new();
        for ch in "xx<think>".chars() {
            ring.push(ch);
        }
        assert!(ring.ends_with("<think>"));
        assert!(!ring.ends_with("<thinking>"));
        for ch in "abcdefghijklmnop".chars() {
            ring.push(ch);
        }
        assert!(!ring.ends_with("<think>"));
    }
}
