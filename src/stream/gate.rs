//! Streaming screen for tool-call artifacts.
//!
//! Answer text flows to the client as it arrives until the first trigger
//! or call-markup opener shows up. From that point on everything is withheld
//! and handed to the finalizer, which recovers the calls and sanitizes
//! whatever prose remains. A possible marker cut in half by a chunk boundary
//! is held back until the next chunk decides it. Withheld text never goes
//! back to the client raw: past the cap it is handed over once for
//! sanitizing and the rest of the stream is dropped.
use memchr::{memchr_iter, memmem};

/// Openers of the textual call dialects, matched ASCII case-insensitively.
const ARTIFACT_MARKERS: [&str; 6] = [
    "<function_calls",
    "<function_call",
    "<invoke",
    "<invocation",
    "<tool_call",
    "<>",
];

const fn max_usize(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

const MAX_ARTIFACT_LEN: usize = max_usize(
    max_usize(ARTIFACT_MARKERS[0].len(), ARTIFACT_MARKERS[1].len()),
    max_usize(
        max_usize(ARTIFACT_MARKERS[2].len(), ARTIFACT_MARKERS[3].len()),
        max_usize(ARTIFACT_MARKERS[4].len(), ARTIFACT_MARKERS[5].len()),
    ),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Passing text through while looking for markers.
    Screening,
    /// A marker was seen; text is being withheld.
    Withholding,
    /// The withheld buffer overflowed; later text is dropped.
    Discarding,
}

/// Action returned by [`CallGate::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    /// Forward this text to the client.
    PassThrough(String),
    /// Nothing to forward yet.
    Hold,
    /// A marker was found. `text_before` is still client text; the rest is
    /// withheld.
    Withhold { text_before: String },
    /// The withheld buffer exceeded its cap. `text_before` is client text;
    /// `withheld` must be sanitized before it is shown, and recovery is
    /// abandoned for this stream.
    Overflow {
        text_before: String,
        withheld: String,
    },
}

/// Whatever the gate still holds when the stream ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRemainder {
    /// A held partial marker that never completed: ordinary text.
    Text(String),
    /// Text from the first marker onward.
    Withheld(String),
}

#[derive(Debug)]
pub struct CallGate {
    trigger: Option<String>,
    buffer: String,
    state: GateState,
    max_buffer_size: usize,
}

impl CallGate {
    #[must_use]
    pub fn new(trigger: Option<&str>, max_buffer_size: usize) -> Self {
        Self {
            trigger: trigger.filter(|t| !t.is_empty()).map(str::to_string),
            buffer: String::new(),
            state: GateState::Screening,
            max_buffer_size,
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn feed(&mut self, text: &str) -> GateAction {
        if text.is_empty() {
            return GateAction::Hold;
        }
        match self.state {
            GateState::Discarding => GateAction::Hold,
            GateState::Withholding => {
                self.buffer.push_str(text);
                if self.buffer.len() > self.max_buffer_size {
                    self.state = GateState::Discarding;
                    return GateAction::Overflow {
                        text_before: String::new(),
                        withheld: std::mem::take(&mut self.buffer),
                    };
                }
                GateAction::Hold
            }
            GateState::Screening => self.feed_screening(text),
        }
    }

    fn feed_screening(&mut self, text: &str) -> GateAction {
        // Fast path: nothing held and no possible marker start in this chunk.
        if self.buffer.is_empty() && !text.contains('<') && !self.may_hit_trigger(text) {
            return GateAction::PassThrough(text.to_string());
        }

        self.buffer.push_str(text);
        if let Some(hit) = self.first_marker(&self.buffer) {
            let tail = self.buffer.split_off(hit);
            let text_before = std::mem::replace(&mut self.buffer, tail);
            self.state = GateState::Withholding;
            if self.buffer.len() > self.max_buffer_size {
                self.state = GateState::Discarding;
                return GateAction::Overflow {
                    text_before,
                    withheld: std::mem::take(&mut self.buffer),
                };
            }
            return GateAction::Withhold { text_before };
        }

        let hold = self.held_suffix_len(&self.buffer);
        let release = self.buffer.len() - hold;
        if release == 0 {
            return GateAction::Hold;
        }
        let tail = self.buffer.split_off(release);
        GateAction::PassThrough(std::mem::replace(&mut self.buffer, tail))
    }

    /// End of stream.
    pub fn finish(&mut self) -> Option<GateRemainder> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(match self.state {
            GateState::Withholding => GateRemainder::Withheld(rest),
            GateState::Screening => GateRemainder::Text(rest),
            GateState::Discarding => return None,
        })
    }

    #[inline]
    fn may_hit_trigger(&self, text: &str) -> bool {
        self.trigger
            .as_deref()
            .and_then(|t| t.as_bytes().first().copied())
            .is_some_and(|first| first != b'<' && memchr::memchr(first, text.as_bytes()).is_some())
    }

    /// Byte offset of the earliest trigger or artifact opener.
    fn first_marker(&self, haystack: &str) -> Option<usize> {
        let bytes = haystack.as_bytes();
        let trigger_at = self
            .trigger
            .as_deref()
            .and_then(|t| memmem::find(bytes, t.as_bytes()));
        let artifact_at = memchr_iter(b'<', bytes).find(|&i| {
            ARTIFACT_MARKERS
                .iter()
                .any(|m| starts_with_ignore_ascii_case(&bytes[i..], m.as_bytes()))
        });
        match (trigger_at, artifact_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Length of the longest suffix that could still grow into a marker.
    fn held_suffix_len(&self, haystack: &str) -> usize {
        let bytes = haystack.as_bytes();
        let trigger_len = self.trigger.as_deref().map_or(0, str::len);
        let longest = max_usize(MAX_ARTIFACT_LEN, trigger_len)
            .saturating_sub(1)
            .min(bytes.len());
        for len in (1..=longest).rev() {
            let start = bytes.len() - len;
            if !haystack.is_char_boundary(start) {
                continue;
            }
            let suffix = &bytes[start..];
            let artifact_prefix = ARTIFACT_MARKERS
                .iter()
                .any(|m| m.len() > len && starts_with_ignore_ascii_case(m.as_bytes(), suffix));
            let trigger_prefix = self
                .trigger
                .as_deref()
                .is_some_and(|t| t.len() > len && t.as_bytes().starts_with(suffix));
            if artifact_prefix || trigger_prefix {
                return len;
            }
        }
        0
    }
}

#[inline]
fn starts_with_ignore_ascii_case(haystack: &[u8], prefix: &[u8]) -> bool {
    haystack.len() >= prefix.len() && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
}
