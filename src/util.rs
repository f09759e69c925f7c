use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use regex_lite::{Regex, Replacer};

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static ID_SEED: LazyLock<u128> =
    LazyLock::new(|| (u128::from(fastrand::u64(..)) << 64) | u128::from(fastrand::u64(..)));
const HEX: &[u8; 16] = b"0123456789abcdef";
const ID_HEX_LEN: usize = 24;

#[inline]
pub(crate) fn mix_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Process-unique uuid: a random per-process seed mixed with a sequence
/// number. The high 64 bits differ for every call.
#[must_use]
pub(crate) fn next_uuid() -> uuid::Uuid {
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let salt = (u128::from(mix_u64(seq)) << 64) | u128::from(seq);
    uuid::Uuid::from_u128(*ID_SEED ^ salt)
}

/// `prefix` followed by 24 lowercase hex digits.
fn next_prefixed_id(prefix: &str) -> String {
    let mut buf = uuid::Uuid::encode_buffer();
    let hex = next_uuid().simple().encode_lower(&mut buf);
    let mut out = String::with_capacity(prefix.len() + ID_HEX_LEN);
    out.push_str(prefix);
    out.push_str(&hex[..ID_HEX_LEN]);
    out
}

#[inline]
pub(crate) fn next_message_id() -> String {
    next_prefixed_id("msg_")
}

#[inline]
pub(crate) fn next_tool_use_id() -> String {
    next_prefixed_id("toolu_")
}

// ---------------------------------------------------------------------------
// Regex helpers
// ---------------------------------------------------------------------------

/// Compile a static pattern. Patterns are literals, so `None` only surfaces
/// as a no-op rewrite rather than a panic at first use.
#[inline]
pub(crate) fn compile_regex(pattern: &str) -> Option<Regex> {
    Regex::new(pattern).ok()
}

#[inline]
pub(crate) fn regex_replace_all<'h, R: Replacer>(
    re: &Option<Regex>,
    haystack: &'h str,
    rep: R,
) -> Cow<'h, str> {
    match re {
        Some(re) => re.replace_all(haystack, rep),
        None => Cow::Borrowed(haystack),
    }
}

#[inline]
pub(crate) fn regex_is_match(re: &Option<Regex>, haystack: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(haystack))
}

// ---------------------------------------------------------------------------
// Hand-rolled JSON / number formatting for the SSE hot path
// ---------------------------------------------------------------------------

#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[inline]
pub(crate) fn push_u64_decimal(out: &mut String, mut n: u64) {
    if n == 0 {
        out.push('0');
        return;
    }

    let mut buf = [0u8; 20];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + ((n % 10) as u8);
        n /= 10;
    }
    let digits = std::str::from_utf8(&buf[i..]).unwrap_or("0");
    out.push_str(digits);
}

#[inline]
pub(crate) fn push_usize_decimal(out: &mut String, n: usize) {
    push_u64_decimal(out, n as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_fixed_width() {
        let msg = next_message_id();
        assert!(msg.starts_with("msg_"));
        assert_eq!(msg.len(), 4 + 24);
        let tool = next_tool_use_id();
        assert!(tool.starts_with("toolu_"));
        assert!(tool[6..].bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(next_tool_use_id(), next_tool_use_id());
    }

    #[test]
    fn push_json_string_escaped_matches_serde_json() {
        let inputs = [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "emoji \u{1f600} caf\u{e9}",
            "mix \"\u{1f600}\\\n\t\r\u{0000}",
        ];

        for input in inputs {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            let expected = serde_json::to_string(input).expect("serialize");
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn missing_regex_is_a_no_op() {
        let out = regex_replace_all(&None, "unchanged", "x");
        assert_eq!(out, "unchanged");
        assert!(!regex_is_match(&None, "anything"));
    }
}
