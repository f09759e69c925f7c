// Byte-level JSON scanning helpers.
//
// These never allocate and never validate beyond what is needed to find the
// extent of a bracketed value. Brackets inside string literals are inert.

/// Outcome of scanning a bracketed value from a start offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancedScan {
    /// Depth returned to zero; the value ends (exclusive) at this offset.
    Closed(usize),
    /// Input ran out while `depth` brackets were still open.
    Open { depth: usize },
    /// The byte at the start offset is not `[` or `{`.
    NotJson,
}

#[inline]
pub(crate) fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    let len = bytes.len();
    while i < len {
        match bytes[i] {
            b' ' | b'\n' | b'\r' | b'\t' => i += 1,
            _ => break,
        }
    }
    i
}

/// Scan a bracketed value starting exactly at `start`.
#[must_use]
pub fn balanced_json_end(bytes: &[u8], start: usize) -> BalancedScan {
    match bytes.get(start) {
        Some(b'[' | b'{') => {}
        _ => return BalancedScan::NotJson,
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return BalancedScan::Closed(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    BalancedScan::Open { depth }
}

/// Return the longest bracket-balanced object/array prefix of `text`.
///
/// Leading whitespace is skipped. Returns `""` when the first non-space
/// character is not `[` or `{`, and the whole unbalanced remainder when the
/// outermost bracket never closes.
#[must_use]
pub fn extract_balanced_json(text: &str) -> &str {
    let bytes = text.as_bytes();
    let start = skip_ws(bytes, 0);
    match balanced_json_end(bytes, start) {
        BalancedScan::Closed(end) => &text[start..end],
        BalancedScan::Open { .. } => &text[start..],
        BalancedScan::NotJson => "",
    }
}

/// Count unmatched open brackets outside string literals, innermost last.
///
/// Returns the stack of closers needed to balance `text`, plus whether the
/// text ends inside an unterminated string literal.
pub(crate) fn unclosed_brackets(text: &str) -> (Vec<u8>, bool) {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for &byte in text.as_bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' => stack.push(b']'),
            b'{' => stack.push(b'}'),
            b']' | b'}' => {
                if stack.last() == Some(&byte) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }
    (stack, in_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_prefix_and_ignores_tail() {
        assert_eq!(extract_balanced_json(r#"{"a":1} trailing"#), r#"{"a":1}"#);
    }

    #[test]
    fn skips_leading_whitespace() {
        assert_eq!(extract_balanced_json("  \n[1,[2]] x"), "[1,[2]]");
    }

    #[test]
    fn brackets_inside_strings_are_inert() {
        let text = r#"{"a":"}]{[","b":"\"}"} rest"#;
        assert_eq!(extract_balanced_json(text), r#"{"a":"}]{[","b":"\"}"}"#);
    }

    #[test]
    fn unbalanced_returns_remainder() {
        assert_eq!(extract_balanced_json(r#"[{"a":1}"#), r#"[{"a":1}"#);
    }

    #[test]
    fn non_json_start_returns_empty() {
        assert_eq!(extract_balanced_json("hello {}"), "");
        assert_eq!(extract_balanced_json(""), "");
        assert_eq!(extract_balanced_json("   "), "");
    }

    #[test]
    fn balanced_end_reports_offsets() {
        let bytes = b"xx{\"k\":[1]}yy";
        assert_eq!(balanced_json_end(bytes, 2), BalancedScan::Closed(11));
        assert_eq!(balanced_json_end(bytes, 0), BalancedScan::NotJson);
        assert_eq!(
            balanced_json_end(b"[[1", 0),
            BalancedScan::Open { depth: 2 }
        );
    }

    #[test]
    fn unclosed_brackets_tracks_stack_and_string_state() {
        let (stack, in_string) = unclosed_brackets(r#"[{"a":"x"#);
        assert_eq!(stack, vec![b']', b'}']);
        assert!(in_string);

        let (stack, in_string) = unclosed_brackets(r#"{"a":"]"}"#);
        assert!(stack.is_empty());
        assert!(!in_string);
    }
}
