/// JSON repair for tool-call argument payloads.
///
/// Models emitting arguments as free text routinely drop quotes, truncate
/// field names, leave trailing commas or stop mid-structure. [`repair_json`]
/// rewrites the known corruption patterns and always hands back text that a
/// strict JSON decoder accepts. When nothing sensible can be recovered the
/// result is `[]`: no structured data is preferred over wrong structured data.
///
/// Passes run in a fixed order:
/// 1. field names that lost their opening quote (with truncated names expanded)
/// 2. bare identifier values of known textual fields
/// 3. structure: adjacent objects, trailing commas, unclosed strings/brackets
/// 4. synonyms: `state` key, `_progress`-style status spellings
use std::borrow::Cow;
use std::sync::LazyLock;

use regex_lite::{Captures, Regex};

use crate::json_scan::{extract_balanced_json, unclosed_brackets};
use crate::util::{compile_regex, regex_replace_all};

/// Returned whenever the input cannot be repaired.
pub const EMPTY_REPAIR: &str = "[]";

/// Truncated key spellings seen in the wild, mapped to the full field name.
const TRUNCATED_KEYS: &[(&str, &str)] = &[
    ("Form", "activeForm"),
    ("eForm", "activeForm"),
    ("veForm", "activeForm"),
    ("iveForm", "activeForm"),
    ("tiveForm", "activeForm"),
    ("ctiveForm", "activeForm"),
    ("tatus", "status"),
    ("atus", "status"),
    ("ontent", "content"),
    ("ntent", "content"),
    ("riority", "priority"),
    ("iority", "priority"),
];

static KEY_MISSING_OPEN_QUOTE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_regex(r#"([,{]\s*)([A-Za-z_][A-Za-z0-9_]*)"\s*:"#));
static KEY_UNQUOTED: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_regex(r#"([,{]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#));
static BARE_TEXT_VALUE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_regex(
        r#"("(?:content|status|state|priority|activeForm|id)"\s*:\s*)([A-Za-z_][^,}\]\n"]*)"#,
    )
});
static ADJACENT_OBJECTS: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_regex(r"\}(\s*)\{"));
static TRAILING_COMMA: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_regex(r",(\s*[}\]])"));
static STATE_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_regex(r#""state"(\s*):"#));
static PROGRESS_VALUE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_regex(r#"(?i)"(?:_progress|in-progress|inprogress|in progress)""#)
});

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Repair a malformed JSON fragment.
///
/// Never fails. The returned text always parses with `serde_json`; input that
/// cannot be repaired yields [`EMPTY_REPAIR`].
#[must_use]
pub fn repair_json(input: &str) -> String {
    try_repair_json(input).unwrap_or_else(|| EMPTY_REPAIR.to_string())
}

/// Repair a malformed JSON fragment, returning `None` instead of the empty
/// fallback when no pass sequence produces parseable JSON.
#[must_use]
pub fn try_repair_json(input: &str) -> Option<String> {
    let trimmed = input.trim().trim_start_matches('\u{feff}');
    let start = trimmed.find(['[', '{'])?;
    let candidate = &trimmed[start..];
    if parses(candidate) {
        return Some(candidate.to_string());
    }

    let repaired = repair_field_names(candidate);
    let repaired = repair_bare_values(&repaired);
    let repaired = repair_structure(&repaired);
    let repaired = normalize_synonyms(&repaired);

    if parses(&repaired) {
        return Some(repaired.into_owned());
    }

    // Extra closers or trailing noise: keep the first balanced value only.
    let balanced = extract_balanced_json(&repaired);
    if !balanced.is_empty() && parses(balanced) {
        return Some(balanced.to_string());
    }
    None
}

#[inline]
fn parses(text: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok()
}

// ---------------------------------------------------------------------------
// Pass 1: field names
// ---------------------------------------------------------------------------

fn expand_truncated_key(key: &str) -> &str {
    TRUNCATED_KEYS
        .iter()
        .find(|(truncated, _)| *truncated == key)
        .map_or(key, |(_, full)| full)
}

fn repair_field_names(text: &str) -> Cow<'_, str> {
    let text = regex_replace_all(&KEY_MISSING_OPEN_QUOTE, text, |caps: &Captures<'_>| {
        format!("{}\"{}\":", &caps[1], expand_truncated_key(&caps[2]))
    });
    if parses(&text) {
        return text;
    }
    let fully_unquoted = regex_replace_all(&KEY_UNQUOTED, &text, |caps: &Captures<'_>| {
        format!("{}\"{}\":", &caps[1], &caps[2])
    })
    .into_owned();
    Cow::Owned(fully_unquoted)
}

// ---------------------------------------------------------------------------
// Pass 2: bare values
// ---------------------------------------------------------------------------

fn repair_bare_values(text: &str) -> Cow<'_, str> {
    regex_replace_all(&BARE_TEXT_VALUE, text, |caps: &Captures<'_>| {
        let value = caps[2].trim_end();
        if matches!(value, "true" | "false" | "null") {
            return caps[0].to_string();
        }
        let mut out = String::with_capacity(caps[0].len() + 2);
        out.push_str(&caps[1]);
        out.push('"');
        out.push_str(value);
        out.push('"');
        out.push_str(&caps[2][value.len()..]);
        out
    })
}

// ---------------------------------------------------------------------------
// Pass 3: structure
// ---------------------------------------------------------------------------

fn repair_structure(text: &str) -> Cow<'_, str> {
    let text = regex_replace_all(&ADJACENT_OBJECTS, text, |caps: &Captures<'_>| {
        format!("}},{}{{", &caps[1])
    });
    let text = regex_replace_all(&TRAILING_COMMA, &text, |caps: &Captures<'_>| {
        caps[1].to_string()
    })
    .into_owned();

    let (closers, in_string) = unclosed_brackets(&text);
    if closers.is_empty() && !in_string {
        return Cow::Owned(text);
    }

    let mut out = text;
    if in_string {
        out.push('"');
    }
    let keep = out.trim_end().trim_end_matches(',').len();
    out.truncate(keep);
    if out.ends_with(':') {
        out.push_str("null");
    }
    for &closer in closers.iter().rev() {
        out.push(char::from(closer));
    }
    Cow::Owned(out)
}

// ---------------------------------------------------------------------------
// Pass 4: synonyms
// ---------------------------------------------------------------------------

fn normalize_synonyms(text: &str) -> Cow<'_, str> {
    let text = regex_replace_all(&STATE_KEY, text, |caps: &Captures<'_>| {
        format!("\"status\"{}:", &caps[1])
    });
    let out = regex_replace_all(&PROGRESS_VALUE, &text, |_: &Captures<'_>| {
        "\"in_progress\"".to_string()
    })
    .into_owned();
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parsed(input: &str) -> Value {
        let out = repair_json(input);
        serde_json::from_str(&out).unwrap_or_else(|e| panic!("{out:?} did not parse: {e}"))
    }

    #[test]
    fn valid_json_is_kept() {
        assert_eq!(parsed(r#"{"a":[1,2]}"#), serde_json::json!({"a":[1,2]}));
    }

    #[test]
    fn restores_truncated_active_form_key() {
        let value = parsed(r#"[{"content":"x","status":"pending",Form":"Doing x"}]"#);
        assert_eq!(value[0]["activeForm"], "Doing x");
    }

    #[test]
    fn restores_state_key_and_maps_to_status() {
        let value = parsed(r#"[{"content":"x",state":"pending"}]"#);
        assert_eq!(value[0]["status"], "pending");
        assert!(value[0].get("state").is_none());
    }

    #[test]
    fn quotes_bare_status_and_maps_progress_synonym() {
        let value = parsed(r#"[{"content":"x","status":_progress}]"#);
        assert_eq!(value[0]["status"], "in_progress");
    }

    #[test]
    fn leaves_numbers_booleans_and_null_unquoted() {
        let value = parsed(r#"{"id":null,"count":3,"done":true,"status":pending,}"#);
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["count"], 3);
        assert_eq!(value["done"], true);
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn inserts_comma_between_adjacent_objects() {
        let value = parsed("[{\"content\":\"a\"}\n{\"content\":\"b\"}]");
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn strips_trailing_commas() {
        assert_eq!(parsed(r#"[1,2,]"#), serde_json::json!([1, 2]));
    }

    #[test]
    fn closes_truncated_structure() {
        let value = parsed(r#"[{"content":"write tests","status":"pend"#);
        assert_eq!(value[0]["content"], "write tests");
        assert_eq!(value[0]["status"], "pend");
    }

    #[test]
    fn dangling_colon_becomes_null() {
        let value = parsed(r#"{"content":"x","status":"#);
        assert_eq!(value["status"], Value::Null);
    }

    #[test]
    fn drops_extra_closers() {
        assert_eq!(parsed(r#"{"a":1}}]"#), serde_json::json!({"a":1}));
    }

    #[test]
    fn garbage_yields_empty_array() {
        for input in [
            "",
            "   ",
            "hello world",
            "key value key value",
            "{:::}",
            r#"{"a" "b" "c"}"#,
            "[}{]",
            "\u{0}\u{1}{{{",
        ] {
            let out = repair_json(input);
            assert!(
                serde_json::from_str::<Value>(&out).is_ok(),
                "{input:?} -> {out:?}"
            );
        }
        assert_eq!(repair_json("hello world"), EMPTY_REPAIR);
        assert_eq!(repair_json(""), EMPTY_REPAIR);
    }

    #[test]
    fn try_repair_distinguishes_failure() {
        assert!(try_repair_json("no json here").is_none());
        assert!(try_repair_json(r#"{"a":1,}"#).is_some());
    }
}
