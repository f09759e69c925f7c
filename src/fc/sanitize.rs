/// Content sanitizer: strips call artifacts and planning noise from text that
/// is about to be shown to the user.
///
/// The work is an explicit ordered list of named stages ([`STAGES`]). Each
/// stage is a pure `&str -> Cow<str>` rewrite of the previous stage's output.
/// Lines shaped like tool-result descriptions (`● Read(hello.py)`) are swapped
/// for placeholders before the first stage and restored after the last one,
/// so no stage can touch them.
///
/// Postconditions of [`sanitize_content`], for every input:
/// - no `<invoke`, no `<>` marker and no active trigger remain
/// - applying it twice gives the same result as applying it once
use std::borrow::Cow;
use std::sync::LazyLock;

use memchr::{memchr, memmem};
use regex_lite::Regex;

use crate::json_scan::{balanced_json_end, skip_ws, BalancedScan};
use crate::util::{compile_regex, regex_is_match, regex_replace_all};

/// Upper bound on whole-pipeline passes while looking for a fixed point.
const MAX_PASSES: usize = 4;

const CALL_BLOCK_TAGS: [&str; 5] = [
    "function_calls",
    "function_call",
    "invoke",
    "invocation",
    "tool_call",
];

const TASK_KEYS: [&str; 5] = ["id", "content", "status", "activeForm", "state"];

const RETRY_PHRASES: &[&str] = &[
    "let me try again",
    "let me retry",
    "i'll try again",
    "i will try again",
    "trying again",
    "retrying",
    "let me fix the tool call",
    "let me fix the function call",
    "let me correct the tool call",
    "let me correct the function call",
    "let me fix the format",
    "let me correct the format",
    "the previous tool call",
    "the previous function call",
    "tool call failed",
    "tool call was malformed",
    "with the correct format",
    "using the correct format",
];

const CALL_LEADS: &[&str] = &[
    "let me ",
    "now let me ",
    "i'll ",
    "now i'll ",
    "next, i'll ",
    "next i'll ",
    "i will ",
    "now i will ",
    "i'm going to ",
    "i am going to ",
    "calling ",
];

const CALL_VERBS: &[&str] = &["call ", "invoke ", "use the ", "using the ", "run the "];

const PREAMBLE_MAX_LEN: usize = 200;

const SHIELD_OPEN: char = '\u{e000}';
const SHIELD_CLOSE: char = '\u{e001}';
/// A shielded line as it appears after a line break.
const SHIELD_LINE: &[u8] = "\n\u{e000}".as_bytes();

static CALL_BLOCK_PAIRS: LazyLock<Vec<Option<Regex>>> = LazyLock::new(|| {
    CALL_BLOCK_TAGS
        .iter()
        .map(|tag| compile_regex(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")))
        .collect()
});
static DANGLING_CALL_OPENER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_regex(r"(?i)<(?:function_calls|function_call|invoke|invocation|tool_call)\b")
});
static ORPHAN_PARAMETER: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_regex(r"(?is)<parameter\b[^>]*>.*?</parameter\s*>"));
static STRAY_CLOSER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_regex(
        r"(?i)</(?:function_calls|function_call|invoke|invocation|tool_call|parameter)\s*>",
    )
});
static GENERIC_TRIGGER: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_regex(r"(?i)<Function_[A-Za-z0-9]+_Start\s*/?>"));
static MERGED_FRAGMENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_regex(
        r"(?i)(?:<>\s*)?<(?:invoke|parameter|function_call|function|tool_call|tool)name\s*=",
    )
});
static PLAN_HEADER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_regex(
        r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*|__)?[ \t]*(?:task list|todo list|to-do list|implementation plan|execution plan)[ \t]*:?[ \t]*(?:\*\*|__)?[ \t]*:?[ \t]*$\n?",
    )
});
static TOOL_RESULT_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_regex(r"^[ \t]*(?:[^\sA-Za-z0-9<]{1,3}[ \t]+)?[A-Z][A-Za-z0-9_]*\(.*\)[ \t]*$")
});
static SHIELD_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_regex("\u{e000}([0-9]+)\u{e001}"));

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Per-call inputs shared by all stages.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub trigger: Option<&'a str>,
}

pub type StageFn = for<'t> fn(&'t str, &StageContext<'_>) -> Cow<'t, str>;

/// One named rewrite of the pipeline.
pub struct Stage {
    pub name: &'static str,
    pub apply: StageFn,
}

/// Stages in application order. Each runs on the previous stage's output.
pub const STAGES: [Stage; 10] = [
    Stage {
        name: "call_blocks",
        apply: strip_call_blocks,
    },
    Stage {
        name: "trigger_markers",
        apply: strip_trigger_markers,
    },
    Stage {
        name: "merged_fragments",
        apply: strip_merged_fragments,
    },
    Stage {
        name: "bare_marker",
        apply: strip_bare_marker,
    },
    Stage {
        name: "marker_payloads",
        apply: strip_marker_payloads,
    },
    Stage {
        name: "fingerprint_json",
        apply: strip_fingerprint_json,
    },
    Stage {
        name: "preamble_lines",
        apply: strip_preamble_lines,
    },
    Stage {
        name: "plan_headers",
        apply: strip_plan_headers,
    },
    Stage {
        name: "citations",
        apply: strip_citations,
    },
    Stage {
        name: "whitespace",
        apply: collapse_whitespace,
    },
];

/// Remove every call artifact and scaffolding line from `text`.
#[must_use]
pub fn sanitize_content(text: &str, trigger: Option<&str>) -> String {
    if text.is_empty() {
        return String::new();
    }
    let ctx = StageContext {
        trigger: trigger.filter(|t| !t.is_empty()),
    };

    let (mut current, vault) = shield_tool_results(text, ctx.trigger);
    for _ in 0..MAX_PASSES {
        let next = run_stages(&current, &ctx);
        if next == current {
            break;
        }
        current = next;
    }

    let stripped = match strip_residual_markers(&current, ctx.trigger) {
        Cow::Borrowed(_) => None,
        Cow::Owned(stripped) => Some(stripped),
    };
    let finished = match stripped {
        Some(stripped) => collapse_whitespace(&stripped, &ctx).into_owned(),
        None => current,
    };
    restore_tool_results(finished, &vault)
}

fn run_stages(text: &str, ctx: &StageContext<'_>) -> String {
    let mut current = text.to_string();
    for stage in &STAGES {
        let rewritten = match (stage.apply)(&current, ctx) {
            Cow::Borrowed(_) => None,
            Cow::Owned(next) => Some(next),
        };
        if let Some(next) = rewritten {
            if next != current {
                tracing::trace!(stage = stage.name, "sanitizer stage rewrote text");
            }
            current = next;
        }
    }
    current
}

/// Run `re` over `text`, keeping the borrowed input when nothing matched.
fn replace_in<'t>(text: Cow<'t, str>, re: &Option<Regex>, rep: &str) -> Cow<'t, str> {
    let replaced = match regex_replace_all(re, &text, rep) {
        Cow::Borrowed(_) => None,
        Cow::Owned(next) => Some(next),
    };
    match replaced {
        Some(next) => Cow::Owned(next),
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Tool-result shielding
// ---------------------------------------------------------------------------

fn is_tool_result_line(line: &str, trigger: Option<&str>) -> bool {
    !line.contains('<')
        && trigger.is_none_or(|t| !line.contains(t))
        && regex_is_match(&TOOL_RESULT_LINE, line)
}

/// Replace tool-result lines with numbered private-use placeholders.
fn shield_tool_results(text: &str, trigger: Option<&str>) -> (String, Vec<String>) {
    let mut vault = Vec::new();
    let mut out = String::with_capacity(text.len());
    for (idx, line) in text.split('\n').enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let content = line.trim_end_matches('\r');
        if is_tool_result_line(content, trigger) {
            out.push(SHIELD_OPEN);
            out.push_str(&vault.len().to_string());
            out.push(SHIELD_CLOSE);
            vault.push(content.trim_end().to_string());
        } else if line.contains([SHIELD_OPEN, SHIELD_CLOSE]) {
            // Sentinels already in the text would be read back as placeholders.
            out.extend(line.chars().filter(|c| !matches!(*c, SHIELD_OPEN | SHIELD_CLOSE)));
        } else {
            out.push_str(line);
        }
    }
    (out, vault)
}

fn restore_tool_results(text: String, vault: &[String]) -> String {
    if vault.is_empty() {
        return text;
    }
    regex_replace_all(&SHIELD_TOKEN, &text, |caps: &regex_lite::Captures<'_>| {
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|i| vault.get(i))
            .map_or_else(String::new, Clone::clone)
    })
    .into_owned()
}

// ---------------------------------------------------------------------------
// Stage 1: call blocks
// ---------------------------------------------------------------------------

/// Matched wrapper/call blocks go first (outermost tag first), then dangling
/// openers to end of text, orphan parameter pairs and stray closers.
fn strip_call_blocks<'t>(text: &'t str, _ctx: &StageContext<'_>) -> Cow<'t, str> {
    if memchr(b'<', text.as_bytes()).is_none() {
        return Cow::Borrowed(text);
    }
    let mut out = Cow::Borrowed(text);
    for re in CALL_BLOCK_PAIRS.iter() {
        out = replace_in(out, re, "");
    }
    out = strip_dangling_openers(out);
    out = replace_in(out, &ORPHAN_PARAMETER, "");
    replace_in(out, &STRAY_CLOSER, "")
}

/// End of the region a removal starting at `from` may take: the line break
/// ahead of the next shielded line, or the end of text.
fn unshielded_end(bytes: &[u8], from: usize) -> usize {
    memmem::find(&bytes[from..], SHIELD_LINE).map_or(bytes.len(), |r| from + r)
}

/// An opener without its closer runs to the end of text, stopping short of
/// shielded tool-result lines.
fn strip_dangling_openers(text: Cow<'_, str>) -> Cow<'_, str> {
    let Some(re) = DANGLING_CALL_OPENER.as_ref() else {
        return text;
    };
    let Some(mut start) = re.find(&text).map(|m| m.start()) else {
        return text;
    };
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0usize;
    loop {
        out.push_str(&text[copied..start]);
        copied = unshielded_end(bytes, start);
        match re.find_at(&text, copied) {
            Some(next) => start = next.start(),
            None => break,
        }
    }
    out.push_str(&text[copied..]);
    Cow::Owned(out)
}

// ---------------------------------------------------------------------------
// Stage 2: trigger markers
// ---------------------------------------------------------------------------

fn strip_trigger_markers<'t>(text: &'t str, ctx: &StageContext<'_>) -> Cow<'t, str> {
    let mut out = Cow::Borrowed(text);
    if let Some(trigger) = ctx.trigger {
        if out.contains(trigger) {
            out = Cow::Owned(out.replace(trigger, ""));
        }
    }
    replace_in(out, &GENERIC_TRIGGER, "")
}

// ---------------------------------------------------------------------------
// Stage 3: merged fragments
// ---------------------------------------------------------------------------

/// A fused `<invokename=` style fragment takes the rest of its line with it.
/// When a JSON value opens on that line the removal runs to its balanced end.
/// Neither removal crosses into a shielded line.
fn strip_merged_fragments<'t>(text: &'t str, _ctx: &StageContext<'_>) -> Cow<'t, str> {
    let Some(re) = MERGED_FRAGMENT.as_ref() else {
        return Cow::Borrowed(text);
    };
    if !re.is_match(text) {
        return Cow::Borrowed(text);
    }

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0usize;
    let mut search = 0usize;
    while let Some(found) = re.find_at(text, search) {
        let start = found.start();
        let line_end = memchr(b'\n', &bytes[found.end()..]).map_or(bytes.len(), |r| found.end() + r);
        let limit = unshielded_end(bytes, found.end());
        let mut end = line_end;
        if let Some(rel) = bytes[found.end()..line_end]
            .iter()
            .position(|b| matches!(b, b'[' | b'{'))
        {
            match balanced_json_end(bytes, found.end() + rel) {
                BalancedScan::Closed(json_end) => end = end.max(json_end).min(limit),
                BalancedScan::Open { .. } => end = limit,
                BalancedScan::NotJson => {}
            }
        }
        out.push_str(&text[copied..start]);
        copied = end;
        search = end;
        if search >= bytes.len() {
            break;
        }
    }
    out.push_str(&text[copied.min(bytes.len())..]);
    Cow::Owned(out)
}

// ---------------------------------------------------------------------------
// Stage 4: bare marker
// ---------------------------------------------------------------------------

/// A `<>` with nothing after it on its line. One that introduces a JSON
/// value on a following line is left for `marker_payloads`.
fn strip_bare_marker<'t>(text: &'t str, _ctx: &StageContext<'_>) -> Cow<'t, str> {
    let bytes = text.as_bytes();
    let Some(first) = memmem::find(bytes, b"<>") else {
        return Cow::Borrowed(text);
    };

    let mut out: Option<String> = None;
    let mut copied = 0usize;
    let mut pos = first;
    loop {
        let after = pos + 2;
        let line_rest = bytes[after..]
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t' | b'\r'))
            .count();
        let stands_alone = bytes.get(after + line_rest).is_none_or(|&b| b == b'\n');
        let carries_payload = matches!(bytes.get(skip_ws(bytes, after)), Some(b'[' | b'{'));
        if stands_alone && !carries_payload {
            let buf = out.get_or_insert_with(|| String::with_capacity(text.len()));
            buf.push_str(&text[copied..pos]);
            copied = after;
        }
        match memmem::find(&bytes[after..], b"<>") {
            Some(rel) => pos = after + rel,
            None => break,
        }
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&text[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(text),
    }
}

// ---------------------------------------------------------------------------
// Stage 5: marker payloads
// ---------------------------------------------------------------------------

/// Every remaining `<>` goes, together with a JSON value that follows it,
/// however many lines that value spans.
fn strip_marker_payloads<'t>(text: &'t str, _ctx: &StageContext<'_>) -> Cow<'t, str> {
    let bytes = text.as_bytes();
    let Some(first) = memmem::find(bytes, b"<>") else {
        return Cow::Borrowed(text);
    };

    let mut out = String::with_capacity(text.len());
    let mut copied = 0usize;
    let mut pos = first;
    loop {
        out.push_str(&text[copied..pos]);
        let mut end = pos + 2;
        let value_start = skip_ws(bytes, end);
        match balanced_json_end(bytes, value_start) {
            BalancedScan::Closed(json_end) => end = json_end,
            BalancedScan::Open { .. } => end = bytes.len(),
            BalancedScan::NotJson => {}
        }
        copied = end;
        match memmem::find(&bytes[end..], b"<>") {
            Some(rel) => pos = end + rel,
            None => break,
        }
    }
    out.push_str(&text[copied..]);
    Cow::Owned(out)
}

// ---------------------------------------------------------------------------
// Stage 6: fingerprint JSON
// ---------------------------------------------------------------------------

fn task_key_hits(candidate: &str) -> usize {
    let bytes = candidate.as_bytes();
    TASK_KEYS
        .iter()
        .filter(|key| {
            let quoted = format!("\"{key}\"");
            let finder = memmem::Finder::new(quoted.as_bytes());
            finder.find_iter(bytes).any(|at| {
                let after = skip_ws(bytes, at + quoted.len());
                bytes.get(after) == Some(&b':')
            })
        })
        .count()
}

/// Line-leading JSON values that carry at least two task-list keys.
fn strip_fingerprint_json<'t>(text: &'t str, _ctx: &StageContext<'_>) -> Cow<'t, str> {
    let bytes = text.as_bytes();
    if memchr::memchr2(b'[', b'{', bytes).is_none() {
        return Cow::Borrowed(text);
    }

    let mut out: Option<String> = None;
    let mut copied = 0usize;
    let mut line_start = 0usize;
    while line_start < bytes.len() {
        let first = line_start
            + bytes[line_start..]
                .iter()
                .take_while(|b| matches!(b, b' ' | b'\t'))
                .count();
        let mut next_line =
            memchr(b'\n', &bytes[line_start..]).map_or(bytes.len(), |r| line_start + r + 1);

        let json_end = match balanced_json_end(bytes, first) {
            BalancedScan::Closed(end) => Some(end),
            BalancedScan::Open { .. } => Some(bytes.len()),
            BalancedScan::NotJson => None,
        };
        if let Some(end) = json_end {
            if task_key_hits(&text[first..end]) >= 2 {
                let buf = out.get_or_insert_with(|| String::with_capacity(text.len()));
                buf.push_str(&text[copied..first]);
                copied = end;
                next_line = memchr(b'\n', &bytes[end..]).map_or(bytes.len(), |r| end + r + 1);
            }
        }
        line_start = next_line;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&text[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(text),
    }
}

// ---------------------------------------------------------------------------
// Stage 7: preamble lines
// ---------------------------------------------------------------------------

/// Retry narration, or a lead-in announcing a tool or function call.
fn is_preamble_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.len() > PREAMBLE_MAX_LEN {
        return false;
    }
    let lower = trimmed
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();

    if RETRY_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return true;
    }

    CALL_LEADS.iter().any(|lead| lower.starts_with(lead))
        && CALL_VERBS.iter().any(|verb| lower.contains(verb))
        && (lower.contains(" tool") || lower.contains(" function"))
}

fn strip_preamble_lines<'t>(text: &'t str, _ctx: &StageContext<'_>) -> Cow<'t, str> {
    if !text.split('\n').any(is_preamble_line) {
        return Cow::Borrowed(text);
    }
    let kept: Vec<&str> = text.split('\n').filter(|line| !is_preamble_line(line)).collect();
    Cow::Owned(kept.join("\n"))
}

// ---------------------------------------------------------------------------
// Stage 8: plan headers
// ---------------------------------------------------------------------------

fn strip_plan_headers<'t>(text: &'t str, _ctx: &StageContext<'_>) -> Cow<'t, str> {
    replace_in(Cow::Borrowed(text), &PLAN_HEADER, "")
}

// ---------------------------------------------------------------------------
// Stage 9: citations
// ---------------------------------------------------------------------------

const FULLWIDTH_OPEN: &str = "\u{3010}";
const FULLWIDTH_CLOSE: &str = "\u{3011}";
const FULLWIDTH_MAX_BODY: usize = 96;

/// End of `[1]`, `[1, 2]` or `[^1]` starting at `start`.
fn bracket_citation_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if bytes.get(i) == Some(&b'^') {
        i += 1;
    }
    loop {
        let digits = bytes[i.min(bytes.len())..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 || digits > 3 {
            return None;
        }
        i += digits;
        match bytes.get(i) {
            Some(b']') => return Some(i + 1),
            Some(b',') => {
                i += 1;
                while bytes.get(i) == Some(&b' ') {
                    i += 1;
                }
            }
            _ => return None,
        }
    }
}

/// End of a `【…】` source marker starting at `start`.
fn fullwidth_citation_end(text: &str, start: usize) -> Option<usize> {
    let body_start = start + FULLWIDTH_OPEN.len();
    let rest = text.get(body_start..)?;
    let close = rest.find(FULLWIDTH_CLOSE)?;
    let body = &rest[..close];
    if body.is_empty() || body.len() > FULLWIDTH_MAX_BODY || body.contains('\n') {
        return None;
    }
    Some(body_start + close + FULLWIDTH_CLOSE.len())
}

fn strip_citations<'t>(text: &'t str, _ctx: &StageContext<'_>) -> Cow<'t, str> {
    let bytes = text.as_bytes();
    if memchr(b'[', bytes).is_none() && memmem::find(bytes, FULLWIDTH_OPEN.as_bytes()).is_none()
    {
        return Cow::Borrowed(text);
    }

    let mut out: Option<String> = None;
    let mut copied = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let end = if bytes[i] == b'[' {
            let after_identifier = i > 0
                && (bytes[i - 1].is_ascii_alphanumeric() || matches!(bytes[i - 1], b'_' | b']'));
            bracket_citation_end(bytes, i)
                .filter(|&end| !after_identifier && bytes.get(end) != Some(&b'('))
        } else if bytes[i..].starts_with(FULLWIDTH_OPEN.as_bytes()) {
            fullwidth_citation_end(text, i)
        } else {
            None
        };

        let Some(end) = end else {
            i += 1;
            continue;
        };
        let mut cut = i;
        while cut > copied && matches!(bytes[cut - 1], b' ' | b'\t') {
            cut -= 1;
        }
        let buf = out.get_or_insert_with(|| String::with_capacity(text.len()));
        buf.push_str(&text[copied..cut]);
        copied = end;
        i = end;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&text[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(text),
    }
}

// ---------------------------------------------------------------------------
// Stage 10: whitespace
// ---------------------------------------------------------------------------

/// Trim line ends, collapse blank-line runs to one and drop leading and
/// trailing blank lines.
fn collapse_whitespace<'t>(text: &'t str, _ctx: &StageContext<'_>) -> Cow<'t, str> {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        out.push_str(line);
        pending_blank = false;
    }
    if out == text {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(out)
    }
}

// ---------------------------------------------------------------------------
// Residual guard
// ---------------------------------------------------------------------------

/// Remove markers that a late stage may have recreated by joining text
/// (e.g. `<<>>` becoming `<>`). Repeats until none remain.
fn strip_residual_markers<'t>(text: &'t str, trigger: Option<&str>) -> Cow<'t, str> {
    const INVOKE: &[u8] = b"<invoke";

    let has_residue = |s: &str| {
        memmem::find(s.as_bytes(), b"<>").is_some()
            || s.to_ascii_lowercase().contains("<invoke")
            || trigger.is_some_and(|t| s.contains(t))
    };
    if !has_residue(text) {
        return Cow::Borrowed(text);
    }

    let mut current = text.to_string();
    while has_residue(&current) {
        current = current.replace("<>", "");
        if let Some(trigger) = trigger {
            current = current.replace(trigger, "");
        }
        let lower = current.to_ascii_lowercase();
        if let Some(pos) = memmem::find(lower.as_bytes(), INVOKE) {
            let line_end = memchr(b'\n', &current.as_bytes()[pos..]).map_or(current.len(), |r| pos + r);
            current.replace_range(pos..line_end, "");
        }
    }
    Cow::Owned(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(text: &str) -> String {
        sanitize_content(text, None)
    }

    #[test]
    fn stages_run_in_declared_order() {
        let names: Vec<&str> = STAGES.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            [
                "call_blocks",
                "trigger_markers",
                "merged_fragments",
                "bare_marker",
                "marker_payloads",
                "fingerprint_json",
                "preamble_lines",
                "plan_headers",
                "citations",
                "whitespace",
            ]
        );
    }

    #[test]
    fn wrapper_between_words_leaves_both_spaces() {
        let text = "Hello <function_calls><function_call><tool>test</tool></function_call></function_calls> World";
        assert_eq!(clean(text), "Hello  World");
    }

    #[test]
    fn only_call_blocks_becomes_empty() {
        let text = "<invoke name=\"a\"><parameter name=\"x\">1</parameter></invoke>\n\n\
                    <invocation><name>b</name></invocation>\n<tool_call>{\"name\":\"c\"}</tool_call>";
        assert_eq!(clean(text), "");
    }

    #[test]
    fn dangling_opener_removes_to_end() {
        assert_eq!(clean("Working on it.\n<function_calls>\n<invoke name=\"x\">"), "Working on it.");
    }

    #[test]
    fn dangling_opener_stops_at_tool_result_line() {
        assert_eq!(clean("<invoke name=\"x\">\n\u{25cf} Read(hello.py)"), "\u{25cf} Read(hello.py)");
        assert_eq!(
            clean("Start.\n<invoke name=\"x\">\n\u{25cf} Read(a.py)\n<invoke name=\"y\">\nBash(ls)"),
            "Start.\n\n\u{25cf} Read(a.py)\n\nBash(ls)"
        );
    }

    #[test]
    fn orphan_parameters_and_closers_go() {
        assert_eq!(clean("a <parameter name=\"p\">v</parameter> b </invoke>"), "a  b");
    }

    #[test]
    fn trigger_and_generic_markers_go() {
        let out = sanitize_content("Sure.\n<Function_Ab12_Start/>\nDone TRIG", Some("TRIG"));
        assert_eq!(out, "Sure.\n\nDone");
    }

    #[test]
    fn bullet_survives_merged_artifact() {
        assert_eq!(clean("\u{25cf} <><invokename=\"TodoWrite\">[{}]"), "\u{25cf}");
    }

    #[test]
    fn merged_glob_is_fully_removed() {
        assert_eq!(clean("<><invokename=\"Glob\"><parametername=\"pattern\">*"), "");
    }

    #[test]
    fn merged_fragment_json_spanning_lines_is_consumed() {
        let text = "Plan:\n<invokename=\"TodoWrite\">[{\"content\":\"a\",\n\"status\":\"pending\"}]\nAfter";
        assert_eq!(clean(text), "Plan:\n\nAfter");
    }

    #[test]
    fn unclosed_merged_json_stops_at_tool_result_line() {
        assert_eq!(
            clean("<invokename=\"x\">[{\"a\":1\n\u{25cf} Read(hello.py)"),
            "\u{25cf} Read(hello.py)"
        );
    }

    #[test]
    fn marker_payload_spanning_lines_is_consumed() {
        let text = "Intro\n<>\n[\n  {\"x\": 1},\n  {\"x\": 2}\n]\nOutro";
        assert_eq!(clean(text), "Intro\n\nOutro");
    }

    #[test]
    fn fingerprint_json_without_tags_is_removed() {
        let text = "Updating tasks\n[{\"id\":\"1\",\"content\":\"write\",\"status\":\"pending\"}]\nok";
        assert_eq!(clean(text), "Updating tasks\n\nok");
    }

    #[test]
    fn ordinary_json_is_kept() {
        let text = "Example:\n{\"name\": \"demo\", \"version\": 2}";
        assert_eq!(clean(text), text);
    }

    #[test]
    fn tool_result_lines_are_untouched() {
        for line in ["\u{25cf} Search(pattern: \"*\")", "\u{25cf} Read(hello.py)", "Bash(ls [1])"] {
            assert_eq!(clean(line), line);
        }
    }

    #[test]
    fn sentinel_characters_in_input_are_not_placeholders() {
        assert_eq!(
            clean("\u{25cf} Read(a.py)\nnote \u{e000}0\u{e001} end"),
            "\u{25cf} Read(a.py)\nnote 0 end"
        );
    }

    #[test]
    fn preamble_narration_is_removed_but_work_stays() {
        let text = "Let me try again with the correct format.\n\
                    I'll use the Read tool to open the file:\n\
                    The config loader now validates ports.\n\
                    Let me run the tests.";
        assert_eq!(
            clean(text),
            "The config loader now validates ports.\nLet me run the tests."
        );
    }

    #[test]
    fn plan_headers_are_removed() {
        let text = "## Task List\n- write code\n**Implementation Plan:**\n- ship it\nExecution plan";
        assert_eq!(clean(text), "- write code\n- ship it");
    }

    #[test]
    fn citations_are_removed_but_indexing_is_kept() {
        assert_eq!(clean("Rust is fast [1]. See [2, 3] and [^4]."), "Rust is fast. See and.");
        assert_eq!(clean("Source\u{3010}3\u{2020}source\u{3011} here"), "Source here");
        assert_eq!(clean("use arr[1] and [link](http://x) or [x]"), "use arr[1] and [link](http://x) or [x]");
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(clean("a  \n\n\n\nb\t\n\n"), "a\n\nb");
        assert_eq!(clean(" \n \n"), "");
    }

    #[test]
    fn residual_markers_never_survive() {
        for input in ["<<>>", "x <invoke", "A<>B", "<INVOKE name=x"] {
            let out = sanitize_content(input, Some("AB"));
            assert!(!out.contains("<>"), "{input:?} -> {out:?}");
            assert!(!out.to_ascii_lowercase().contains("<invoke"), "{input:?} -> {out:?}");
            assert!(!out.contains("AB"), "{input:?} -> {out:?}");
        }
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "Hello <function_calls><function_call><tool>t</tool></function_call></function_calls> World",
            "\u{25cf} <><invokename=\"TodoWrite\">[{}]",
            "Text [1]\n\n\n<> [1,2]\nmore",
            "## Todo List\nLet me retry.\nkeep me",
            "\u{25cf} Read(hello.py)\n<invoke name=\"x\"></invoke>",
        ];
        for input in inputs {
            let once = clean(input);
            assert_eq!(clean(&once), once, "{input:?}");
        }
    }
}
