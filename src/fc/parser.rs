/// Tool-call parser: recovers `{name, args}` invocations from free model text.
///
/// The text after the last trigger marker is examined with four dialects in
/// priority order; the first dialect that yields at least one named call wins.
///
/// - nested: `<function_calls><function_call><tool>..</tool><args>..</args>`
/// - flat: `<invoke name="x"><parameter name="p">v</parameter></invoke>`
/// - legacy: `<invocation>` / `<tool_call>` with `<name>` and `<parameters>`
/// - merged: `<invokename="x"><parametername="p">v` with no closing tags
///
/// Well-formed nested payloads go through `quick-xml`; everything else is
/// read by a permissive byte scanner that tolerates case drift, single quotes
/// and missing closing tags. Parsing never fails: an empty list means "no
/// calls".
use std::borrow::Cow;

use memchr::{memchr, memchr2, memmem};
use serde_json::{Map, Value};

use super::repair::try_repair_json;
use crate::json_scan::{balanced_json_end, skip_ws, BalancedScan};

const REASONING_TAGS: [(&str, &str); 4] = [
    ("<think>", "</think>"),
    ("<thinking>", "</thinking>"),
    ("<reasoning>", "</reasoning>"),
    ("<analysis>", "</analysis>"),
];

const NAME_TAGS: &[&[u8]] = &[b"tool", b"name", b"tool_name"];
const ARGS_TAGS: &[&[u8]] = &[b"args", b"arguments", b"parameters", b"args_json"];
const MERGED_INVOKE: &[u8] = b"<invokename";
const MERGED_PARAMETER: &[u8] = b"<parametername";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A tool invocation recovered from model text.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments in the order the model wrote them.
    pub args: Map<String, Value>,
}

impl FunctionCall {
    #[must_use]
    pub fn new(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Arguments serialized as a JSON object.
    #[must_use]
    pub fn args_json(&self) -> String {
        serde_json::to_string(&self.args).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Textual convention a call was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Nested,
    Flat,
    Legacy,
    Merged,
}

impl Dialect {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Dialect::Nested => "nested",
            Dialect::Flat => "flat",
            Dialect::Legacy => "legacy",
            Dialect::Merged => "merged",
        }
    }
}

type DialectParser = fn(&str) -> Vec<FunctionCall>;

const DIALECTS: [(Dialect, DialectParser); 4] = [
    (Dialect::Nested, parse_nested),
    (Dialect::Flat, parse_flat),
    (Dialect::Legacy, parse_legacy),
    (Dialect::Merged, parse_merged),
];

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Parse tool calls out of `text`.
///
/// Reasoning blocks are removed first. When `trigger` is non-empty and
/// present, only the text after its last occurrence is examined; when it is
/// absent the whole text is. Calls without a name are discarded.
#[must_use]
pub fn parse_function_calls(text: &str, trigger: Option<&str>) -> Vec<FunctionCall> {
    parse_function_calls_with_dialect(text, trigger).map_or_else(Vec::new, |(_, calls)| calls)
}

/// Like [`parse_function_calls`], also reporting which dialect matched.
#[must_use]
pub fn parse_function_calls_with_dialect(
    text: &str,
    trigger: Option<&str>,
) -> Option<(Dialect, Vec<FunctionCall>)> {
    if text.is_empty() {
        return None;
    }
    let cleaned = remove_reasoning_blocks(text);
    let scope = scope_after_trigger(&cleaned, trigger);

    for (dialect, parse) in DIALECTS {
        let calls: Vec<FunctionCall> = parse(scope)
            .into_iter()
            .filter(|call| !call.name.is_empty())
            .collect();
        if !calls.is_empty() {
            tracing::debug!(
                dialect = dialect.as_str(),
                calls = calls.len(),
                "recovered tool calls from text"
            );
            return Some((dialect, calls));
        }
    }
    None
}

fn scope_after_trigger<'a>(text: &'a str, trigger: Option<&str>) -> &'a str {
    let Some(trigger) = trigger.filter(|t| !t.is_empty()) else {
        return text;
    };
    match memmem::rfind(text.as_bytes(), trigger.as_bytes()) {
        Some(pos) => &text[pos + trigger.len()..],
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Reasoning removal
// ---------------------------------------------------------------------------

/// `(is_open, len)` of a reasoning tag starting at `rest`.
#[inline]
fn reasoning_tag_at(rest: &str) -> Option<(bool, usize)> {
    REASONING_TAGS.iter().find_map(|(open, close)| {
        if rest.starts_with(open) {
            Some((true, open.len()))
        } else if rest.starts_with(close) {
            Some((false, close.len()))
        } else {
            None
        }
    })
}

/// Remove reasoning blocks, nested ones included, in one pass.
///
/// An unmatched opener keeps everything from that opener verbatim; a stray
/// closer at depth zero is kept as text.
fn remove_reasoning_blocks(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    if !REASONING_TAGS
        .iter()
        .any(|(open, _)| memmem::find(bytes, open.as_bytes()).is_some())
    {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut i = 0usize;
    let mut depth = 0usize;
    let mut unmatched_start = 0usize;

    while let Some(rel_lt) = memchr(b'<', &bytes[i..]) {
        let abs = i + rel_lt;
        if depth == 0 {
            out.push_str(&text[i..abs]);
        }
        match reasoning_tag_at(&text[abs..]) {
            Some((true, len)) => {
                if depth == 0 {
                    unmatched_start = abs;
                }
                depth += 1;
                i = abs + len;
            }
            Some((false, len)) if depth > 0 => {
                depth -= 1;
                i = abs + len;
            }
            _ => {
                if depth == 0 {
                    out.push('<');
                }
                i = abs + 1;
            }
        }
    }
    if depth == 0 {
        out.push_str(&text[i..]);
    } else {
        out.push_str(&text[unmatched_start..]);
    }
    Cow::Owned(out)
}

// ---------------------------------------------------------------------------
// Dialect 1: nested
// ---------------------------------------------------------------------------

fn parse_nested(scope: &str) -> Vec<FunctionCall> {
    let bytes = scope.as_bytes();
    let body = match next_open_tag(scope, b"function_calls", 0) {
        Some(wrapper) => {
            if let Some(close) =
                find_close_tag_start_case_insensitive(bytes, b"function_calls", wrapper.body_start)
            {
                let close_end = memchr(b'>', &bytes[close..]).map_or(bytes.len(), |r| close + r + 1);
                if let Some(calls) = parse_nested_strict(&scope[wrapper.start..close_end]) {
                    return calls;
                }
                &scope[wrapper.body_start..close]
            } else {
                &scope[wrapper.body_start..]
            }
        }
        None => scope,
    };
    parse_nested_permissive(body)
}

fn parse_nested_permissive(body: &str) -> Vec<FunctionCall> {
    let mut calls = Vec::with_capacity(2);
    let mut cursor = 0usize;
    while let Some(open) = next_open_tag(body, b"function_call", cursor) {
        let (end, resume) = optional_close(body, b"function_call", open.body_start, &[b"function_call"]);
        let call_body = &body[open.body_start..end];

        let name = extract_first_tag_body_case_insensitive(call_body, NAME_TAGS)
            .map(|name| decode_text(name.trim()).trim().to_string())
            .filter(|name| !name.is_empty())
            .or_else(|| extract_attr_permissive(open.attrs, b"name"));
        if let Some(name) = name {
            let args = extract_first_tag_body_case_insensitive(call_body, ARGS_TAGS)
                .map(parse_args_body)
                .unwrap_or_default();
            calls.push(FunctionCall { name, args });
        }
        cursor = resume.max(open.body_start);
    }
    calls
}

#[derive(Debug, Default)]
struct PendingCall {
    name: String,
    args: Map<String, Value>,
}

#[derive(Debug, Default)]
struct PendingArgs {
    raw: String,
    children: Map<String, Value>,
}

impl PendingArgs {
    fn finish(self) -> Map<String, Value> {
        if !self.children.is_empty() {
            return self.children;
        }
        match coerce_value(&self.raw) {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[derive(Debug)]
enum StrictXmlState {
    Outside,
    InWrapper,
    InCall(PendingCall),
    InName(PendingCall, String),
    InArgs(PendingCall, PendingArgs),
    InArg {
        call: PendingCall,
        args: PendingArgs,
        tag: Vec<u8>,
        key: String,
        text: String,
    },
}

/// Read a complete `<function_calls>` element with quick-xml.
///
/// Returns `None` on any XML error or when no named call was found, so the
/// permissive scanner gets a chance.
fn parse_nested_strict(xml: &str) -> Option<Vec<FunctionCall>> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut calls = Vec::with_capacity(2);
    let mut state = StrictXmlState::Outside;

    loop {
        let event = reader.read_event().ok()?;
        state = match (state, event) {
            (StrictXmlState::Outside, Event::Start(e))
                if e.name().as_ref().eq_ignore_ascii_case(b"function_calls") =>
            {
                StrictXmlState::InWrapper
            }
            (StrictXmlState::InWrapper, Event::Start(e))
                if e.name().as_ref().eq_ignore_ascii_case(b"function_call") =>
            {
                StrictXmlState::InCall(PendingCall {
                    name: quick_xml_attr(&e, b"name").unwrap_or_default(),
                    args: Map::new(),
                })
            }
            (StrictXmlState::InCall(call), Event::Start(e)) => {
                let tag = e.name().as_ref().to_ascii_lowercase();
                if NAME_TAGS.contains(&tag.as_slice()) {
                    StrictXmlState::InName(call, String::new())
                } else if ARGS_TAGS.contains(&tag.as_slice()) {
                    StrictXmlState::InArgs(call, PendingArgs::default())
                } else {
                    StrictXmlState::InCall(call)
                }
            }
            (StrictXmlState::InArgs(call, args), Event::Start(e)) => {
                let tag = e.name().as_ref().to_vec();
                let key = child_key(&tag, quick_xml_attr(&e, b"name"));
                StrictXmlState::InArg {
                    call,
                    args,
                    tag,
                    key,
                    text: String::new(),
                }
            }
            (StrictXmlState::InArgs(call, mut args), Event::Empty(e)) => {
                let key = child_key(e.name().as_ref(), quick_xml_attr(&e, b"name"));
                args.children.insert(key, Value::String(String::new()));
                StrictXmlState::InArgs(call, args)
            }
            (StrictXmlState::InName(mut call, text), Event::End(_)) => {
                call.name = text.trim().to_string();
                StrictXmlState::InCall(call)
            }
            (
                StrictXmlState::InArg {
                    call,
                    mut args,
                    tag,
                    key,
                    text,
                },
                Event::End(e),
            ) if e.name().as_ref().eq_ignore_ascii_case(&tag) => {
                args.children.insert(key, coerce_value(&text));
                StrictXmlState::InArgs(call, args)
            }
            (StrictXmlState::InArgs(mut call, args), Event::End(_)) => {
                call.args = args.finish();
                StrictXmlState::InCall(call)
            }
            (StrictXmlState::InCall(call), Event::End(e))
                if e.name().as_ref().eq_ignore_ascii_case(b"function_call") =>
            {
                if !call.name.is_empty() {
                    calls.push(FunctionCall::new(call.name, call.args));
                }
                StrictXmlState::InWrapper
            }
            (StrictXmlState::InWrapper, Event::End(e))
                if e.name().as_ref().eq_ignore_ascii_case(b"function_calls") =>
            {
                StrictXmlState::Outside
            }
            (StrictXmlState::InName(call, mut text), Event::Text(e)) => {
                text.push_str(&e.unescape().ok()?);
                StrictXmlState::InName(call, text)
            }
            (StrictXmlState::InArgs(call, mut args), Event::Text(e)) => {
                args.raw.push_str(&e.unescape().ok()?);
                StrictXmlState::InArgs(call, args)
            }
            (StrictXmlState::InArgs(call, mut args), Event::CData(e)) => {
                args.raw.push_str(&String::from_utf8_lossy(&e));
                StrictXmlState::InArgs(call, args)
            }
            (
                StrictXmlState::InArg {
                    call,
                    args,
                    tag,
                    key,
                    mut text,
                },
                Event::Text(e),
            ) => {
                text.push_str(&e.unescape().ok()?);
                StrictXmlState::InArg {
                    call,
                    args,
                    tag,
                    key,
                    text,
                }
            }
            (
                StrictXmlState::InArg {
                    call,
                    args,
                    tag,
                    key,
                    mut text,
                },
                Event::CData(e),
            ) => {
                text.push_str(&String::from_utf8_lossy(&e));
                StrictXmlState::InArg {
                    call,
                    args,
                    tag,
                    key,
                    text,
                }
            }
            (_, Event::Eof) => break,
            (state, _) => state,
        };
    }

    (!calls.is_empty()).then_some(calls)
}

fn quick_xml_attr(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref().eq_ignore_ascii_case(key))
        .map(|attr| String::from_utf8_lossy(&attr.value).trim().to_string())
}

/// Argument key for a child element: `<parameter name="k">` style children
/// are keyed by their attribute, everything else by tag name.
fn child_key(tag: &[u8], name_attr: Option<String>) -> String {
    let named_child = [b"parameter".as_slice(), b"param", b"arg"]
        .iter()
        .any(|generic| tag.eq_ignore_ascii_case(generic));
    match name_attr {
        Some(name) if named_child && !name.is_empty() => name,
        _ => String::from_utf8_lossy(tag).into_owned(),
    }
}

// ---------------------------------------------------------------------------
// Dialect 2: flat
// ---------------------------------------------------------------------------

fn parse_flat(scope: &str) -> Vec<FunctionCall> {
    let mut calls = Vec::with_capacity(2);
    let mut cursor = 0usize;
    while let Some(open) = next_open_tag(scope, b"invoke", cursor) {
        let (end, resume) = optional_close(scope, b"invoke", open.body_start, &[b"invoke"]);
        if let Some(name) = extract_attr_permissive(open.attrs, b"name") {
            let body = &scope[open.body_start..end];
            let mut args = Map::new();
            let mut param_cursor = 0usize;
            while let Some(param) = next_open_tag(body, b"parameter", param_cursor) {
                let (value_end, param_resume) =
                    optional_close(body, b"parameter", param.body_start, &[b"parameter"]);
                if let Some(key) = extract_attr_permissive(param.attrs, b"name") {
                    let raw = decode_text(&body[param.body_start..value_end]);
                    args.insert(key, coerce_value(&raw));
                }
                param_cursor = param_resume.max(param.body_start);
            }
            calls.push(FunctionCall { name, args });
        }
        cursor = resume.max(open.body_start);
    }
    calls
}

// ---------------------------------------------------------------------------
// Dialect 3: legacy
// ---------------------------------------------------------------------------

fn parse_legacy(scope: &str) -> Vec<FunctionCall> {
    let mut found: Vec<(usize, FunctionCall)> = Vec::new();
    for tag in [b"invocation".as_slice(), b"tool_call".as_slice()] {
        let mut cursor = 0usize;
        while let Some(open) = next_open_tag(scope, tag, cursor) {
            let (end, resume) = optional_close(scope, tag, open.body_start, &[tag]);
            if let Some(call) = parse_legacy_body(&scope[open.body_start..end], open.attrs) {
                found.push((open.start, call));
            }
            cursor = resume.max(open.body_start);
        }
    }
    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, call)| call).collect()
}

fn parse_legacy_body(body: &str, attrs: &str) -> Option<FunctionCall> {
    let name = extract_first_tag_body_case_insensitive(body, NAME_TAGS)
        .map(|name| decode_text(name.trim()).trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| extract_attr_permissive(attrs, b"name"));

    if let Some(name) = name {
        let args = extract_first_tag_body_case_insensitive(body, ARGS_TAGS)
            .map(parse_args_body)
            .unwrap_or_default();
        return Some(FunctionCall { name, args });
    }

    // `<tool_call>{"name": "...", "arguments": {...}}</tool_call>`
    let Value::Object(mut object) = coerce_value(&decode_text(body)) else {
        return None;
    };
    let name = match object.remove("name") {
        Some(Value::String(name)) => name.trim().to_string(),
        _ => return None,
    };
    let args = match object
        .remove("arguments")
        .or_else(|| object.remove("parameters"))
    {
        Some(Value::Object(args)) => args,
        Some(Value::String(raw)) => match coerce_value(&raw) {
            Value::Object(args) => args,
            _ => Map::new(),
        },
        _ => Map::new(),
    };
    Some(FunctionCall { name, args })
}

// ---------------------------------------------------------------------------
// Dialect 4: merged
// ---------------------------------------------------------------------------

/// Tag and attribute fused with no space and no closing tags. Only the first
/// invocation is recovered: fused runs carry no delimiter between calls.
fn parse_merged(scope: &str) -> Vec<FunctionCall> {
    let bytes = scope.as_bytes();
    let Some(start) = find_ascii_case_insensitive(bytes, MERGED_INVOKE) else {
        return Vec::new();
    };
    let Some((name, mut cursor)) = read_fused_attr_value(scope, start + MERGED_INVOKE.len())
    else {
        return Vec::new();
    };

    let mut args = Map::new();
    loop {
        cursor = skip_ws(bytes, cursor);
        let rest = &bytes[cursor..];
        if rest.len() >= MERGED_PARAMETER.len()
            && rest[..MERGED_PARAMETER.len()].eq_ignore_ascii_case(MERGED_PARAMETER)
        {
            let Some((key, value_start)) =
                read_fused_attr_value(scope, cursor + MERGED_PARAMETER.len())
            else {
                break;
            };
            let value_end = merged_value_end(bytes, value_start);
            let raw = decode_text(&scope[value_start..value_end]);
            if !key.is_empty() {
                args.insert(key, coerce_value(&raw));
            }
            cursor = value_end;
            continue;
        }
        if args.is_empty() && matches!(rest.first(), Some(b'[' | b'{')) {
            let end = match balanced_json_end(bytes, cursor) {
                BalancedScan::Closed(end) => end,
                _ => bytes.len(),
            };
            match coerce_value(&scope[cursor..end]) {
                Value::Object(map) => args = map,
                other => {
                    args.insert("value".to_string(), other);
                }
            }
        }
        break;
    }

    if name.is_empty() {
        return Vec::new();
    }
    vec![FunctionCall { name, args }]
}

/// Read `="value">` following a fused tag name. Returns the value and the
/// offset after the closing `>` (or after the value when `>` is missing).
fn read_fused_attr_value(text: &str, from: usize) -> Option<(String, usize)> {
    let bytes = text.as_bytes();
    let mut i = skip_ws(bytes, from);
    if bytes.get(i) != Some(&b'=') {
        return None;
    }
    i = skip_ws(bytes, i + 1);
    let (value, mut after) = match bytes.get(i).copied() {
        Some(quote @ (b'"' | b'\'')) => {
            let value_start = i + 1;
            let value_end =
                memchr(quote, &bytes[value_start..]).map_or(bytes.len(), |r| value_start + r);
            (&text[value_start..value_end], (value_end + 1).min(bytes.len()))
        }
        Some(_) => {
            let value_end = bytes[i..]
                .iter()
                .position(|b| matches!(b, b'>' | b'/' | b'<') || b.is_ascii_whitespace())
                .map_or(bytes.len(), |r| i + r);
            (&text[i..value_end], value_end)
        }
        None => return None,
    };
    after = skip_ws(bytes, after);
    if bytes.get(after) == Some(&b'/') {
        after += 1;
    }
    if bytes.get(after) == Some(&b'>') {
        after += 1;
    }
    Some((value.trim().to_string(), after))
}

/// End of a merged parameter value: a JSON value runs to its balanced end,
/// anything else to end of line or the next tag.
fn merged_value_end(bytes: &[u8], from: usize) -> usize {
    let first = skip_ws(bytes, from);
    if matches!(bytes.get(first), Some(b'[' | b'{')) {
        return match balanced_json_end(bytes, first) {
            BalancedScan::Closed(end) => end,
            _ => bytes.len(),
        };
    }
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => return i,
            b'<' if bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || matches!(b, b'/' | b'>')) =>
            {
                return i;
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

// ---------------------------------------------------------------------------
// Argument bodies and value coercion
// ---------------------------------------------------------------------------

/// Arguments from an `<args>`-style body: a JSON object, or child elements.
fn parse_args_body(body: &str) -> Map<String, Value> {
    let decoded = decode_text(body);
    let trimmed = decoded.trim();
    if trimmed.starts_with('{') {
        if let Value::Object(map) = coerce_value(trimmed) {
            return map;
        }
    }
    collect_child_elements(body)
}

/// `<key>value</key>` pairs directly inside `body`.
fn collect_child_elements(body: &str) -> Map<String, Value> {
    let bytes = body.as_bytes();
    let mut out = Map::new();
    let mut cursor = 0usize;
    while let Some(rel_lt) = memchr(b'<', &bytes[cursor..]) {
        let start = cursor + rel_lt;
        let name_start = start + 1;
        let name_len = bytes[name_start..]
            .iter()
            .take_while(|&&b| is_ascii_word_char(b) || matches!(b, b'-' | b'.' | b':'))
            .count();
        if name_len == 0 {
            cursor = name_start;
            continue;
        }
        let tag = &bytes[name_start..name_start + name_len];
        let Some(open) = next_open_tag(body, tag, start) else {
            cursor = name_start;
            continue;
        };
        let key = child_key(tag, extract_attr_permissive(open.attrs, b"name"));
        if bytes[..open.body_start].ends_with(b"/>") {
            out.insert(key, Value::String(String::new()));
            cursor = open.body_start;
            continue;
        }
        let Some(close) = find_close_tag_start_case_insensitive(bytes, tag, open.body_start) else {
            cursor = open.body_start;
            continue;
        };
        let raw = decode_text(&body[open.body_start..close]);
        out.insert(key, coerce_value(&raw));
        cursor = memchr(b'>', &bytes[close..]).map_or(bytes.len(), |r| close + r + 1);
    }
    out
}

/// Coerce a raw argument value.
///
/// JSON-looking text is parsed; bracketed text that fails to parse goes
/// through the repair engine; anything else stays a trimmed string.
pub(crate) fn coerce_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if should_attempt_json_parse(trimmed) {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
        if trimmed.starts_with(['{', '[']) {
            if let Some(value) =
                try_repair_json(trimmed).and_then(|fixed| serde_json::from_str(&fixed).ok())
            {
                return value;
            }
        }
    }
    Value::String(trimmed.to_string())
}

#[inline]
fn should_attempt_json_parse(trimmed: &str) -> bool {
    let Some(first) = trimmed.as_bytes().first().copied() else {
        return false;
    };
    matches!(
        first,
        b'{' | b'[' | b'"' | b'-' | b'0'..=b'9' | b't' | b'f' | b'n'
    )
}

/// CDATA sections are unwrapped verbatim; otherwise XML entities are decoded.
fn decode_text(raw: &str) -> Cow<'_, str> {
    match unwrap_cdata(raw) {
        Cow::Owned(inner) => Cow::Owned(inner),
        Cow::Borrowed(text) => decode_xml_entities(text),
    }
}

/// Concatenate the inner content of all CDATA sections, or return the text
/// unchanged when there are none (or one is unterminated).
fn unwrap_cdata(text: &str) -> Cow<'_, str> {
    const CDATA_OPEN: &[u8] = b"<![CDATA[";
    const CDATA_CLOSE: &[u8] = b"]]>";

    let bytes = text.as_bytes();
    let mut out: Option<String> = None;
    let mut cursor = 0usize;
    while let Some(open_rel) = memmem::find(&bytes[cursor..], CDATA_OPEN) {
        let content_start = cursor + open_rel + CDATA_OPEN.len();
        let Some(close_rel) = memmem::find(&bytes[content_start..], CDATA_CLOSE) else {
            return Cow::Borrowed(text);
        };
        let content_end = content_start + close_rel;
        out.get_or_insert_with(|| String::with_capacity(text.len()))
            .push_str(&text[content_start..content_end]);
        cursor = content_end + CDATA_CLOSE.len();
    }
    out.map_or(Cow::Borrowed(text), Cow::Owned)
}

fn decode_xml_entities(text: &str) -> Cow<'_, str> {
    const ENTITIES: [(&str, char); 5] = [
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&apos;", '\''),
    ];

    let Some(first_amp) = memchr(b'&', text.as_bytes()) else {
        return Cow::Borrowed(text);
    };
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..first_amp]);
    let mut rest = &text[first_amp..];
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match ENTITIES
            .iter()
            .find(|(entity, _)| rest.starts_with(entity))
        {
            Some((entity, ch)) => {
                out.push(*ch);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

// ---------------------------------------------------------------------------
// Tag scanning
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct OpenTag<'a> {
    start: usize,
    attrs: &'a str,
    body_start: usize,
}

#[derive(Clone, Copy)]
struct TagBlock<'a> {
    start: usize,
    body: &'a str,
}

#[inline]
const fn is_ascii_word_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn find_open_tag_start_case_insensitive(bytes: &[u8], tag_name: &[u8], from: usize) -> Option<usize> {
    let mut cursor = from;
    while let Some(rel_lt) = memchr(b'<', bytes.get(cursor..)?) {
        let start = cursor + rel_lt;
        let name_start = start + 1;
        let name_end = name_start + tag_name.len();
        if bytes
            .get(name_start..name_end)
            .is_some_and(|name| name.eq_ignore_ascii_case(tag_name))
            && !bytes.get(name_end).copied().is_some_and(is_ascii_word_char)
        {
            return Some(start);
        }
        cursor = start + 1;
    }
    None
}

fn find_close_tag_start_case_insensitive(
    bytes: &[u8],
    tag_name: &[u8],
    from: usize,
) -> Option<usize> {
    let mut cursor = from;
    while let Some(rel) = memmem::find(bytes.get(cursor..)?, b"</") {
        let start = cursor + rel;
        let name_start = start + 2;
        let name_end = name_start + tag_name.len();
        if bytes
            .get(name_start..name_end)
            .is_some_and(|name| name.eq_ignore_ascii_case(tag_name))
            && !bytes.get(name_end).copied().is_some_and(is_ascii_word_char)
        {
            return Some(start);
        }
        cursor = start + 2;
    }
    None
}

/// Locate `<tag ...>` at or after `from`. A missing `>` runs to end of text.
fn next_open_tag<'a>(text: &'a str, tag: &[u8], from: usize) -> Option<OpenTag<'a>> {
    let bytes = text.as_bytes();
    let start = find_open_tag_start_case_insensitive(bytes, tag, from)?;
    let name_end = start + 1 + tag.len();
    let gt = memchr(b'>', &bytes[name_end..]).map_or(bytes.len(), |r| name_end + r);
    let attrs = text.get(name_end..gt)?.trim_end_matches('/');
    Some(OpenTag {
        start,
        attrs,
        body_start: (gt + 1).min(bytes.len()),
    })
}

/// Body extent of an element whose closing tag is optional.
///
/// The body stops at its own closing tag, at the first sibling opener in
/// `stops`, or at end of text, whichever comes first. Returns
/// `(body_end, resume)` where `resume` is past the closing tag when one was
/// used.
fn optional_close(text: &str, tag: &[u8], body_start: usize, stops: &[&[u8]]) -> (usize, usize) {
    let bytes = text.as_bytes();
    let (mut end, mut resume) = match find_close_tag_start_case_insensitive(bytes, tag, body_start)
    {
        Some(close) => (
            close,
            memchr(b'>', &bytes[close..]).map_or(bytes.len(), |r| close + r + 1),
        ),
        None => (bytes.len(), bytes.len()),
    };
    for stop in stops {
        if let Some(pos) = find_open_tag_start_case_insensitive(bytes, stop, body_start) {
            if pos < end {
                end = pos;
                resume = pos;
            }
        }
    }
    (end, resume)
}

/// Closed `<tag>body</tag>` element at or after `from`.
fn next_tag_block_case_insensitive<'a>(
    text: &'a str,
    tag: &[u8],
    from: usize,
) -> Option<TagBlock<'a>> {
    let bytes = text.as_bytes();
    let mut search_from = from;
    while let Some(open) = next_open_tag(text, tag, search_from) {
        if let Some(close) = find_close_tag_start_case_insensitive(bytes, tag, open.body_start) {
            return Some(TagBlock {
                start: open.start,
                body: &text[open.body_start..close],
            });
        }
        search_from = open.start + 1;
    }
    None
}

fn extract_first_tag_body_case_insensitive<'a>(text: &'a str, tags: &[&[u8]]) -> Option<&'a str> {
    tags.iter()
        .filter_map(|tag| next_tag_block_case_insensitive(text, tag, 0))
        .min_by_key(|block| block.start)
        .map(|block| block.body)
}

/// Value of `attr="..."` (or single-quoted) inside a tag's attribute text.
fn extract_attr_permissive(attrs: &str, attr: &[u8]) -> Option<String> {
    let bytes = attrs.as_bytes();
    let mut search_from = 0usize;
    while let Some(rel) = find_ascii_case_insensitive(&bytes[search_from..], attr) {
        let name_start = search_from + rel;
        let name_end = name_start + attr.len();
        search_from = name_start + 1;

        let left_ok = name_start == 0 || !is_ascii_word_char(bytes[name_start - 1]);
        let right_ok = !bytes.get(name_end).copied().is_some_and(is_ascii_word_char);
        if !left_ok || !right_ok {
            continue;
        }
        let idx = skip_ws(bytes, name_end);
        if bytes.get(idx) != Some(&b'=') {
            continue;
        }
        let idx = skip_ws(bytes, idx + 1);
        let quote = *bytes.get(idx)?;
        if quote != b'"' && quote != b'\'' {
            continue;
        }
        let value_start = idx + 1;
        let value_end = value_start + memchr(quote, &bytes[value_start..])?;
        let value = decode_xml_entities(attrs.get(value_start..value_end)?.trim());
        return Some(value.into_owned()).filter(|v| !v.is_empty());
    }
    None
}

#[inline]
fn find_ascii_case_insensitive(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let (&first, _) = needle.split_first()?;
    let mut cursor = 0usize;
    while let Some(rel) = memchr2(
        first.to_ascii_lowercase(),
        first.to_ascii_uppercase(),
        &haystack[cursor..],
    ) {
        let start = cursor + rel;
        if haystack
            .get(start..start + needle.len())
            .is_some_and(|window| window.eq_ignore_ascii_case(needle))
        {
            return Some(start);
        }
        cursor = start + 1;
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
