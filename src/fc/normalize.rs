//! Per-tool argument shaping for recovered calls.
//!
//! Parsed arguments are only as good as the model's formatting. Known tools
//! get their parameters coerced to the types the client expects, and task
//! list tools get a full rebuild of their item array. Calls that end up with
//! nothing usable are rejected so the caller can drop them individually.
use std::sync::LazyLock;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use super::parser::{coerce_value, FunctionCall};
use super::repair::try_repair_json;
use crate::error::BridgeError;

const TASK_LIST_TOOLS: &[&str] = &["todowrite", "todo_write", "write_todos", "update_todos"];
const TASK_ITEM_KEYS: &[&str] = &[
    "todos",
    "items",
    "tasks",
    "todo_list",
    "todoList",
    "list",
    "value",
];
const CONTENT_KEYS: &[&str] = &["content", "task", "title", "text", "description"];
const MIN_ID_LEN: usize = 3;

// ---------------------------------------------------------------------------
// Tool name resolution
// ---------------------------------------------------------------------------

/// Case-insensitive map from names a model may use to the names the client
/// declared.
#[derive(Debug, Clone, Default)]
pub struct ToolNameMap {
    by_lower: FxHashMap<String, String>,
}

impl ToolNameMap {
    /// Register every declared client tool under its lowercase spelling.
    pub fn from_tool_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = Self::default();
        for name in names {
            let name = name.into();
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                map.by_lower
                    .insert(trimmed.to_ascii_lowercase(), trimmed.to_string());
            }
        }
        map
    }

    #[must_use]
    pub fn with_alias(mut self, alias: &str, canonical: &str) -> Self {
        self.by_lower
            .insert(alias.trim().to_ascii_lowercase(), canonical.to_string());
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_lower.is_empty()
    }

    /// The declared spelling of `name`, or `name` itself when unknown.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        if self.by_lower.is_empty() {
            return name;
        }
        self.by_lower
            .get(&name.to_ascii_lowercase())
            .map_or(name, String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Known tool shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    List,
    Map,
    Integer,
    Text,
}

type ToolShape = &'static [(&'static str, ParamKind)];

static TOOL_SHAPES: LazyLock<FxHashMap<&'static str, ToolShape>> = LazyLock::new(|| {
    use ParamKind::{Integer, List, Map, Text};

    let entries: [(&'static str, ToolShape); 12] = [
        ("bash", &[("command", Text), ("timeout", Integer)]),
        ("read", &[("offset", Integer), ("limit", Integer)]),
        ("write", &[("content", Text)]),
        ("edit", &[("old_string", Text), ("new_string", Text)]),
        ("multiedit", &[("edits", List)]),
        (
            "grep",
            &[
                ("head_limit", Integer),
                ("-A", Integer),
                ("-B", Integer),
                ("-C", Integer),
            ],
        ),
        ("ls", &[("ignore", List)]),
        ("notebookedit", &[("new_source", Text)]),
        (
            "websearch",
            &[("allowed_domains", List), ("blocked_domains", List)],
        ),
        ("askuserquestion", &[("questions", List), ("answers", Map)]),
        ("task", &[("prompt", Text)]),
        ("run_terminal_cmd", &[("command", Text)]),
    ];

    let mut shapes = FxHashMap::default();
    shapes.reserve(entries.len());
    for (name, shape) in entries {
        shapes.insert(name, shape);
    }
    shapes
});

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Normalize one recovered call.
///
/// # Errors
///
/// Returns [`BridgeError::UnrecoverableCall`] when the call has no name or is
/// a task-list call without a single valid item.
pub fn normalize_call(call: FunctionCall, names: &ToolNameMap) -> Result<FunctionCall, BridgeError> {
    let FunctionCall { name, args } = call;
    let name = names.resolve(name.trim()).to_string();
    if name.is_empty() {
        return Err(BridgeError::UnrecoverableCall {
            name,
            reason: "empty tool name".to_string(),
        });
    }

    let lower = name.to_ascii_lowercase();
    if TASK_LIST_TOOLS.contains(&lower.as_str()) {
        let args = normalize_task_list(args).ok_or_else(|| BridgeError::UnrecoverableCall {
            name: name.clone(),
            reason: "no valid task items".to_string(),
        })?;
        return Ok(FunctionCall { name, args });
    }

    let mut args = args;
    if let Some(shape) = TOOL_SHAPES.get(lower.as_str()) {
        apply_shape(&mut args, shape);
    }
    Ok(FunctionCall { name, args })
}

/// Normalize a batch, dropping calls that cannot be recovered and keeping
/// their siblings.
pub fn normalize_calls(calls: Vec<FunctionCall>, names: &ToolNameMap) -> Vec<FunctionCall> {
    let mut out = Vec::with_capacity(calls.len());
    for call in calls {
        match normalize_call(call, names) {
            Ok(call) => out.push(call),
            Err(err) => tracing::warn!(error = %err, "dropping unrecoverable tool call"),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Shaping
// ---------------------------------------------------------------------------

fn apply_shape(args: &mut Map<String, Value>, shape: ToolShape) {
    for &(param, kind) in shape {
        let Some(value) = args.get_mut(param) else {
            continue;
        };
        match kind {
            ParamKind::List => coerce_list(value),
            ParamKind::Map => coerce_map(value),
            ParamKind::Integer => coerce_integer(value),
            ParamKind::Text => unescape_text(value),
        }
    }
}

fn coerce_list(value: &mut Value) {
    if let Value::String(text) = value {
        let decoded = coerce_value(text);
        if !matches!(decoded, Value::String(_)) {
            *value = decoded;
        }
    }
    match value {
        Value::Array(_) | Value::Null => {}
        other => {
            let single = std::mem::take(other);
            *other = Value::Array(vec![single]);
        }
    }
}

fn coerce_map(value: &mut Value) {
    if let Value::String(text) = value {
        if let Value::Object(map) = coerce_value(text) {
            *value = Value::Object(map);
        }
    }
}

fn coerce_integer(value: &mut Value) {
    let Value::String(text) = value else {
        return;
    };
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        *value = Value::from(n);
        return;
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
            *value = Value::from(f as i64);
        }
    }
}

fn unescape_text(value: &mut Value) {
    if let Value::String(text) = value {
        if !text.contains('\n') && text.contains("\\n") {
            *text = text.replace("\\n", "\n");
        }
    }
}

// ---------------------------------------------------------------------------
// Task lists
// ---------------------------------------------------------------------------

fn normalize_task_list(args: Map<String, Value>) -> Option<Map<String, Value>> {
    let raw = locate_items(args)?;
    let items = expand_items(raw, true);

    let mut todos = Vec::with_capacity(items.len());
    for item in items {
        let position = todos.len() + 1;
        if let Some(todo) = normalize_item(item, position) {
            todos.push(todo);
        }
    }
    if todos.is_empty() {
        return None;
    }

    let mut out = Map::new();
    out.insert("todos".to_string(), Value::Array(todos));
    Some(out)
}

fn locate_items(mut args: Map<String, Value>) -> Option<Value> {
    for key in TASK_ITEM_KEYS {
        if let Some(value) = args.remove(*key) {
            return Some(value);
        }
    }
    // The arguments themselves may be a single item.
    if CONTENT_KEYS.iter().any(|key| args.contains_key(*key)) {
        return Some(Value::Object(args));
    }
    None
}

fn expand_items(raw: Value, allow_text: bool) -> Vec<Value> {
    match raw {
        Value::Array(items) => items,
        Value::Object(map) => {
            // `{"todos": [...]}` nested one level deeper than expected.
            if let Some(inner) = TASK_ITEM_KEYS.iter().find_map(|key| map.get(*key)) {
                if inner.is_array() {
                    return expand_items(inner.clone(), false);
                }
            }
            vec![Value::Object(map)]
        }
        Value::String(text) if allow_text => {
            let decoded = serde_json::from_str::<Value>(text.trim()).ok().or_else(|| {
                try_repair_json(&text).and_then(|fixed| serde_json::from_str(&fixed).ok())
            });
            match decoded {
                Some(value @ (Value::Array(_) | Value::Object(_))) => expand_items(value, false),
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

fn normalize_item(item: Value, position: usize) -> Option<Value> {
    let mut map = match item {
        Value::Object(map) => map,
        Value::String(text) if !text.trim().is_empty() => {
            let mut map = Map::new();
            map.insert("content".to_string(), Value::String(text));
            map
        }
        _ => return None,
    };

    let content = CONTENT_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(content_text))?;

    let status = map
        .get("status")
        .or_else(|| map.get("state"))
        .and_then(Value::as_str)
        .map_or("pending", normalize_status);

    let priority = map
        .get("priority")
        .and_then(Value::as_str)
        .map_or("medium", normalize_priority);

    let id = match map.get("id") {
        Some(Value::String(id)) if id.trim().chars().count() >= MIN_ID_LEN => id.trim().to_string(),
        Some(Value::Number(n)) if n.to_string().len() >= MIN_ID_LEN => n.to_string(),
        _ => format!("task-{position}"),
    };

    let active_form = map
        .remove("activeForm")
        .or_else(|| map.remove("active_form"))
        .filter(Value::is_string);

    let mut out = Map::new();
    out.insert("content".to_string(), Value::String(content));
    out.insert("status".to_string(), Value::from(status));
    out.insert("priority".to_string(), Value::from(priority));
    out.insert("id".to_string(), Value::String(id));
    if let Some(active_form) = active_form {
        out.insert("activeForm".to_string(), active_form);
    }
    Some(Value::Object(out))
}

fn content_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn normalize_status(raw: &str) -> &'static str {
    let key = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    match key.as_str() {
        "in_progress" | "inprogress" | "_progress" | "progress" | "doing" | "active"
        | "started" | "working" | "ongoing" => "in_progress",
        "completed" | "complete" | "done" | "finished" | "closed" | "resolved" => "completed",
        _ => "pending",
    }
}

fn normalize_priority(raw: &str) -> &'static str {
    match raw.trim().to_ascii_lowercase().as_str() {
        "high" | "urgent" | "critical" | "important" | "p0" | "p1" => "high",
        "low" | "minor" | "trivial" | "p3" => "low",
        _ => "medium",
    }
}
