use serde_json::{json, Value};
use toolbridge_rs::fc::{
    normalize_calls, parse_function_calls, repair_json, sanitize_content, ToolNameMap,
};

const TRIGGER: &str = "<Function_Qx9z_Start/>";

#[test]
fn flat_call_after_trigger_parses_typed_and_sanitizes_away() {
    let text = format!(
        "{TRIGGER}<invoke name=\"read_file\"><parameter name=\"path\">test.py</parameter>\
         <parameter name=\"recursive\">false</parameter></invoke>"
    );
    let calls = parse_function_calls(&text, Some(TRIGGER));
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "read_file");
    assert_eq!(
        Value::Object(calls[0].args.clone()),
        json!({"path": "test.py", "recursive": false})
    );
    assert_eq!(sanitize_content(&text, Some(TRIGGER)), "");
}

#[test]
fn echoed_trigger_in_reasoning_is_ignored() {
    let text = format!(
        "I will emit {TRIGGER} once ready.\n<invoke name=\"a\"></invoke>\n\
         {TRIGGER}<invoke name=\"b\"><parameter name=\"x\">1</parameter></invoke>"
    );
    let calls = parse_function_calls(&text, Some(TRIGGER));
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "b");
    assert_eq!(calls[0].args["x"], json!(1));
}

#[test]
fn merged_dialect_recovers_one_call_and_leaves_no_text() {
    let text = "<><invokename=\"Glob\"><parametername=\"pattern\">*";
    let calls = parse_function_calls(text, None);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "Glob");
    assert_eq!(calls[0].args["pattern"], json!("*"));
    assert_eq!(sanitize_content(text, None), "");
}

#[test]
fn no_markup_means_no_calls() {
    assert!(parse_function_calls("Just prose, nothing to run.", Some(TRIGGER)).is_empty());
    assert!(parse_function_calls("", None).is_empty());
}

#[test]
fn task_list_items_are_completed_after_parsing() {
    let text = format!(
        "{TRIGGER}<function_calls><function_call><tool>TodoWrite</tool><args_json>\
         {{\"todos\":[{{\"content\":\"x\",\"state\":\"pending\"}},{{\"content\":\"y\",\"status\":\"completed\"}}]}}\
         </args_json></function_call></function_calls>"
    );
    let names = ToolNameMap::from_tool_names(["TodoWrite"]);
    let calls = normalize_calls(parse_function_calls(&text, Some(TRIGGER)), &names);
    assert_eq!(calls.len(), 1);
    let items = calls[0].args["todos"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    for item in items {
        assert!(item["content"].is_string());
        let status = item["status"].as_str().unwrap();
        assert!(["pending", "in_progress", "completed"].contains(&status));
        assert!(!item["priority"].as_str().unwrap().is_empty());
        assert!(item["id"].as_str().unwrap().len() >= 3);
    }
    assert_eq!(items[1]["status"], json!("completed"));
}

#[test]
fn sibling_calls_survive_an_unrecoverable_one() {
    let text = "<function_calls>\
        <function_call><tool>TodoWrite</tool><args_json>{\"todos\":[]}</args_json></function_call>\
        <function_call><tool>Read</tool><args_json>{\"file_path\":\"/a\"}</args_json></function_call>\
        </function_calls>";
    let calls = normalize_calls(parse_function_calls(text, None), &ToolNameMap::default());
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "Read");
}

#[test]
fn repair_output_always_decodes() {
    let inputs = [
        "",
        "   ",
        "garbage",
        "{\"a\":1",
        "[{\"content\":\"x\",}]",
        "{\"a\":1}{\"b\":2}",
        "[{\"content\":\"x\",state\":\"_progress\"}]",
        "key: value; other => thing",
        "{{{{",
        "]]}}",
        "\"unterminated",
        "[1, 2, tru",
    ];
    for input in inputs {
        let out = repair_json(input);
        assert!(
            serde_json::from_str::<Value>(&out).is_ok(),
            "{input:?} repaired to {out:?}"
        );
    }
    assert_eq!(repair_json(""), "[]");
}

#[test]
fn sanitized_output_never_carries_markers() {
    let inputs = [
        format!("before {TRIGGER} after"),
        "x <invoke name=\"a\"><parameter name=\"p\">v</parameter></invoke> y".to_string(),
        "<> [1, 2]\nnext".to_string(),
        "<invokename=\"Bash\">ls -la\nline two".to_string(),
        format!("{TRIGGER}\n<function_calls>\n<invoke name=\"x\">"),
    ];
    for input in &inputs {
        let out = sanitize_content(input, Some(TRIGGER));
        assert!(!out.contains("<invoke"), "{input:?} -> {out:?}");
        assert!(!out.contains("<>"), "{input:?} -> {out:?}");
        assert!(!out.contains(TRIGGER), "{input:?} -> {out:?}");
    }
}

#[test]
fn tool_result_lines_and_bullets_are_preserved() {
    assert_eq!(
        sanitize_content("\u{25cf} Search(pattern: \"*\")", None),
        "\u{25cf} Search(pattern: \"*\")"
    );
    assert_eq!(
        sanitize_content("\u{25cf} <><invokename=\"TodoWrite\">[{}]", None),
        "\u{25cf}"
    );
}
