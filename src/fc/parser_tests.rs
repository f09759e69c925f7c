use super::*;
use serde_json::json;

const TRIGGER: &str = "<Function_AB12_Start/>";

fn single(text: &str, trigger: Option<&str>) -> FunctionCall {
    let calls = parse_function_calls(text, trigger);
    assert_eq!(calls.len(), 1, "expected one call, got {calls:?}");
    calls.into_iter().next().expect("one call")
}

// -- remove_reasoning_blocks ---------------------------------------------

#[test]
fn remove_reasoning_no_blocks() {
    assert_eq!(remove_reasoning_blocks("Hello world"), "Hello world");
}

#[test]
fn remove_reasoning_each_wrapper() {
    for (open, close) in REASONING_TAGS {
        let input = format!("before{open}hidden{close}after");
        assert_eq!(remove_reasoning_blocks(&input), "beforeafter", "{open}");
    }
}

#[test]
fn remove_reasoning_nested_blocks() {
    let input = "a<think>outer<think>inner</think>still outer</think>b";
    assert_eq!(remove_reasoning_blocks(input), "ab");
}

#[test]
fn remove_reasoning_unclosed_block_is_kept() {
    let input = "before<think>never closed";
    assert_eq!(remove_reasoning_blocks(input), "before<think>never closed");
}

#[test]
fn remove_reasoning_stray_close_is_text() {
    assert_eq!(remove_reasoning_blocks("x</think>y<think>z</think>"), "x</think>y");
}

// -- trigger scoping -----------------------------------------------------

#[test]
fn flat_call_after_trigger_with_typed_boolean() {
    let text = "T<invoke name=\"read_file\"><parameter name=\"path\">test.py</parameter>\
                <parameter name=\"recursive\">false</parameter></invoke>";
    let call = single(text, Some("T"));
    assert_eq!(call.name, "read_file");
    assert_eq!(Value::Object(call.args.clone()), json!({"path": "test.py", "recursive": false}));
    assert!(call.args["recursive"].is_boolean());
}

#[test]
fn only_text_after_last_trigger_is_parsed() {
    let text = format!(
        "{TRIGGER}<invoke name=\"echoed\"></invoke> thinking aloud\n\
         {TRIGGER}<invoke name=\"real\"><parameter name=\"q\">x</parameter></invoke>"
    );
    let call = single(&text, Some(TRIGGER));
    assert_eq!(call.name, "real");
}

#[test]
fn absent_trigger_parses_whole_text() {
    let call = single("<invoke name=\"Bash\"><parameter name=\"command\">ls</parameter></invoke>", Some(TRIGGER));
    assert_eq!(call.name, "Bash");
    assert_eq!(call.args["command"], "ls");
}

#[test]
fn empty_trigger_means_no_scoping() {
    let call = single("<invoke name=\"A\"></invoke>", Some(""));
    assert_eq!(call.name, "A");
}

#[test]
fn calls_inside_reasoning_are_ignored() {
    let text = "<think><invoke name=\"draft\"></invoke></think>no calls here";
    assert!(parse_function_calls(text, None).is_empty());
}

#[test]
fn plain_text_has_no_calls() {
    assert!(parse_function_calls("", Some(TRIGGER)).is_empty());
    assert!(parse_function_calls("just prose, nothing else", Some(TRIGGER)).is_empty());
    assert!(parse_function_calls("a < b and c > d", None).is_empty());
}

// -- nested dialect ------------------------------------------------------

#[test]
fn nested_strict_with_child_arguments() {
    let text = format!(
        "{TRIGGER}<function_calls><function_call><tool>search</tool>\
         <args><query>rust async</query><limit>5</limit></args>\
         </function_call></function_calls>"
    );
    let (dialect, calls) = parse_function_calls_with_dialect(&text, Some(TRIGGER)).expect("calls");
    assert_eq!(dialect, Dialect::Nested);
    assert_eq!(calls[0].name, "search");
    assert_eq!(calls[0].args["query"], "rust async");
    assert_eq!(calls[0].args["limit"], 5);
}

#[test]
fn nested_json_arguments_in_cdata() {
    let text = "<function_calls><function_call><tool>write</tool>\
                <args_json><![CDATA[{\"path\":\"a.txt\",\"content\":\"<b>hi</b>\"}]]></args_json>\
                </function_call></function_calls>";
    let call = single(text, None);
    assert_eq!(call.args["path"], "a.txt");
    assert_eq!(call.args["content"], "<b>hi</b>");
}

#[test]
fn nested_preserves_argument_order() {
    let text = "<function_calls><function_call><name>t</name>\
                <arguments><zeta>1</zeta><alpha>2</alpha><mid>3</mid></arguments>\
                </function_call></function_calls>";
    let call = single(text, None);
    let keys: Vec<&str> = call.args.keys().map(String::as_str).collect();
    assert_eq!(keys, ["zeta", "alpha", "mid"]);
}

#[test]
fn nested_multiple_calls() {
    let text = "<function_calls>\
                <function_call><tool>a</tool></function_call>\
                <function_call><tool>b</tool><args>{\"x\":1}</args></function_call>\
                </function_calls>";
    let calls = parse_function_calls(text, None);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].args["x"], 1);
}

#[test]
fn nested_without_closing_wrapper_falls_back_to_scanner() {
    let text = "<function_calls>\n<FUNCTION_CALL><Tool>grep</Tool>\
                <parameters><pattern>&lt;div&gt;</pattern></parameters>";
    let call = single(text, None);
    assert_eq!(call.name, "grep");
    assert_eq!(call.args["pattern"], "<div>");
}

#[test]
fn nested_malformed_xml_uses_permissive_scanner() {
    let text = "<function_calls><function_call><tool>run</tool>\
                <args><cmd>a & b</cmd></args></function_call></function_calls>";
    let call = single(text, None);
    assert_eq!(call.args["cmd"], "a & b");
}

#[test]
fn nested_repairs_broken_json_arguments() {
    let text = "<function_calls><function_call><tool>TodoWrite</tool>\
                <args>{\"todos\":[{\"content\":\"x\",\"status\":\"pending\",}]</args>\
                </function_call></function_calls>";
    let call = single(text, None);
    assert_eq!(call.args["todos"][0]["content"], "x");
}

// -- flat dialect --------------------------------------------------------

#[test]
fn flat_inside_wrapper_and_single_quotes() {
    let text = format!(
        "{TRIGGER}\n<function_calls>\n<invoke name='Edit'>\
         <parameter name='file_path'>src/lib.rs</parameter>\
         <parameter name='old_string'>a</parameter></invoke>\n</function_calls>"
    );
    let (dialect, calls) = parse_function_calls_with_dialect(&text, Some(TRIGGER)).expect("calls");
    assert_eq!(dialect, Dialect::Flat);
    assert_eq!(calls[0].name, "Edit");
    assert_eq!(calls[0].args["file_path"], "src/lib.rs");
}

#[test]
fn flat_missing_closing_tags() {
    let text = "<INVOKE NAME=\"Glob\"><parameter name=\"pattern\">**/*.rs\n\
                <parameter name=\"path\">src";
    let call = single(text, None);
    assert_eq!(call.args["pattern"], "**/*.rs");
    assert_eq!(call.args["path"], "src");
}

#[test]
fn flat_values_are_coerced() {
    let text = "<invoke name=\"t\">\
                <parameter name=\"n\">42</parameter>\
                <parameter name=\"list\">[\"a\",\"b\"]</parameter>\
                <parameter name=\"obj\">{\"k\": null}</parameter>\
                <parameter name=\"quoted\">\"7\"</parameter>\
                <parameter name=\"text\">  hello  </parameter>\
                <parameter name=\"num_like\">3 files</parameter>\
                </invoke>";
    let call = single(text, None);
    assert_eq!(call.args["n"], 42);
    assert_eq!(call.args["list"], json!(["a", "b"]));
    assert_eq!(call.args["obj"], json!({"k": null}));
    assert_eq!(call.args["quoted"], "7");
    assert_eq!(call.args["text"], "hello");
    assert_eq!(call.args["num_like"], "3 files");
}

#[test]
fn flat_two_invokes() {
    let text = "<invoke name=\"a\"></invoke><invoke name=\"b\"></invoke>";
    let names: Vec<String> = parse_function_calls(text, None)
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, ["a", "b"]);
}

#[test]
fn invoke_without_name_is_dropped() {
    assert!(parse_function_calls("<invoke><parameter name=\"x\">1</parameter></invoke>", None).is_empty());
}

// -- legacy dialect ------------------------------------------------------

#[test]
fn legacy_invocation_with_parameters_block() {
    let text = "<invocation><name>Read</name>\
                <parameters><file_path>/tmp/a</file_path><limit>10</limit></parameters>\
                </invocation>";
    let (dialect, calls) = parse_function_calls_with_dialect(text, None).expect("calls");
    assert_eq!(dialect, Dialect::Legacy);
    assert_eq!(calls[0].name, "Read");
    assert_eq!(calls[0].args["limit"], 10);
}

#[test]
fn legacy_tool_call_with_tool_name_and_named_parameters() {
    let text = "<tool_call><tool_name>Bash</tool_name><parameters>\
                <parameter name=\"command\">cargo fmt</parameter></parameters></tool_call>";
    let call = single(text, None);
    assert_eq!(call.name, "Bash");
    assert_eq!(call.args["command"], "cargo fmt");
}

#[test]
fn legacy_tool_call_json_body() {
    let text = "<tool_call>{\"name\": \"get_weather\", \"arguments\": {\"city\": \"Oslo\"}}</tool_call>";
    let call = single(text, None);
    assert_eq!(call.name, "get_weather");
    assert_eq!(call.args["city"], "Oslo");
}

#[test]
fn legacy_calls_keep_text_order() {
    let text = "<tool_call><name>second_kind_first</name></tool_call>\
                <invocation><name>later</name></invocation>";
    let names: Vec<String> = parse_function_calls(text, None)
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, ["second_kind_first", "later"]);
}

// -- merged dialect ------------------------------------------------------

#[test]
fn merged_glob_pattern() {
    let (dialect, calls) =
        parse_function_calls_with_dialect("<><invokename=\"Glob\"><parametername=\"pattern\">*", None)
            .expect("calls");
    assert_eq!(dialect, Dialect::Merged);
    assert_eq!(calls, vec![FunctionCall::new("Glob", json!({"pattern": "*"}).as_object().cloned().unwrap_or_default())]);
}

#[test]
fn merged_values_run_to_end_of_line() {
    let text = "<invokename=\"Bash\">\n<parametername=\"command\">ls -la\n\
                <parametername=\"timeout\">30\nafter";
    let call = single(text, None);
    assert_eq!(call.args["command"], "ls -la");
    assert_eq!(call.args["timeout"], 30);
}

#[test]
fn merged_json_payload_becomes_arguments() {
    let text = "<><invokename=\"TodoWrite\">{\"todos\":[{\"content\":\"x\"}]}";
    let call = single(text, None);
    assert_eq!(call.args["todos"][0]["content"], "x");

    let call = single("<><invokename=\"TodoWrite\">[{}]", None);
    assert_eq!(call.args["value"], json!([{}]));
}

#[test]
fn merged_run_recovers_only_first_invocation() {
    let text = "<invokename=\"A\"><parametername=\"x\">1<invokename=\"B\"><parametername=\"y\">2";
    let calls = parse_function_calls(text, None);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "A");
    assert_eq!(calls[0].args["x"], 1);
    assert!(calls[0].args.get("y").is_none());
}

// -- helpers -------------------------------------------------------------

#[test]
fn coerce_value_rules() {
    assert_eq!(coerce_value("true"), json!(true));
    assert_eq!(coerce_value(" -1.5 "), json!(-1.5));
    assert_eq!(coerce_value("null"), Value::Null);
    assert_eq!(coerce_value("nothing"), json!("nothing"));
    assert_eq!(coerce_value("[1,2,]"), json!([1, 2]));
    assert_eq!(coerce_value("[draft] notes"), json!("[draft] notes"));
    assert_eq!(coerce_value(""), json!(""));
}

#[test]
fn attr_extraction_is_permissive() {
    assert_eq!(extract_attr_permissive(" NAME = 'x' ", b"name").as_deref(), Some("x"));
    assert_eq!(extract_attr_permissive(" filename=\"y\" name=\"z\"", b"name").as_deref(), Some("z"));
    assert_eq!(extract_attr_permissive(" name=\"a&amp;b\"", b"name").as_deref(), Some("a&b"));
    assert_eq!(extract_attr_permissive(" id=\"1\"", b"name"), None);
}

#[test]
fn entities_and_cdata() {
    assert_eq!(decode_text("a &lt;b&gt; &amp; &quot;c&quot; &bogus;"), "a <b> & \"c\" &bogus;");
    assert_eq!(decode_text("<![CDATA[x &amp; y]]>"), "x &amp; y");
    assert_eq!(decode_text("<![CDATA[open"), "<![CDATA[open");
}

#[test]
fn args_json_serializes_in_order() {
    let call = single("<invoke name=\"t\"><parameter name=\"b\">1</parameter><parameter name=\"a\">2</parameter></invoke>", None);
    assert_eq!(call.args_json(), r#"{"b":1,"a":2}"#);
}
