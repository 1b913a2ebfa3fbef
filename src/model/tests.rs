use super::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn model_family_strips_tag_and_registry_prefix() {
    assert_eq!(model_family("gemma3:12b"), "gemma3");
    assert_eq!(model_family("library/gemma3:12b"), "gemma3");
    assert_eq!(model_family("llama3.1:8b"), "llama3.1");
}

#[test]
fn known_incompatible_families_do_not_support_native_tools() {
    assert!(!supports_native_tools("gemma3:12b"));
    assert!(!supports_native_tools("gemma2:9b"));
    assert!(supports_native_tools("llama3.1:8b"));
    assert!(supports_native_tools("qwen2.5:14b"));
}

#[tokio::test]
async fn chat_uses_native_tools_field_for_compatible_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "function": {"name": "sql_query", "arguments": {"db_path": "t.db", "query": "SELECT 1"}}
                }]
            }
        })))
        .mount(&server)
        .await;

    let adapter = HttpModelAdapter::new(server.uri());
    let messages = vec![Message::system("be helpful")];
    let tools = vec![json!({"type": "function", "function": {"name": "sql_query", "parameters": {}}})];
    let reply = adapter.chat(&messages, "llama3.1:8b", &tools).await.unwrap();

    assert!(reply.has_tool_calls());
    let tc = &reply.tool_calls.unwrap()[0];
    assert_eq!(tc.name, "sql_query");
    assert_eq!(tc.call_id, "call_0");
}

#[tokio::test]
async fn chat_generates_call_id_when_backend_omits_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {
                "role": "assistant",
                "tool_calls": [
                    {"function": {"name": "a", "arguments": {}}},
                    {"id": "backend_id", "function": {"name": "b", "arguments": {}}}
                ]
            }
        })))
        .mount(&server)
        .await;

    let adapter = HttpModelAdapter::new(server.uri());
    let tools = vec![json!({"type": "function", "function": {"name": "a"}})];
    let reply = adapter.chat(&[Message::system("x")], "llama3.1:8b", &tools).await.unwrap();
    let calls = reply.tool_calls.unwrap();
    assert_eq!(calls[0].call_id, "call_0");
    assert_eq!(calls[1].call_id, "backend_id");
}

#[tokio::test]
async fn chat_falls_back_to_prompt_tools_for_incompatible_family() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {
                "role": "assistant",
                "content": "```json\n{\"tool_call\": {\"name\": \"sql_query\", \"arguments\": {\"query\": \"SELECT 1\"}}}\n```"
            }
        })))
        .mount(&server)
        .await;

    let adapter = HttpModelAdapter::new(server.uri());
    let messages = vec![Message::system("be helpful")];
    let tools = vec![json!({"type": "function", "function": {"name": "sql_query", "parameters": {}}})];
    let reply = adapter.chat(&messages, "gemma3:12b", &tools).await.unwrap();

    assert!(reply.has_tool_calls());
    assert_eq!(reply.tool_calls.unwrap()[0].name, "sql_query");
    assert!(reply.content.is_none());
}

#[test]
fn extract_tool_call_from_fenced_json_block() {
    let text = "Sure, let me check.\n```json\n{\"tool_call\": {\"name\": \"read_file\", \"arguments\": {\"path\": \"a.txt\"}}}\n```";
    let (directive, remaining) = extract_tool_call_from_text(text).unwrap();
    assert_eq!(directive.name, "read_file");
    assert_eq!(directive.arguments["path"], "a.txt");
    assert_eq!(remaining.unwrap(), "Sure, let me check.");
}

#[test]
fn extract_tool_call_from_bare_json_without_fence() {
    let text = "{\"tool_call\": {\"name\": \"read_file\", \"arguments\": {\"path\": \"a.txt\"}}}";
    let (directive, remaining) = extract_tool_call_from_text(text).unwrap();
    assert_eq!(directive.name, "read_file");
    assert!(remaining.is_none());
}

#[test]
fn extract_tool_call_returns_none_for_plain_text() {
    assert!(extract_tool_call_from_text("just a normal reply").is_none());
}

#[test]
fn try_parse_repaired_tool_call_fixes_escaped_colon() {
    let text = r#"{"name":"sql_query","parameters\":{"query":"SELECT 1"}}"#;
    let directive = try_parse_repaired_tool_call(text).unwrap();
    assert_eq!(directive.name, "sql_query");
    assert_eq!(directive.arguments["query"], "SELECT 1");
}

#[test]
fn try_parse_repaired_tool_call_fixes_missing_colon() {
    let text = r#"{"name":"sql_query","parameters"{"query":"SELECT 1"}}"#;
    let directive = try_parse_repaired_tool_call(text).unwrap();
    assert_eq!(directive.name, "sql_query");
}

#[test]
fn try_parse_repaired_tool_call_prefers_arguments_over_parameters() {
    let text = r#"{"name":"sql_query","arguments":{"query":"SELECT 2"},"parameters":{"query":"SELECT 1"}}"#;
    let directive = try_parse_repaired_tool_call(text).unwrap();
    assert_eq!(directive.arguments["query"], "SELECT 2");
}

#[test]
fn try_parse_repaired_tool_call_falls_back_when_arguments_empty() {
    let text = r#"{"name":"sql_query","arguments":{},"parameters":{"query":"SELECT 1"}}"#;
    let directive = try_parse_repaired_tool_call(text).unwrap();
    assert_eq!(directive.arguments["query"], "SELECT 1");
}

#[test]
fn try_parse_repaired_tool_call_rejects_object_without_name() {
    assert!(try_parse_repaired_tool_call(r#"{"arguments":{"query":"SELECT 1"}}"#).is_none());
}
