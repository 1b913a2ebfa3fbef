use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::*;
use crate::manifest::Manifest;
use crate::model::ToolCallDirective;
use crate::tools::{Tool, ToolDefinition, ToolOutput};

fn manifest_from_yaml(yaml: &str) -> Manifest {
    let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(yaml).unwrap();
    serde_yaml_ng::from_value(value).unwrap()
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echo arguments back.".to_string(),
            input_schema: json!({"type": "object"}),
            output_schema: json!({}),
            permissions: vec![],
        }
    }

    async fn run(&self, _ctx: &ToolContext, args: Value) -> ToolOutput {
        ToolOutput::ok("call", "echo", args)
    }
}

/// Model stand-in that replays a scripted sequence of replies, one per call.
struct ScriptedAdapter {
    replies: Vec<Message>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    fn new(replies: Vec<Message>) -> Self {
        Self { replies, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    async fn chat(&self, _messages: &[Message], _model: &str, _tools: &[Value]) -> anyhow::Result<Message> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.replies.get(i.min(self.replies.len() - 1)).cloned().unwrap())
    }
}

fn tool_call_message(name: &str, args: Value) -> Message {
    Message {
        role: Role::Assistant,
        content: None,
        tool_calls: Some(vec![ToolCallDirective { call_id: "call_0".to_string(), name: name.to_string(), arguments: args }]),
        tool_call_id: None,
    }
}

fn text_message(text: &str) -> Message {
    Message { role: Role::Assistant, content: Some(text.to_string()), tool_calls: None, tool_call_id: None }
}

async fn build_orchestrator(
    manifest: &Manifest,
    audit_path: &std::path::Path,
    adapter: Arc<dyn ModelAdapter>,
) -> Orchestrator {
    let mut policy = PolicyEngine::new();
    policy.load_manifest(manifest.clone());

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));

    let audit = JsonlAuditStore::new(audit_path).unwrap();

    Orchestrator::new(Arc::new(policy), Arc::new(registry), Arc::new(audit), adapter)
}

#[tokio::test]
async fn happy_path_runs_tool_and_returns_final_text() {
    let manifest = manifest_from_yaml(
        "app:\n  name: demo\npolicy:\n  tools:\n    allow: [\"echo\"]\n",
    );
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        tool_call_message("echo", json!({"msg": "hi"})),
        text_message("done"),
    ]));

    let orch = build_orchestrator(&manifest, &audit_path, adapter).await;
    let request = ChatRequest { model: None, messages: vec![], tools: None, temperature: None, max_tokens: None, stream: None };
    let response = orch.run(request, &manifest).await.unwrap();

    assert_eq!(response.choices[0].message.content.as_deref(), Some("done"));
    assert_eq!(response.trace.tools_used, vec!["echo".to_string()]);

    let entries = orch.audit.by_request(&response.id).await.unwrap();
    let events: Vec<_> = entries.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(events, vec!["request.start", "tool.call", "tool.result", "request.end"]);
}

#[tokio::test]
async fn policy_denial_blocks_tool_and_skips_execution() {
    let manifest = manifest_from_yaml(
        "app:\n  name: demo\npolicy:\n  tools:\n    allow: [\"read_file\"]\n",
    );
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        tool_call_message("echo", json!({})),
        text_message("I couldn't run that."),
    ]));

    let orch = build_orchestrator(&manifest, &audit_path, adapter).await;
    let request = ChatRequest { model: None, messages: vec![], tools: None, temperature: None, max_tokens: None, stream: None };
    let response = orch.run(request, &manifest).await.unwrap();

    assert!(response.trace.tools_used.is_empty());
    let entries = orch.audit.by_request(&response.id).await.unwrap();
    assert!(entries.iter().any(|e| e.event == AuditEvent::PolicyBlock && e.detail.get("tool").and_then(|v| v.as_str()) == Some("echo")));
    assert!(!entries.iter().any(|e| e.event == AuditEvent::ToolCall));
}

#[tokio::test]
async fn iteration_cap_stops_after_five_model_calls() {
    let manifest = manifest_from_yaml(
        "app:\n  name: demo\npolicy:\n  tools:\n    allow: [\"echo\"]\n",
    );
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let adapter = Arc::new(ScriptedAdapter::new(vec![tool_call_message("echo", json!({}))]));
    let adapter_ref = adapter.clone();

    let orch = build_orchestrator(&manifest, &audit_path, adapter).await;
    let request = ChatRequest { model: None, messages: vec![], tools: None, temperature: None, max_tokens: None, stream: None };
    let response = orch.run(request, &manifest).await.unwrap();

    assert_eq!(adapter_ref.calls.load(Ordering::SeqCst), 5);
    assert!(response.choices[0].message.has_tool_calls());
    let entries = orch.audit.by_request(&response.id).await.unwrap();
    assert!(entries.iter().any(|e| e.event == AuditEvent::RequestEnd));
}

struct FailingAdapter;

#[async_trait]
impl ModelAdapter for FailingAdapter {
    async fn chat(&self, _messages: &[Message], _model: &str, _tools: &[Value]) -> anyhow::Result<Message> {
        Err(anyhow::anyhow!("backend unreachable"))
    }
}

#[tokio::test]
async fn backend_failure_still_writes_request_end() {
    let manifest = manifest_from_yaml("app:\n  name: demo\n");
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");

    let orch = build_orchestrator(&manifest, &audit_path, Arc::new(FailingAdapter)).await;
    let request = ChatRequest { model: None, messages: vec![], tools: None, temperature: None, max_tokens: None, stream: None };
    let err = orch.run(request, &manifest).await.unwrap_err();
    assert!(err.to_string().contains("backend unreachable"));

    let entries = orch.audit.tail(10).await.unwrap();
    let events: Vec<_> = entries.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(events, vec!["request.start", "request.end"]);
}

#[test]
fn table_from_query_extracts_first_from_clause_table() {
    assert_eq!(table_from_query("SELECT * FROM activities WHERE id = 1"), Some("activities".to_string()));
    assert_eq!(table_from_query("select count(*) from Users"), Some("Users".to_string()));
    assert_eq!(table_from_query("not sql"), None);
}
