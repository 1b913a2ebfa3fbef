//! Tool-calling orchestrator — the model↔tool loop with bounded iteration,
//! policy interception on every directive, and a per-request audit trail.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::audit::{AuditEntry, AuditEvent, JsonlAuditStore};
use crate::manifest::Manifest;
use crate::model::{Message, ModelAdapter, Role};
use crate::policy::{PolicyEngine, PolicyVerdict};
use crate::tools::{ToolContext, ToolRegistry};

const MAX_ITERATIONS: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceMeta {
    pub request_id: String,
    pub tools_used: Vec<String>,
    pub tables_queried: Vec<String>,
    pub policy_mode: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub object: &'static str,
    pub choices: Vec<Choice>,
    pub trace: TraceMeta,
}

/// Assembled once at startup; holds the immutable/shared collaborators the
/// orchestrator drives on every request. Mirrors the HTTP surface's own
/// shared state (see `gateway::AppState`) rather than duplicating it.
pub struct Orchestrator {
    policy: Arc<PolicyEngine>,
    registry: Arc<ToolRegistry>,
    audit: Arc<JsonlAuditStore>,
    model_adapter: Arc<dyn ModelAdapter>,
}

impl Orchestrator {
    pub fn new(
        policy: Arc<PolicyEngine>,
        registry: Arc<ToolRegistry>,
        audit: Arc<JsonlAuditStore>,
        model_adapter: Arc<dyn ModelAdapter>,
    ) -> Self {
        Self { policy, registry, audit, model_adapter }
    }

    pub async fn run(&self, request: ChatRequest, manifest: &Manifest) -> anyhow::Result<ChatResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let model = if manifest.models.default.is_empty() {
            request.model.clone().unwrap_or_default()
        } else {
            manifest.models.default.clone()
        };
        let policy_mode = policy_mode_str(manifest);
        let app_name = manifest.app.name.clone();

        let mut tools_used: Vec<String> = Vec::new();
        let mut tables_queried: Vec<String> = Vec::new();

        self.log(&request_id, AuditEvent::RequestStart, &app_name, &model, &policy_mode, json!({}))
            .await;

        let mut messages = request.messages.clone();
        if messages.first().is_none_or(|m| m.role != Role::System) {
            messages.insert(0, Message::system(format!("You are {app_name}, a DomeKit-powered assistant.")));
        }

        let tool_defs = self.registry.get_openai_definitions();
        let knobs = tool_context_knobs(manifest);

        let mut last_reply = Message { role: Role::Assistant, content: Some(String::new()), tool_calls: None, tool_call_id: None };

        for _ in 0..MAX_ITERATIONS {
            last_reply = match self.model_adapter.chat(&messages, &model, &tool_defs).await {
                Ok(reply) => reply,
                Err(e) => {
                    self.log(
                        &request_id,
                        AuditEvent::RequestEnd,
                        &app_name,
                        &model,
                        &policy_mode,
                        json!({"tools_used": tools_used, "error": e.to_string()}),
                    )
                    .await;
                    return Err(crate::errors::RuntimeError::BackendFailure(e.to_string()).into());
                }
            };

            if !last_reply.has_tool_calls() {
                break;
            }

            messages.push(last_reply.clone());

            for directive in last_reply.tool_calls.clone().unwrap_or_default() {
                let tool_name = directive.name.clone();
                let args = directive.arguments.clone();

                let decision = self.policy.check_tool(&tool_name);

                if decision.verdict == PolicyVerdict::Deny {
                    self.log(
                        &request_id,
                        AuditEvent::PolicyBlock,
                        &app_name,
                        &model,
                        &policy_mode,
                        json!({"tool": tool_name, "rule": decision.rule, "reason": decision.reason}),
                    )
                    .await;
                    messages.push(Message::tool_result(
                        directive.call_id.clone(),
                        json!({"error": format!("Policy denied: {}", decision.reason)}).to_string(),
                    ));
                    continue;
                }

                self.log(
                    &request_id,
                    AuditEvent::ToolCall,
                    &app_name,
                    &model,
                    &policy_mode,
                    json!({"tool": tool_name, "arguments": args}),
                )
                .await;

                let ctx = ToolContext {
                    request_id: request_id.clone(),
                    app_name: app_name.clone(),
                    policy_mode: policy_mode.clone(),
                    knobs: knobs.clone(),
                };

                let output_content = match self.registry.get(&tool_name) {
                    None => json!({"error": format!("Unknown tool: {tool_name}")}).to_string(),
                    Some(tool) => {
                        let output = tool.run(&ctx, args.clone()).await;
                        if let Some(error) = output.error {
                            json!({"error": error, "success": false}).to_string()
                        } else {
                            json!({"result": output.result, "success": output.success}).to_string()
                        }
                    }
                };

                tools_used.push(tool_name.clone());
                if tool_name == "sql_query" {
                    if let Some(table) = table_from_query(args.get("query").and_then(|v| v.as_str()).unwrap_or("")) {
                        if !tables_queried.contains(&table) {
                            tables_queried.push(table);
                        }
                    }
                }

                self.log(
                    &request_id,
                    AuditEvent::ToolResult,
                    &app_name,
                    &model,
                    &policy_mode,
                    json!({"tool": tool_name, "call_id": directive.call_id}),
                )
                .await;

                messages.push(Message::tool_result(directive.call_id.clone(), output_content));
            }
        }

        self.log(
            &request_id,
            AuditEvent::RequestEnd,
            &app_name,
            &model,
            &policy_mode,
            json!({"tools_used": tools_used}),
        )
        .await;

        let trace = TraceMeta {
            request_id: request_id.clone(),
            tools_used,
            tables_queried,
            policy_mode,
            model: model.clone(),
        };

        Ok(ChatResponse {
            id: request_id,
            model,
            object: "chat.completion",
            choices: vec![Choice { index: 0, message: last_reply, finish_reason: "stop".to_string() }],
            trace,
        })
    }

    async fn log(
        &self,
        request_id: &str,
        event: AuditEvent,
        app: &str,
        model: &str,
        policy_mode: &str,
        detail: Value,
    ) {
        let entry = AuditEntry::new(request_id, event)
            .with_app(app)
            .with_model(model)
            .with_policy_mode(policy_mode)
            .with_detail(detail);
        if let Err(e) = self.audit.append(&entry).await {
            tracing::error!(error = %e, "failed to append audit entry");
        }
    }
}

fn policy_mode_str(manifest: &Manifest) -> String {
    match manifest.runtime.policy_mode {
        crate::manifest::PolicyMode::LocalOnly => "local_only".to_string(),
        crate::manifest::PolicyMode::Developer => "developer".to_string(),
    }
}

/// Assemble the manifest-derived knob bag every built-in tool reads its
/// allow lists and caps from, mirroring the router's own per-call context
/// construction.
pub fn tool_context_knobs(manifest: &Manifest) -> serde_json::Map<String, Value> {
    let sql_cfg = manifest.tools.get("sql_query");
    let read_cfg = manifest.tools.get("read_file");

    let mut knobs = serde_json::Map::new();
    knobs.insert("sqlite_allow".to_string(), json!(manifest.policy.data.sqlite.allow));
    knobs.insert("fs_allow_read".to_string(), json!(manifest.policy.data.filesystem.allow_read));
    knobs.insert("fs_allow_write".to_string(), json!(manifest.policy.data.filesystem.allow_write));
    knobs.insert(
        "max_rows".to_string(),
        json!(sql_cfg.and_then(|c| c.max_rows).unwrap_or(100)),
    );
    knobs.insert(
        "max_bytes".to_string(),
        json!(read_cfg.and_then(|c| c.max_bytes).unwrap_or(1_048_576)),
    );
    knobs.insert("vector_allow".to_string(), json!(manifest.policy.data.vector.allow));
    knobs.insert("vector_allow_write".to_string(), json!(manifest.policy.data.vector.allow_write));
    knobs.insert("vector_backend".to_string(), json!(manifest.vector_db.backend));
    knobs.insert("default_top_k".to_string(), json!(manifest.vector_db.default_top_k));
    knobs
}

/// Best-effort extraction of the first table name following a `FROM`
/// clause, used to populate `tables_queried` since `sql_query`'s schema
/// has no dedicated `table` argument to read instead.
static FROM_CLAUSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFROM\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());

fn table_from_query(query: &str) -> Option<String> {
    FROM_CLAUSE_RE.captures(query).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests;
