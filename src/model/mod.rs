//! Model adapter — canonical message form ↔ one backend chat API.
//!
//! The backend is assumed to expose a single HTTP endpoint accepting
//! `{model, messages, stream:false, tools?}` and returning
//! `{message:{role, content?, tool_calls?}}` (see `ChatBackendAdapter`).
//! Native function-calling is used when the backend declares tools and the
//! model family isn't one of the closed set known not to support it;
//! otherwise the adapter falls back to describing tools in the system
//! prompt and recovering tool calls from free-form text.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Model families known not to support native tool calling over the
/// backend's function-calling field.
const NO_NATIVE_TOOLS: &[&str] = &["gemma3", "gemma2", "gemma"];

/// Extract a model family from a model id, e.g. `"gemma3:12b"` -> `"gemma3"`,
/// `"library/gemma3:12b"` -> `"gemma3"`.
fn model_family(model: &str) -> &str {
    model.split(':').next().unwrap_or(model).rsplit('/').next().unwrap_or(model)
}

fn supports_native_tools(model: &str) -> bool {
    !NO_NATIVE_TOOLS.contains(&model_family(model))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallDirective {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDirective>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: Some(content.into()), tool_calls: None, tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

#[async_trait::async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Send `messages` to the backend for `model`, declaring `tools` when
    /// non-empty, and return the assistant's canonical reply.
    async fn chat(&self, messages: &[Message], model: &str, tools: &[Value]) -> anyhow::Result<Message>;
}

/// HTTP adapter for a backend exposing `{model, messages, stream, tools?}`
/// → `{message: {...}}` over `/api/chat`.
pub struct HttpModelAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl HttpModelAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Probe the backend's reachability and available model list, tolerating
    /// any failure as "unreachable" rather than propagating an error.
    pub async fn probe(&self) -> (bool, Vec<String>) {
        let Ok(resp) = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(3))
            .send()
            .await
        else {
            return (false, Vec::new());
        };
        if !resp.status().is_success() {
            return (false, Vec::new());
        }
        let Ok(body) = resp.json::<Value>().await else {
            return (true, Vec::new());
        };
        let models = body
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        (true, models)
    }
}

#[async_trait::async_trait]
impl ModelAdapter for HttpModelAdapter {
    async fn chat(&self, messages: &[Message], model: &str, tools: &[Value]) -> anyhow::Result<Message> {
        let use_native_tools = !tools.is_empty() && supports_native_tools(model);
        let prompt_tools = !use_native_tools && !tools.is_empty();

        let mut wire_messages = build_messages(messages, prompt_tools);

        if prompt_tools {
            let tool_prompt = build_tool_prompt(tools);
            inject_tool_prompt(&mut wire_messages, &tool_prompt);
        }

        let mut payload = json!({
            "model": model,
            "messages": wire_messages,
            "stream": false,
        });
        if use_native_tools {
            payload["tools"] = json!(tools);
        }

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let data: Value = resp.json().await?;

        let mut result = from_backend_response(&data);

        if !use_native_tools && !tools.is_empty() && !result.has_tool_calls() {
            if let Some(content) = result.content.clone() {
                if let Some((directive, remaining)) = extract_tool_call_from_text(&content) {
                    result = Message {
                        role: Role::Assistant,
                        content: remaining,
                        tool_calls: Some(vec![directive]),
                        tool_call_id: None,
                    };
                }
            }
        }

        Ok(result)
    }
}

/// Convert canonical messages into the backend's wire shape. When
/// `prompt_tools` is set, tool-role messages become synthetic user
/// messages and assistant tool calls become fenced-JSON text, since the
/// backend has no native tool-calling field to populate.
fn build_messages(messages: &[Message], prompt_tools: bool) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            if prompt_tools {
                if msg.role == Role::Tool {
                    return json!({
                        "role": "user",
                        "content": format!("Tool result: {}", msg.content.clone().unwrap_or_default()),
                    });
                }
                if let Some(calls) = &msg.tool_calls {
                    if let Some(tc) = calls.first() {
                        let call_json = json!({"tool_call": {"name": tc.name, "arguments": tc.arguments}});
                        let call_json = serde_json::to_string(&call_json).unwrap_or_default();
                        let text = msg.content.clone().unwrap_or_default();
                        let content = format!("{text}\n```json\n{call_json}\n```").trim().to_string();
                        return json!({"role": role_str(msg.role), "content": content});
                    }
                }
                let mut out = json!({"role": role_str(msg.role)});
                if let Some(content) = &msg.content {
                    out["content"] = json!(content);
                }
                out
            } else {
                let mut out = json!({"role": role_str(msg.role)});
                if let Some(content) = &msg.content {
                    out["content"] = json!(content);
                }
                if let Some(calls) = &msg.tool_calls {
                    out["tool_calls"] = json!(
                        calls
                            .iter()
                            .map(|tc| json!({"function": {"name": tc.name, "arguments": tc.arguments}}))
                            .collect::<Vec<_>>()
                    );
                }
                if let Some(id) = &msg.tool_call_id {
                    out["tool_call_id"] = json!(id);
                }
                out
            }
        })
        .collect()
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn inject_tool_prompt(messages: &mut [Value], tool_prompt: &str) {
    for msg in messages.iter_mut() {
        if msg.get("role").and_then(|r| r.as_str()) == Some("system") {
            let existing = msg.get("content").and_then(|c| c.as_str()).unwrap_or_default();
            msg["content"] = json!(format!("{existing}{tool_prompt}"));
            return;
        }
    }
    // No system message present; the caller is responsible for prepending
    // one when the tool prompt must be injected — defensively no-op here.
}

fn build_tool_prompt(tools: &[Value]) -> String {
    let mut lines = vec![
        "\n\n## Tool Calling".to_string(),
        "You have access to the following tools. To call a tool, respond with a JSON block:".to_string(),
        "```json\n{\"tool_call\": {\"name\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}}\n```"
            .to_string(),
        "You may include explanation text before or after the JSON block.".to_string(),
        "Available tools:\n".to_string(),
    ];
    for tool in tools {
        let func = tool.get("function").cloned().unwrap_or_default();
        let name = func.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        let desc = func.get("description").and_then(|v| v.as_str()).unwrap_or_default();
        let params = func.get("parameters").cloned().unwrap_or_default();
        let properties = params.get("properties").and_then(|v| v.as_object());
        let required: Vec<&str> = params
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        lines.push(format!("- **{name}**: {desc}"));
        if let Some(props) = properties {
            let param_lines: Vec<String> = props
                .iter()
                .map(|(pname, pdef)| {
                    let req = if required.contains(&pname.as_str()) { " (required)" } else { "" };
                    let ptype = pdef.get("type").and_then(|v| v.as_str()).unwrap_or("any");
                    let pdesc = pdef.get("description").and_then(|v| v.as_str()).unwrap_or("");
                    format!("    - {pname}: {ptype} — {pdesc}{req}")
                })
                .collect();
            if !param_lines.is_empty() {
                lines.push(param_lines.join("\n"));
            }
        }
    }
    lines.join("\n")
}

fn from_backend_response(data: &Value) -> Message {
    let msg = data.get("message").cloned().unwrap_or_default();
    let content = msg.get("content").and_then(|v| v.as_str()).filter(|s| !s.is_empty()).map(str::to_string);

    let raw_calls = msg.get("tool_calls").and_then(|v| v.as_array());
    if let Some(raw_calls) = raw_calls.filter(|c| !c.is_empty()) {
        let tool_calls = raw_calls
            .iter()
            .enumerate()
            .map(|(i, tc)| {
                let func = tc.get("function").cloned().unwrap_or_default();
                let name = func.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let arguments = func.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let call_id = tc.get("id").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| format!("call_{i}"));
                ToolCallDirective { call_id, name, arguments }
            })
            .collect();
        return Message { role: Role::Assistant, content, tool_calls: Some(tool_calls), tool_call_id: None };
    }

    if let Some(text) = content.as_deref() {
        if text.trim_start().starts_with('{') {
            if let Some(directive) = try_parse_repaired_tool_call(text) {
                return Message {
                    role: Role::Assistant,
                    content: None,
                    tool_calls: Some(vec![directive]),
                    tool_call_id: None,
                };
            }
        }
    }

    Message { role: Role::Assistant, content, tool_calls: None, tool_call_id: None }
}

/// Tolerant repair of two known model JSON malformations before parsing a
/// bare `{"name": ..., "arguments"|"parameters": ...}` object as a
/// directive: an escaped-colon typo (`\":` → `":`), and a missing colon
/// between a known key and its opening brace.
static MISSING_COLON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(parameters|arguments)(\{)"#).unwrap());

fn try_parse_repaired_tool_call(text: &str) -> Option<ToolCallDirective> {
    let cleaned = text.trim().replace("\\\":{", "\":{").replace("\\\":", "\":");
    let cleaned = MISSING_COLON_RE.replace_all(&cleaned, r#""$1":$2"#);

    let parsed: Value = serde_json::from_str(&cleaned).ok()?;
    let name = parsed.get("name").and_then(|v| v.as_str())?.to_string();
    let is_truthy = |v: &Value| !matches!(v, Value::Null) && v != &json!({});
    let args = parsed
        .get("arguments")
        .filter(|v| is_truthy(v))
        .or_else(|| parsed.get("parameters"))
        .cloned()?;
    Some(ToolCallDirective { call_id: "call_0".to_string(), name, arguments: args })
}

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());
static BARE_TOOL_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)\{"tool_call"\s*:\s*\{.*?\}\s*\}"#).unwrap());

/// Used only in prompt-tools mode, where no native `tool_calls` field
/// exists: look for a fenced `{"tool_call": {...}}` block first, then a
/// bare one, anywhere in the text.
fn extract_tool_call_from_text(content: &str) -> Option<(ToolCallDirective, Option<String>)> {
    if content.is_empty() {
        return None;
    }

    if let Some(caps) = JSON_FENCE_RE.captures(content) {
        let whole = caps.get(0).unwrap();
        let json_text = &caps[1];
        if let Some(directive) = parse_tool_call_object(json_text) {
            let remaining = content[..whole.start()].trim();
            return Some((directive, if remaining.is_empty() { None } else { Some(remaining.to_string()) }));
        }
    }

    if let Some(m) = BARE_TOOL_CALL_RE.find(content) {
        if let Some(directive) = parse_tool_call_object(m.as_str()) {
            let remaining = content[..m.start()].trim();
            return Some((directive, if remaining.is_empty() { None } else { Some(remaining.to_string()) }));
        }
    }

    None
}

fn parse_tool_call_object(text: &str) -> Option<ToolCallDirective> {
    let parsed: Value = serde_json::from_str(text).ok()?;
    let tc = parsed.get("tool_call")?;
    let name = tc.get("name").and_then(|v| v.as_str())?.to_string();
    let arguments = tc.get("arguments").cloned().unwrap_or_else(|| json!({}));
    Some(ToolCallDirective { call_id: "call_0".to_string(), name, arguments })
}

#[cfg(test)]
mod tests;
