//! Tool SDK, registry, and the five built-in side-effectful tools.
//!
//! Tools are a flat name-to-instance registry, not a class hierarchy: each
//! tool implements [`Tool`], is registered once under its definition's
//! name, and is looked up by name at dispatch time. There is no tool
//! discovery or plugin loading — the registry is assembled once at
//! startup from [`create_default_registry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod adapters;
mod read_file;
mod sql_query;
mod vector_manage;
mod vector_search;
mod write_file;

pub use adapters::{Document, EmbeddingAdapter, SearchResult, VectorDbAdapter};
pub use read_file::ReadFileTool;
pub use sql_query::SqlQueryTool;
pub use vector_manage::VectorManageTool;
pub use vector_search::VectorSearchTool;
pub use write_file::WriteFileTool;

/// OpenAI function-calling compatible schema for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(default = "empty_schema")]
    pub output_schema: serde_json::Value,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, tool_name: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            result: Some(result),
            error: None,
            success: true,
        }
    }

    pub fn fail(call_id: impl Into<String>, tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            result: None,
            error: Some(error.into()),
            success: false,
        }
    }
}

/// Runtime context supplied to a tool's `run()`. `knobs` carries the
/// manifest-derived data-access parameters a tool needs (allow lists,
/// row/byte caps, default top_k) without tools depending on the manifest
/// type directly.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub request_id: String,
    pub app_name: String,
    pub policy_mode: String,
    pub knobs: serde_json::Map<String, serde_json::Value>,
}

impl ToolContext {
    pub fn knob_str_list(&self, key: &str) -> Vec<String> {
        self.knobs
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn knob_u64(&self, key: &str, default: u64) -> u64 {
        self.knobs.get(key).and_then(serde_json::Value::as_u64).unwrap_or(default)
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn run(&self, ctx: &ToolContext, args: serde_json::Value) -> ToolOutput;
}

/// Validate `args` against a tool's declared input schema before dispatch.
pub fn validate_args(tool: &dyn Tool, args: &serde_json::Value) -> Result<(), String> {
    let schema = tool.definition().input_schema;
    let validator = jsonschema::validator_for(&schema).map_err(|e| e.to_string())?;
    validator.validate(args).map_err(|e| e.to_string())
}

/// In-memory registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool instance. Overwrites if the name already exists.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Sorted list of registered tool names.
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Export all tools in OpenAI function-calling format.
    pub fn get_openai_definitions(&self) -> Vec<serde_json::Value> {
        self.list_tools()
            .into_iter()
            .map(|name| {
                let def = self.tools[&name].definition();
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": def.name,
                        "description": def.description,
                        "parameters": def.input_schema,
                    },
                })
            })
            .collect()
    }
}

/// Build a registry pre-loaded with all five built-in tools.
pub fn create_default_registry(
    embedding_adapter: Option<Arc<dyn EmbeddingAdapter>>,
    vector_adapter: Option<Arc<dyn VectorDbAdapter>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SqlQueryTool));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(VectorSearchTool::new(
        embedding_adapter.clone(),
        vector_adapter.clone(),
    )));
    registry.register(Arc::new(VectorManageTool::new(embedding_adapter, vector_adapter)));
    registry
}
