//! `read_file` — read a file's contents within an allow-listed prefix.

use async_trait::async_trait;
use serde_json::json;

use super::{Tool, ToolContext, ToolDefinition, ToolOutput};

const DEFAULT_MAX_BYTES: u64 = 1_048_576;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read the contents of a file on the local filesystem.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Absolute or relative file path to read."},
                },
                "required": ["path"],
                "additionalProperties": false,
            }),
            output_schema: json!({}),
            permissions: vec!["fs:read".to_string()],
        }
    }

    async fn run(&self, ctx: &ToolContext, args: serde_json::Value) -> ToolOutput {
        let call_id = ctx.request_id.clone();
        let Some(file_path) = args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::fail(call_id, "read_file", "Missing required argument: path");
        };

        let allowed_prefixes = ctx.knob_str_list("fs_allow_read");
        let resolved = crate::utils::resolve_path(file_path);

        let is_allowed = allowed_prefixes
            .iter()
            .any(|prefix| resolved.starts_with(crate::utils::resolve_path(prefix)));
        if !is_allowed {
            return ToolOutput::fail(call_id, "read_file", format!("Path not allowed: {file_path}"));
        }

        let max_bytes = ctx.knob_u64("max_bytes", DEFAULT_MAX_BYTES) as usize;

        let result = tokio::task::spawn_blocking(move || read_capped(&resolved, max_bytes)).await;
        match result {
            Ok(Ok(content)) => ToolOutput::ok(call_id, "read_file", json!(content)),
            Ok(Err(e)) => ToolOutput::fail(call_id, "read_file", e),
            Err(e) => ToolOutput::fail(call_id, "read_file", e.to_string()),
        }
    }
}

fn read_capped(path: &std::path::Path, max_bytes: usize) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let capped = &bytes[..bytes.len().min(max_bytes)];
    Ok(String::from_utf8_lossy(capped).into_owned())
}
