//! `write_file` — write a file's contents within an allow-listed prefix.

use async_trait::async_trait;
use serde_json::json;

use super::{Tool, ToolContext, ToolDefinition, ToolOutput};

const DEFAULT_MAX_BYTES: u64 = 1_048_576;

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write content to a file on the local filesystem.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Absolute or relative file path to write."},
                    "content": {"type": "string", "description": "Content to write to the file."},
                },
                "required": ["path", "content"],
                "additionalProperties": false,
            }),
            output_schema: json!({}),
            permissions: vec!["fs:write".to_string()],
        }
    }

    async fn run(&self, ctx: &ToolContext, args: serde_json::Value) -> ToolOutput {
        let call_id = ctx.request_id.clone();
        let Some(file_path) = args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::fail(call_id, "write_file", "Missing required argument: path");
        };
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return ToolOutput::fail(call_id, "write_file", "Missing required argument: content");
        };

        let allowed_prefixes = ctx.knob_str_list("fs_allow_write");
        let resolved = crate::utils::resolve_path(file_path);

        let is_allowed = allowed_prefixes
            .iter()
            .any(|prefix| resolved.starts_with(crate::utils::resolve_path(prefix)));
        if !is_allowed {
            return ToolOutput::fail(call_id, "write_file", format!("Path not allowed: {file_path}"));
        }

        let max_bytes = ctx.knob_u64("max_bytes", DEFAULT_MAX_BYTES) as usize;
        let byte_len = content.len();
        if byte_len > max_bytes {
            return ToolOutput::fail(
                call_id,
                "write_file",
                format!("Content exceeds max_bytes limit ({max_bytes})"),
            );
        }

        let content = content.to_string();
        let result = tokio::task::spawn_blocking(move || crate::utils::atomic_write(&resolved, &content))
            .await;

        match result {
            Ok(Ok(())) => ToolOutput::ok(
                call_id,
                "write_file",
                json!({"status": "ok", "bytes_written": byte_len}),
            ),
            Ok(Err(e)) => ToolOutput::fail(call_id, "write_file", e.to_string()),
            Err(e) => ToolOutput::fail(call_id, "write_file", e.to_string()),
        }
    }
}
