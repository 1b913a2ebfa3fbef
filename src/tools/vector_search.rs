//! `vector_search` — semantic similarity search against a local vector
//! collection. Collection names are matched with shell-style globs rather
//! than the literal-prefix scheme `read_file`/`write_file` use, since
//! collections are logical names, not filesystem paths.

use std::sync::Arc;

use async_trait::async_trait;
use globset::Glob;
use serde_json::json;

use super::adapters::{EmbeddingAdapter, VectorDbAdapter};
use super::{Tool, ToolContext, ToolDefinition, ToolOutput};

const DEFAULT_TOP_K: u64 = 10;

pub struct VectorSearchTool {
    embedding: Option<Arc<dyn EmbeddingAdapter>>,
    vector: Option<Arc<dyn VectorDbAdapter>>,
}

impl VectorSearchTool {
    pub fn new(embedding: Option<Arc<dyn EmbeddingAdapter>>, vector: Option<Arc<dyn VectorDbAdapter>>) -> Self {
        Self { embedding, vector }
    }
}

fn glob_matches_any(value: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|p| Glob::new(p).map(|g| g.compile_matcher().is_match(value)).unwrap_or(false))
}

#[async_trait]
impl Tool for VectorSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "vector_search".to_string(),
            description: "Search a local vector database collection by semantic similarity.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {"type": "string", "description": "Path to the vector collection."},
                    "query": {"type": "string", "description": "Text to search for (auto-embedded)."},
                    "query_vector": {
                        "type": "array",
                        "items": {"type": "number"},
                        "description": "Raw embedding vector (alternative to text query).",
                    },
                    "top_k": {"type": "integer", "default": 10, "description": "Number of results to return."},
                    "filters": {"type": "object", "description": "Metadata filters."},
                },
                "required": ["collection"],
                "additionalProperties": false,
            }),
            output_schema: json!({}),
            permissions: vec!["data:vector_db".to_string()],
        }
    }

    async fn run(&self, ctx: &ToolContext, args: serde_json::Value) -> ToolOutput {
        let call_id = ctx.request_id.clone();
        let Some(collection) = args.get("collection").and_then(|v| v.as_str()) else {
            return ToolOutput::fail(call_id, "vector_search", "Missing required argument: collection");
        };
        let query = args.get("query").and_then(|v| v.as_str());
        let mut query_vector: Option<Vec<f64>> = args.get("query_vector").and_then(|v| v.as_array()).map(|arr| {
            arr.iter().filter_map(serde_json::Value::as_f64).collect()
        });
        let top_k = args
            .get("top_k")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_else(|| ctx.knob_u64("default_top_k", DEFAULT_TOP_K));
        let filters = args.get("filters").cloned();

        let allowed = ctx.knob_str_list("vector_allow");
        if !glob_matches_any(collection, &allowed) {
            return ToolOutput::fail(
                call_id,
                "vector_search",
                format!("Collection not allowed: {collection}"),
            );
        }

        if query.is_some() == query_vector.is_some() {
            return ToolOutput::fail(
                call_id,
                "vector_search",
                "Exactly one of 'query' or 'query_vector' must be provided.",
            );
        }

        let Some(vector) = &self.vector else {
            return ToolOutput::fail(call_id, "vector_search", "Vector database adapter not configured.");
        };

        if let (Some(text), None) = (query, &query_vector) {
            let Some(embedding) = &self.embedding else {
                return ToolOutput::fail(
                    call_id,
                    "vector_search",
                    "Embedding adapter not configured; provide query_vector instead.",
                );
            };
            match embedding.embed(std::slice::from_ref(&text.to_string())).await {
                Ok(mut vectors) if !vectors.is_empty() => query_vector = Some(vectors.remove(0)),
                Ok(_) => {
                    return ToolOutput::fail(call_id, "vector_search", "Embedding adapter returned no vectors.")
                }
                Err(e) => return ToolOutput::fail(call_id, "vector_search", format!("Embedding failed: {e}")),
            }
        }

        let query_vector = query_vector.unwrap_or_default();
        let results = match vector.search(collection, &query_vector, top_k, filters.as_ref()).await {
            Ok(r) => r,
            Err(e) => return ToolOutput::fail(call_id, "vector_search", format!("Search failed: {e}")),
        };

        let count = results.len();
        ToolOutput::ok(
            call_id,
            "vector_search",
            json!({
                "results": results,
                "count": count,
            }),
        )
    }
}
