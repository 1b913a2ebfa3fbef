//! `vector_manage` — insert, update, or delete documents in a local vector
//! collection. Documents missing an embedding are embedded automatically;
//! `update` dispatches straight to the backend adapter's `update`, leaving
//! the delete-then-insert-vs-true-update choice to the adapter, which
//! knows whether its store supports row-level update.

use std::sync::Arc;

use async_trait::async_trait;
use globset::Glob;
use serde_json::json;

use super::adapters::{Document, EmbeddingAdapter, VectorDbAdapter};
use super::{Tool, ToolContext, ToolDefinition, ToolOutput};

pub struct VectorManageTool {
    embedding: Option<Arc<dyn EmbeddingAdapter>>,
    vector: Option<Arc<dyn VectorDbAdapter>>,
}

impl VectorManageTool {
    pub fn new(embedding: Option<Arc<dyn EmbeddingAdapter>>, vector: Option<Arc<dyn VectorDbAdapter>>) -> Self {
        Self { embedding, vector }
    }

    async fn auto_embed(&self, mut documents: Vec<Document>) -> anyhow::Result<Vec<Document>> {
        let Some(embedding) = &self.embedding else {
            return Ok(documents);
        };
        let (indices, texts): (Vec<usize>, Vec<String>) = documents
            .iter()
            .enumerate()
            .filter(|(_, d)| d.embedding.is_none())
            .map(|(i, d)| (i, d.text.clone()))
            .unzip();
        if texts.is_empty() {
            return Ok(documents);
        }
        let embeddings = embedding.embed(&texts).await?;
        for (idx, emb) in indices.into_iter().zip(embeddings) {
            documents[idx].embedding = Some(emb);
        }
        Ok(documents)
    }
}

fn glob_matches_any(value: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|p| Glob::new(p).map(|g| g.compile_matcher().is_match(value)).unwrap_or(false))
}

fn parse_documents(raw: &serde_json::Value) -> Result<Vec<Document>, String> {
    raw.as_array()
        .map(|arr| {
            arr.iter()
                .map(|v| serde_json::from_value(v.clone()).map_err(|e| e.to_string()))
                .collect::<Result<Vec<Document>, String>>()
        })
        .unwrap_or_else(|| Ok(Vec::new()))
}

#[async_trait]
impl Tool for VectorManageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "vector_manage".to_string(),
            description: "Insert, update, or delete documents in a local vector database collection."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "collection": {"type": "string", "description": "Path to the vector collection."},
                    "operation": {
                        "type": "string",
                        "enum": ["insert", "update", "delete"],
                        "description": "Operation to perform.",
                    },
                    "documents": {
                        "type": "array",
                        "items": {"type": "object"},
                        "description": "Documents with text and optional metadata.",
                    },
                    "ids": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Document IDs (for update/delete).",
                    },
                },
                "required": ["collection", "operation"],
                "additionalProperties": false,
            }),
            output_schema: json!({}),
            permissions: vec!["data:vector_db_write".to_string()],
        }
    }

    async fn run(&self, ctx: &ToolContext, args: serde_json::Value) -> ToolOutput {
        let call_id = ctx.request_id.clone();
        let Some(collection) = args.get("collection").and_then(|v| v.as_str()) else {
            return ToolOutput::fail(call_id, "vector_manage", "Missing required argument: collection");
        };
        let Some(operation) = args.get("operation").and_then(|v| v.as_str()) else {
            return ToolOutput::fail(call_id, "vector_manage", "Missing required argument: operation");
        };
        let ids: Vec<String> = args
            .get("ids")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let allowed = ctx.knob_str_list("vector_allow_write");
        if !glob_matches_any(collection, &allowed) {
            return ToolOutput::fail(
                call_id,
                "vector_manage",
                format!("Write not allowed for collection: {collection}"),
            );
        }

        let Some(vector) = self.vector.clone() else {
            return ToolOutput::fail(call_id, "vector_manage", "Vector database adapter not configured.");
        };

        let raw_documents = args.get("documents").cloned().unwrap_or_else(|| json!([]));
        let documents = match parse_documents(&raw_documents) {
            Ok(d) => d,
            Err(e) => return ToolOutput::fail(call_id, "vector_manage", format!("Invalid documents: {e}")),
        };

        match operation {
            "insert" => self.handle_insert(call_id, vector, collection, documents).await,
            "update" => {
                self.handle_update(call_id, vector, collection, ids, documents).await
            }
            "delete" => self.handle_delete(call_id, vector, collection, ids).await,
            other => ToolOutput::fail(call_id, "vector_manage", format!("Unknown operation: {other}")),
        }
    }
}

impl VectorManageTool {
    async fn handle_insert(
        &self,
        call_id: String,
        vector: Arc<dyn VectorDbAdapter>,
        collection: &str,
        raw_documents: Vec<Document>,
    ) -> ToolOutput {
        if raw_documents.is_empty() {
            return ToolOutput::fail(call_id, "vector_manage", "No documents provided for insert.");
        }
        let documents = match self.auto_embed(raw_documents).await {
            Ok(d) => d,
            Err(e) => return ToolOutput::fail(call_id, "vector_manage", format!("Embedding failed: {e}")),
        };
        let inserted_ids = match vector.insert(collection, documents).await {
            Ok(ids) => ids,
            Err(e) => return ToolOutput::fail(call_id, "vector_manage", format!("Insert failed: {e}")),
        };
        let count = inserted_ids.len();
        ToolOutput::ok(
            call_id,
            "vector_manage",
            json!({"operation": "insert", "ids": inserted_ids, "count": count}),
        )
    }

    async fn handle_update(
        &self,
        call_id: String,
        vector: Arc<dyn VectorDbAdapter>,
        collection: &str,
        ids: Vec<String>,
        raw_documents: Vec<Document>,
    ) -> ToolOutput {
        if ids.is_empty() {
            return ToolOutput::fail(call_id, "vector_manage", "No IDs provided for update.");
        }
        if raw_documents.is_empty() {
            return ToolOutput::fail(call_id, "vector_manage", "No documents provided for update.");
        }
        let documents = match self.auto_embed(raw_documents).await {
            Ok(d) => d,
            Err(e) => return ToolOutput::fail(call_id, "vector_manage", format!("Embedding failed: {e}")),
        };
        if let Err(e) = vector.update(collection, &ids, documents).await {
            return ToolOutput::fail(call_id, "vector_manage", format!("Update failed: {e}"));
        }
        let count = ids.len();
        ToolOutput::ok(
            call_id,
            "vector_manage",
            json!({"operation": "update", "ids": ids, "count": count}),
        )
    }

    async fn handle_delete(
        &self,
        call_id: String,
        vector: Arc<dyn VectorDbAdapter>,
        collection: &str,
        ids: Vec<String>,
    ) -> ToolOutput {
        if ids.is_empty() {
            return ToolOutput::fail(call_id, "vector_manage", "No IDs provided for delete.");
        }
        if let Err(e) = vector.delete(collection, &ids).await {
            return ToolOutput::fail(call_id, "vector_manage", format!("Delete failed: {e}"));
        }
        let count = ids.len();
        ToolOutput::ok(
            call_id,
            "vector_manage",
            json!({"operation": "delete", "ids": ids, "count": count}),
        )
    }
}
