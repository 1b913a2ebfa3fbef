//! Thin backend-agnostic traits for embedding generation and local vector
//! database storage. Concrete backend implementations (Ollama embeddings,
//! Chroma/Lance collections) live outside this crate's scope — these are
//! the seams `vector_search`/`vector_manage` dispatch through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub embedding: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub score: f64,
}

#[async_trait]
pub trait EmbeddingAdapter: Send + Sync {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>>;
    fn model_name(&self) -> &str;
}

#[async_trait]
pub trait VectorDbAdapter: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f64],
        top_k: u64,
        filters: Option<&serde_json::Value>,
    ) -> anyhow::Result<Vec<SearchResult>>;

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> anyhow::Result<Vec<String>>;

    async fn update(&self, collection: &str, ids: &[String], documents: Vec<Document>) -> anyhow::Result<()>;

    async fn delete(&self, collection: &str, ids: &[String]) -> anyhow::Result<()>;

    async fn list_collections(&self) -> anyhow::Result<Vec<String>>;
}
