use std::sync::Arc;
use std::time::Instant;

use domekit_runtime::gateway::{self, AppState};
use domekit_runtime::manifest::{self, ManifestLoadError};
use domekit_runtime::model::HttpModelAdapter;
use domekit_runtime::orchestrator::Orchestrator;
use domekit_runtime::policy::PolicyEngine;
use domekit_runtime::tools::create_default_registry;
use domekit_runtime::audit::JsonlAuditStore;

/// Chat backends are accessed over a single fixed local endpoint; the
/// manifest's `models.backend` field selects wire-format behavior (native
/// vs. prompt-injected tool calling) rather than a connection target.
const MODEL_BACKEND_URL: &str = "http://localhost:11434";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,domekit_runtime=debug".parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let manifest_path = manifest::default_manifest_path();
    let manifest = match manifest::load(&manifest_path) {
        Ok(manifest) => manifest,
        Err(ManifestLoadError::NotFound(path)) => {
            tracing::error!("manifest not found at {}", path);
            std::process::exit(1);
        }
        Err(ManifestLoadError::InvalidShape(msg)) => {
            tracing::error!("manifest at {} is invalid: {}", manifest_path, msg);
            std::process::exit(1);
        }
    };

    let mut policy = PolicyEngine::new();
    policy.load_manifest(manifest.clone());

    // Embedding and vector-store backends are thin adapter shells with no
    // bundled implementation; wire one in here when a concrete backend
    // (Chroma, Lance, ...) is linked in.
    let embedding_adapter = None;
    let vector_adapter = None;
    let registry = Arc::new(create_default_registry(embedding_adapter, vector_adapter));

    let audit = Arc::new(JsonlAuditStore::new(&manifest.audit.path)?);

    let model_adapter = Arc::new(HttpModelAdapter::new(MODEL_BACKEND_URL));
    let orchestrator =
        Arc::new(Orchestrator::new(Arc::new(policy), registry, audit.clone(), model_adapter.clone()));

    let (host, port) = parse_bind_addr(&manifest.runtime.base_url);

    let state = AppState {
        manifest: Arc::new(manifest),
        audit,
        orchestrator,
        model_adapter,
        started_at: Instant::now(),
    };

    gateway::start(&host, port, state).await
}

/// Parse `runtime.base_url` (e.g. `http://127.0.0.1:8080`) into the host
/// and port axum binds to locally; defaults to loopback on any parse
/// failure rather than ever binding to a wildcard address.
fn parse_bind_addr(base_url: &str) -> (String, u16) {
    match url::Url::parse(base_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("127.0.0.1").to_string();
            let port = url.port().unwrap_or(8080);
            (host, port)
        }
        Err(_) => ("127.0.0.1".to_string(), 8080),
    }
}
