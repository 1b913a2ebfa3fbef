use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::*;
use crate::manifest::Manifest;
use crate::model::{Message, ModelAdapter, Role};
use crate::policy::PolicyEngine;
use crate::tools::ToolRegistry;

fn manifest_from_yaml(yaml: &str) -> Manifest {
    let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(yaml).unwrap();
    serde_yaml_ng::from_value(value).unwrap()
}

struct StubAdapter;

#[async_trait]
impl ModelAdapter for StubAdapter {
    async fn chat(&self, _messages: &[Message], _model: &str, _tools: &[Value]) -> anyhow::Result<Message> {
        Ok(Message { role: Role::Assistant, content: Some("hi there".to_string()), tool_calls: None, tool_call_id: None })
    }
}

fn build_state(audit_path: &std::path::Path) -> AppState {
    let manifest = manifest_from_yaml("app:\n  name: demo\n");

    let mut policy = PolicyEngine::new();
    policy.load_manifest(manifest.clone());

    let audit = Arc::new(JsonlAuditStore::new(audit_path).unwrap());
    let registry = Arc::new(ToolRegistry::new());
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(policy), registry, audit.clone(), Arc::new(StubAdapter)));

    AppState {
        manifest: Arc::new(manifest),
        audit,
        orchestrator,
        model_adapter: Arc::new(HttpModelAdapter::new("http://127.0.0.1:11434")),
        started_at: Instant::now(),
    }
}

#[tokio::test]
async fn health_reports_ok_and_manifest_summary() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(&dir.path().join("audit.jsonl"));
    let app = build_router(state);

    let req = Request::builder().uri("/v1/domekit/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["manifest"]["app"], "demo");
}

#[tokio::test]
async fn chat_completions_invokes_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(&dir.path().join("audit.jsonl"));
    let app = build_router(state);

    let payload = json!({"messages": [{"role": "user", "content": "hello"}]});
    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "hi there");
}

#[tokio::test]
async fn audit_logs_returns_appended_entries() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let state = build_state(&audit_path);
    state.audit.append(&crate::audit::AuditEntry::new("r1", AuditEvent::RequestStart)).await.unwrap();
    let app = build_router(state);

    let req = Request::builder().uri("/v1/domekit/audit/logs").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn audit_by_request_filters_to_one_id() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let state = build_state(&audit_path);
    state.audit.append(&crate::audit::AuditEntry::new("r1", AuditEvent::RequestStart)).await.unwrap();
    state.audit.append(&crate::audit::AuditEntry::new("r2", AuditEvent::RequestStart)).await.unwrap();
    let app = build_router(state);

    let req = Request::builder().uri("/v1/domekit/audit/r1").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
    let body: Vec<Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(body.len(), 1);
}

#[tokio::test]
async fn security_alerts_endpoint_returns_empty_for_clean_log() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(&dir.path().join("audit.jsonl"));
    let app = build_router(state);

    let req = Request::builder().uri("/v1/domekit/security/alerts").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn metrics_endpoint_returns_zeroed_summary_for_empty_log() {
    let dir = tempfile::tempdir().unwrap();
    let state = build_state(&dir.path().join("audit.jsonl"));
    let app = build_router(state);

    let req = Request::builder().uri("/v1/domekit/metrics").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), 65536).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["summary"]["total_entries"], 0);
}

#[test]
fn loopback_origin_predicate_accepts_localhost_and_127_rejects_other_hosts() {
    assert!(is_loopback_origin(&HeaderValue::from_static("http://localhost:3000")));
    assert!(is_loopback_origin(&HeaderValue::from_static("http://127.0.0.1:8080")));
    assert!(!is_loopback_origin(&HeaderValue::from_static("https://evil.example.com")));
}
