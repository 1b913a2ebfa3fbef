//! HTTP surface — the OpenAI-compatible chat endpoint plus the
//! `/v1/domekit/*` observability endpoints (health, audit, security
//! alerts, metrics). All state is assembled once at startup and shared
//! read-only across handlers behind `Arc`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};

use crate::audit::{AuditEvent, JsonlAuditStore, QueryFilter};
use crate::manifest::Manifest;
use crate::model::HttpModelAdapter;
use crate::orchestrator::{ChatRequest, Orchestrator};
use crate::security;

#[derive(Clone)]
pub struct AppState {
    pub manifest: Arc<Manifest>,
    pub audit: Arc<JsonlAuditStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub model_adapter: Arc<HttpModelAdapter>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| is_loopback_origin(origin)))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/domekit/health", get(health))
        .route("/v1/domekit/audit/logs", get(audit_logs))
        .route("/v1/domekit/audit/stream", get(audit_stream))
        .route("/v1/domekit/audit/{request_id}", get(audit_by_request))
        .route("/v1/domekit/security/alerts", get(security_alerts))
        .route("/v1/domekit/metrics", get(metrics))
        .layer(cors)
        .with_state(state)
}

/// Only `http(s)://(localhost|127.0.0.1)[:port]` origins are allowed —
/// this runtime never serves a public deployment.
fn is_loopback_origin(origin: &HeaderValue) -> bool {
    let Ok(s) = origin.to_str() else { return false };
    let Some(rest) = s.strip_prefix("http://").or_else(|| s.strip_prefix("https://")) else { return false };
    let host = rest.split('/').next().unwrap_or(rest);
    let host_only = host.split(':').next().unwrap_or(host);
    host_only == "localhost" || host_only == "127.0.0.1"
}

pub async fn start(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("DomeKit runtime listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    match state.orchestrator.run(request, &state.manifest).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            error!(error = %e, "chat completion failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime_seconds = (state.started_at.elapsed().as_secs_f64() * 10.0).round() / 10.0;

    let mut result = json!({
        "status": "ok",
        "version": crate::VERSION,
        "uptime_seconds": uptime_seconds,
        "manifest": {
            "app": state.manifest.app.name,
            "app_version": state.manifest.app.version,
            "policy_mode": match state.manifest.runtime.policy_mode {
                crate::manifest::PolicyMode::LocalOnly => "local_only",
                crate::manifest::PolicyMode::Developer => "developer",
            },
            "allowed_tools": state.manifest.policy.tools.allow,
            "model_backend": state.manifest.models.backend,
            "default_model": state.manifest.models.default,
        },
    });

    let log_path = std::path::Path::new(&state.manifest.audit.path);
    if log_path.exists() {
        if let Ok(meta) = tokio::fs::metadata(log_path).await {
            result["audit_log_size_bytes"] = json!(meta.len());
        }
        if let Ok(entries) = state.audit.tail(usize::MAX).await {
            result["audit_log_entries"] = json!(entries.len());
        }
    }

    let (reachable, models) = state.model_adapter.probe().await;
    result["backend_reachability"] = json!({"reachable": reachable, "models": models});

    Json(result)
}

#[derive(Debug, Deserialize)]
struct AuditLogsParams {
    event: Option<AuditEvent>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    request_id: Option<String>,
    #[serde(default = "default_logs_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_logs_limit() -> usize {
    100
}

async fn audit_logs(State(state): State<AppState>, Query(params): Query<AuditLogsParams>) -> impl IntoResponse {
    let limit = params.limit.clamp(1, 1000);
    let filter = QueryFilter {
        event: params.event,
        since: params.since,
        until: params.until,
        request_id: params.request_id,
        limit,
        offset: params.offset,
    };

    match state.audit.query(filter).await {
        Ok((entries, total)) => Json(json!({"entries": entries, "total": total})).into_response(),
        Err(e) => {
            error!(error = %e, "audit query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn audit_stream(State(state): State<AppState>) -> impl IntoResponse {
    let stream = state.audit.clone().stream_tail(std::time::Duration::from_millis(500)).map(|entry| {
        let data = serde_json::to_string(&entry).unwrap_or_default();
        Ok::<_, std::convert::Infallible>(Event::default().data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn audit_by_request(State(state): State<AppState>, Path(request_id): Path<String>) -> impl IntoResponse {
    match state.audit.by_request(&request_id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => {
            error!(error = %e, "audit by-request query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SecurityAlertsParams {
    since: Option<DateTime<Utc>>,
    #[serde(default = "default_alerts_limit")]
    limit: usize,
}

fn default_alerts_limit() -> usize {
    50
}

async fn security_alerts(
    State(state): State<AppState>,
    Query(params): Query<SecurityAlertsParams>,
) -> impl IntoResponse {
    let limit = params.limit.clamp(1, 500);
    match security::detect_alerts(&state.audit, params.since, limit).await {
        Ok(alerts) => {
            let total = alerts.len();
            Json(json!({"alerts": alerts, "total": total})).into_response()
        }
        Err(e) => {
            error!(error = %e, "security alert detection failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetricsParams {
    since: Option<DateTime<Utc>>,
    #[serde(default = "default_window_seconds")]
    window: i64,
}

fn default_window_seconds() -> i64 {
    60
}

async fn metrics(State(state): State<AppState>, Query(params): Query<MetricsParams>) -> impl IntoResponse {
    let window = params.window.clamp(1, 3600);
    match crate::metrics::compute_metrics(&state.audit, params.since, window).await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => {
            error!(error = %e, "metrics aggregation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

#[cfg(test)]
mod tests;
