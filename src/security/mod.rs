//! Security heuristics — stateless batch detectors over the audit log.
//!
//! Each detector scans the same entry set independently; there is no
//! shared state between them beyond the log itself, so adding a detector
//! never changes another's output.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::audit::{AuditEntry, AuditEvent, JsonlAuditStore};

static PATH_TRAVERSAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.\./|\.\.\\").unwrap());
static SQL_INJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(DROP\s+TABLE|DELETE\s+FROM|UNION\s+SELECT|INSERT\s+INTO\s.*SELECT|;\s*--|OR\s+1\s*=\s*1|'\s*OR\s+')",
    )
    .unwrap()
});

const BURST_WINDOW_SECONDS: i64 = 60;
const BURST_THRESHOLD: usize = 5;
const REPEATED_DENIAL_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct SecurityAlert {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub severity: &'static str,
    pub ts: DateTime<Utc>,
    pub request_id: String,
    pub event: String,
    pub detail: serde_json::Value,
    pub message: String,
}

/// Run all heuristic detectors and return alerts sorted newest first.
pub async fn detect_alerts(
    audit: &Arc<JsonlAuditStore>,
    since: Option<DateTime<Utc>>,
    limit: usize,
) -> anyhow::Result<Vec<SecurityAlert>> {
    let mut entries = audit.tail(usize::MAX).await?;
    if let Some(since) = since {
        entries.retain(|e| e.ts >= since);
    }

    let mut alerts = Vec::new();
    alerts.extend(detect_path_traversal(&entries));
    alerts.extend(detect_sql_injection(&entries));
    alerts.extend(detect_burst_denial(&entries));
    alerts.extend(detect_repeated_denial(&entries));

    alerts.sort_by(|a, b| b.ts.cmp(&a.ts));
    alerts.truncate(limit);
    Ok(alerts)
}

fn detect_path_traversal(entries: &[AuditEntry]) -> Vec<SecurityAlert> {
    entries
        .iter()
        .filter(|e| matches!(e.event, AuditEvent::ToolCall | AuditEvent::PolicyBlock))
        .filter(|e| PATH_TRAVERSAL_RE.is_match(&detail_debug_string(e)))
        .map(|e| SecurityAlert {
            kind: "path_traversal",
            severity: "high",
            ts: e.ts,
            request_id: e.request_id.clone(),
            event: e.event.as_str().to_string(),
            detail: json!(e.detail),
            message: "Path traversal pattern detected in tool arguments".to_string(),
        })
        .collect()
}

fn detail_debug_string(entry: &AuditEntry) -> String {
    serde_json::Value::Object(entry.detail.clone()).to_string()
}

fn detect_sql_injection(entries: &[AuditEntry]) -> Vec<SecurityAlert> {
    entries
        .iter()
        .filter(|e| matches!(e.event, AuditEvent::ToolCall | AuditEvent::PolicyBlock))
        .filter_map(|e| {
            let query = e.detail.get("arguments")?.get("query")?.as_str()?;
            SQL_INJECTION_RE.is_match(query).then(|| SecurityAlert {
                kind: "sql_injection",
                severity: "critical",
                ts: e.ts,
                request_id: e.request_id.clone(),
                event: e.event.as_str().to_string(),
                detail: json!(e.detail),
                message: format!("SQL injection pattern detected: {}", crate::utils::truncate_chars(query, 120, "")),
            })
        })
        .collect()
}

fn detect_burst_denial(entries: &[AuditEntry]) -> Vec<SecurityAlert> {
    let blocks: Vec<&AuditEntry> = entries.iter().filter(|e| e.event == AuditEvent::PolicyBlock).collect();
    if blocks.len() < BURST_THRESHOLD {
        return Vec::new();
    }

    for (i, block) in blocks.iter().enumerate() {
        let window_end = block.ts + Duration::seconds(BURST_WINDOW_SECONDS);
        let window_count = blocks[i..].iter().take_while(|b| b.ts <= window_end).count();
        if window_count >= BURST_THRESHOLD {
            return vec![SecurityAlert {
                kind: "burst_denial",
                severity: "medium",
                ts: block.ts,
                request_id: block.request_id.clone(),
                event: "policy.block".to_string(),
                detail: json!({"count": window_count, "window_seconds": BURST_WINDOW_SECONDS}),
                message: format!("{window_count} policy blocks within {BURST_WINDOW_SECONDS}s window"),
            }];
        }
    }
    Vec::new()
}

fn detect_repeated_denial(entries: &[AuditEntry]) -> Vec<SecurityAlert> {
    let blocks: Vec<&AuditEntry> = entries.iter().filter(|e| e.event == AuditEvent::PolicyBlock).collect();
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for block in &blocks {
        let tool = block.detail.get("tool").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        *counts.entry(tool).or_insert(0) += 1;
    }

    let last_ts = blocks.last().map(|b| b.ts).unwrap_or_else(Utc::now);
    counts
        .into_iter()
        .filter(|(_, count)| *count >= REPEATED_DENIAL_THRESHOLD)
        .map(|(tool, count)| SecurityAlert {
            kind: "repeated_denial",
            severity: "medium",
            ts: last_ts,
            request_id: String::new(),
            event: "policy.block".to_string(),
            detail: json!({"tool": tool, "count": count}),
            message: format!("Tool '{tool}' blocked {count} times — possible probing"),
        })
        .collect()
}
