//! Metrics aggregation — stateless batch functions over the audit log.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;

use crate::audit::{AuditEntry, AuditEvent, JsonlAuditStore};

#[derive(Debug, Clone, Serialize)]
pub struct ThroughputBucket {
    pub time: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    pub tool: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRates {
    pub total_requests: usize,
    pub policy_blocks: usize,
    pub tool_calls: usize,
    pub block_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_entries: usize,
    pub first_entry: Option<DateTime<Utc>>,
    pub last_entry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_counts: Option<HashMap<String, usize>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub throughput: Vec<ThroughputBucket>,
    pub latency: LatencyPercentiles,
    pub tool_usage: Vec<ToolUsage>,
    pub error_rates: ErrorRates,
    pub summary: MetricsSummary,
}

pub async fn compute_metrics(
    audit: &Arc<JsonlAuditStore>,
    since: Option<DateTime<Utc>>,
    window_seconds: i64,
) -> anyhow::Result<Metrics> {
    let mut entries = audit.tail(usize::MAX).await?;
    if let Some(since) = since {
        entries.retain(|e| e.ts >= since);
    }

    Ok(Metrics {
        throughput: throughput_buckets(&entries, window_seconds),
        latency: latency_percentiles(&entries),
        tool_usage: tool_usage(&entries),
        error_rates: error_rates(&entries),
        summary: summary(&entries),
    })
}

fn throughput_buckets(entries: &[AuditEntry], window_seconds: i64) -> Vec<ThroughputBucket> {
    let mut starts: Vec<DateTime<Utc>> =
        entries.iter().filter(|e| e.event == AuditEvent::RequestStart).map(|e| e.ts).collect();
    if starts.is_empty() {
        return Vec::new();
    }
    starts.sort();

    let last_ts = *starts.last().unwrap();
    let window = Duration::seconds(window_seconds.max(1));
    let mut buckets = Vec::new();
    let mut bucket_start = starts[0];

    while bucket_start <= last_ts {
        let bucket_end = bucket_start + window;
        let count = starts.iter().filter(|ts| **ts >= bucket_start && **ts < bucket_end).count();
        buckets.push(ThroughputBucket { time: bucket_start, count });
        bucket_start = bucket_end;
    }

    buckets
}

fn latency_percentiles(entries: &[AuditEntry]) -> LatencyPercentiles {
    let mut starts: HashMap<&str, DateTime<Utc>> = HashMap::new();
    let mut durations: Vec<f64> = Vec::new();

    for entry in entries {
        match entry.event {
            AuditEvent::RequestStart => {
                starts.insert(&entry.request_id, entry.ts);
            }
            AuditEvent::RequestEnd => {
                if let Some(start) = starts.get(entry.request_id.as_str()) {
                    let delta = (entry.ts - *start).num_milliseconds() as f64 / 1000.0;
                    durations.push(delta);
                }
            }
            _ => {}
        }
    }

    if durations.is_empty() {
        return LatencyPercentiles { p50: 0.0, p95: 0.0, p99: 0.0, count: 0 };
    }

    durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = durations.len();
    let percentile = |p: f64| {
        let idx = ((n as f64) * p).floor() as usize;
        let idx = idx.min(n - 1);
        round3(durations[idx])
    };

    LatencyPercentiles { p50: percentile(0.50), p95: percentile(0.95), p99: percentile(0.99), count: n }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn tool_usage(entries: &[AuditEntry]) -> Vec<ToolUsage> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        if entry.event == AuditEvent::ToolCall {
            let tool = entry.detail.get("tool").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
            *counts.entry(tool).or_insert(0) += 1;
        }
    }
    let mut usage: Vec<ToolUsage> = counts.into_iter().map(|(tool, count)| ToolUsage { tool, count }).collect();
    usage.sort_by(|a, b| b.count.cmp(&a.count));
    usage
}

fn error_rates(entries: &[AuditEntry]) -> ErrorRates {
    let total_requests = entries.iter().filter(|e| e.event == AuditEvent::RequestStart).count();
    let policy_blocks = entries.iter().filter(|e| e.event == AuditEvent::PolicyBlock).count();
    let tool_calls = entries.iter().filter(|e| e.event == AuditEvent::ToolCall).count();
    let block_rate = (policy_blocks as f64 / (total_requests.max(1) as f64) * 10000.0).round() / 10000.0;

    ErrorRates { total_requests, policy_blocks, tool_calls, block_rate }
}

fn summary(entries: &[AuditEntry]) -> MetricsSummary {
    if entries.is_empty() {
        return MetricsSummary { total_entries: 0, first_entry: None, last_entry: None, event_counts: None };
    }

    let mut sorted: Vec<&AuditEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.ts);

    let mut event_counts: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        *event_counts.entry(entry.event.as_str().to_string()).or_insert(0) += 1;
    }

    MetricsSummary {
        total_entries: entries.len(),
        first_entry: Some(sorted.first().unwrap().ts),
        last_entry: Some(sorted.last().unwrap().ts),
        event_counts: Some(event_counts),
    }
}

pub fn to_json(metrics: &Metrics) -> serde_json::Value {
    json!(metrics)
}
