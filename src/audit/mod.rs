//! Append-only JSONL audit store.
//!
//! The audit log is the only persistent state the core owns: every branch
//! of the tool-calling orchestrator writes an entry here, and the metrics
//! and security analyzers are stateless batch readers over the same file.
//! There is no auxiliary in-memory index — readers are batch scanners.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuditEvent {
    #[serde(rename = "request.start")]
    RequestStart,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "tool.result")]
    ToolResult,
    #[serde(rename = "request.end")]
    RequestEnd,
    #[serde(rename = "policy.block")]
    PolicyBlock,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestStart => "request.start",
            Self::ToolCall => "tool.call",
            Self::ToolResult => "tool.result",
            Self::RequestEnd => "request.end",
            Self::PolicyBlock => "policy.block",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub request_id: String,
    pub event: AuditEvent,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_policy_mode")]
    pub policy_mode: String,
    #[serde(default = "serde_json::Map::new")]
    pub detail: serde_json::Map<String, serde_json::Value>,
}

fn default_policy_mode() -> String {
    "local_only".to_string()
}

impl AuditEntry {
    pub fn new(request_id: impl Into<String>, event: AuditEvent) -> Self {
        Self {
            ts: Utc::now(),
            request_id: request_id.into(),
            event,
            app: String::new(),
            model: String::new(),
            policy_mode: default_policy_mode(),
            detail: serde_json::Map::new(),
        }
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_policy_mode(mut self, policy_mode: impl Into<String>) -> Self {
        self.policy_mode = policy_mode.into();
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = detail {
            self.detail = map;
        }
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct QueryFilter {
    pub event: Option<AuditEvent>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Thread/task-safe, append-only JSONL audit store.
///
/// `append` is serialized by an internal async mutex (single-writer
/// discipline); readers scan the file independently and may run
/// concurrently with a writer without ever observing a partial line,
/// since a scan only ever consumes whole newline-terminated lines.
pub struct JsonlAuditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating audit log directory {}", parent.display()))?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Serialized with respect to concurrent writers in
    /// this process; durable for readers before the call returns.
    pub async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let line = serde_json::to_string(entry).context("serializing audit entry")?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .context("audit append task panicked")??;
        Ok(())
    }

    pub async fn by_request(&self, request_id: &str) -> Result<Vec<AuditEntry>> {
        let entries = self.read_all().await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.request_id == request_id)
            .collect())
    }

    pub async fn by_event(&self, event: AuditEvent, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut matches: Vec<AuditEntry> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.event == event)
            .collect();
        if matches.len() > limit {
            matches = matches.split_off(matches.len() - limit);
        }
        Ok(matches)
    }

    pub async fn tail(&self, n: usize) -> Result<Vec<AuditEntry>> {
        let mut entries = self.read_all().await?;
        if entries.len() > n {
            entries = entries.split_off(entries.len() - n);
        }
        Ok(entries)
    }

    /// Filter, sort newest-first, and paginate. `total` counts matches
    /// before pagination is applied.
    pub async fn query(&self, filter: QueryFilter) -> Result<(Vec<AuditEntry>, usize)> {
        let mut entries = self.read_all().await?;
        entries.retain(|e| {
            filter.event.is_none_or(|want| e.event == want)
                && filter
                    .request_id
                    .as_deref()
                    .is_none_or(|want| e.request_id == want)
                && filter.since.is_none_or(|since| e.ts >= since)
                && filter.until.is_none_or(|until| e.ts <= until)
        });
        let total = entries.len();
        entries.sort_by(|a, b| b.ts.cmp(&a.ts));
        let page = entries
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.max(1))
            .collect();
        Ok((page, total))
    }

    async fn read_all(&self) -> Result<Vec<AuditEntry>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_all_blocking(&path))
            .await
            .context("audit read task panicked")?
    }

    /// Begin tailing the log for newly appended entries, starting at the
    /// current end-of-file offset. Polls every `poll_interval` and yields
    /// each new entry exactly once, in file order.
    pub fn stream_tail(
        self: Arc<Self>,
        poll_interval: std::time::Duration,
    ) -> impl futures_util::Stream<Item = AuditEntry> {
        struct State {
            store: Arc<JsonlAuditStore>,
            pos: u64,
            buf: std::collections::VecDeque<AuditEntry>,
            interval: std::time::Duration,
        }

        let initial_pos = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let state = State {
            store: self,
            pos: initial_pos,
            buf: std::collections::VecDeque::new(),
            interval: poll_interval,
        };

        futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(entry) = state.buf.pop_front() {
                    return Some((entry, state));
                }

                let path = state.store.path.clone();
                let pos = state.pos;
                let result =
                    tokio::task::spawn_blocking(move || read_new_lines(&path, pos)).await;
                match result {
                    Ok(Ok((new_pos, new_entries))) => {
                        state.pos = new_pos;
                        state.buf.extend(new_entries);
                        if state.buf.is_empty() {
                            tokio::time::sleep(state.interval).await;
                        }
                    }
                    _ => {
                        tokio::time::sleep(state.interval).await;
                    }
                }
            }
        })
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening audit log {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("writing to audit log {}", path.display()))?;
    Ok(())
}

/// A missing file reads as empty; a malformed trailing line is dropped
/// silently (the tolerated case of a crash mid-write); a malformed
/// interior line is fatal to the scan.
fn read_all_blocking(path: &Path) -> Result<Vec<AuditEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading audit log {}", path.display()))?;
    parse_lines(&raw)
}

fn parse_lines(raw: &str) -> Result<Vec<AuditEntry>> {
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut entries = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                let is_last = i == lines.len() - 1;
                if is_last {
                    break;
                }
                return Err(e).context("malformed interior audit log line");
            }
        }
    }
    Ok(entries)
}

fn read_new_lines(path: &Path, pos: u64) -> Result<(u64, Vec<AuditEntry>)> {
    use std::io::{Read, Seek, SeekFrom};
    if !path.exists() {
        return Ok((pos, Vec::new()));
    }
    let len = std::fs::metadata(path)?.len();
    if len <= pos {
        return Ok((pos, Vec::new()));
    }
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(pos))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;

    let mut new_pos = pos;
    let mut entries = Vec::new();
    let mut consumed = 0usize;
    for line in buf.split_inclusive('\n') {
        if !line.ends_with('\n') {
            break; // partial trailing line; wait for the next poll
        }
        consumed += line.len();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<AuditEntry>(trimmed) {
            entries.push(entry);
        }
    }
    new_pos += consumed as u64;
    Ok((new_pos, entries))
}
