//! `sql_query` — read-only SQL queries against an allow-listed SQLite file.
//!
//! The policy engine's own `check_data` already gates dispatch; this tool
//! repeats the sqlite allow-list check against the canonicalized path as a
//! second, independent line of defense, and additionally opens the
//! database in SQLite's read-only URI mode so a mutating statement is
//! rejected by the driver itself rather than trusted to the query text.

use async_trait::async_trait;
use serde_json::json;

use super::{Tool, ToolContext, ToolDefinition, ToolOutput};

const DEFAULT_MAX_ROWS: u64 = 100;

pub struct SqlQueryTool;

#[async_trait]
impl Tool for SqlQueryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "sql_query".to_string(),
            description: "Run a read-only SQL query against a local SQLite database.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "db_path": {"type": "string", "description": "Path to the SQLite database file."},
                    "query": {"type": "string", "description": "SQL query to execute (read-only)."},
                },
                "required": ["db_path", "query"],
                "additionalProperties": false,
            }),
            output_schema: json!({}),
            permissions: vec!["data:sqlite".to_string()],
        }
    }

    async fn run(&self, ctx: &ToolContext, args: serde_json::Value) -> ToolOutput {
        let call_id = ctx.request_id.clone();
        let Some(db_path) = args.get("db_path").and_then(|v| v.as_str()) else {
            return ToolOutput::fail(call_id, "sql_query", "Missing required argument: db_path");
        };
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return ToolOutput::fail(call_id, "sql_query", "Missing required argument: query");
        };

        let allowed = ctx.knob_str_list("sqlite_allow");
        let resolved = crate::utils::resolve_path(db_path);
        let is_allowed = allowed
            .iter()
            .any(|a| crate::utils::resolve_path(a) == resolved);
        if !is_allowed {
            return ToolOutput::fail(
                call_id,
                "sql_query",
                format!("Database path not allowed: {db_path}"),
            );
        }

        let max_rows = ctx.knob_u64("max_rows", DEFAULT_MAX_ROWS);
        let query = query.to_string();

        let result = tokio::task::spawn_blocking(move || run_query(&resolved, &query, max_rows))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r);

        match result {
            Ok((columns, rows, truncated)) => ToolOutput::ok(
                call_id,
                "sql_query",
                json!({"columns": columns, "rows": rows, "truncated": truncated}),
            ),
            Err(e) => ToolOutput::fail(call_id, "sql_query", e),
        }
    }
}

type QueryResult = (Vec<String>, Vec<Vec<serde_json::Value>>, bool);

fn run_query(db_path: &std::path::Path, query: &str, max_rows: u64) -> Result<QueryResult, String> {
    let uri = format!("file:{}?mode=ro", db_path.display());
    let conn = rusqlite::Connection::open_with_flags(
        uri,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_URI,
    )
    .map_err(|e| e.to_string())?;

    let mut stmt = conn.prepare(query).map_err(|e| e.to_string())?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

    let limit = max_rows as usize;
    let mut rows = Vec::with_capacity(limit);
    let mut truncated = false;

    let mut query_rows = stmt.query([]).map_err(|e| e.to_string())?;
    let mut seen = 0usize;
    while let Some(row) = query_rows.next().map_err(|e| e.to_string())? {
        if seen >= limit {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(sqlite_value_to_json(row, i)?);
        }
        rows.push(values);
        seen += 1;
    }

    Ok((columns, rows, truncated))
}

fn sqlite_value_to_json(row: &rusqlite::Row, idx: usize) -> Result<serde_json::Value, String> {
    use rusqlite::types::ValueRef;
    let value = row.get_ref(idx).map_err(|e| e.to_string())?;
    Ok(match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => json!(b),
    })
}
