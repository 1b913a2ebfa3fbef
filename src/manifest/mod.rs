//! Manifest model — typed, defaulted configuration loaded once at startup.
//!
//! Mirrors the nested-map schema described in the runtime's external
//! interface: unknown top-level keys are ignored; this loader does not
//! reject them (the permissive `#[serde(default)]` fields simply fall back
//! when absent). A manifest is read once per process and never reloaded.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppInfo {
    pub name: String,
    #[serde(default = "default_app_version")]
    pub version: String,
}

fn default_app_version() -> String {
    "0.0.1".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    #[default]
    LocalOnly,
    Developer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub base_url: String,
    pub policy_mode: PolicyMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            policy_mode: PolicyMode::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkPolicy {
    /// `"deny"` or `"allow"`.
    pub outbound: NetworkOutbound,
    pub allow_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NetworkOutbound {
    Deny,
    Allow,
}

impl Default for NetworkOutbound {
    fn default() -> Self {
        Self::Deny
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DataSqlitePolicy {
    pub allow: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DataFilesystemPolicy {
    pub allow_read: Vec<String>,
    pub allow_write: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DataVectorPolicy {
    /// Glob patterns over collection names permitted for reads.
    pub allow: Vec<String>,
    /// Glob patterns over collection names permitted for insert/update/delete.
    pub allow_write: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DataPolicy {
    pub sqlite: DataSqlitePolicy,
    pub filesystem: DataFilesystemPolicy,
    pub vector: DataVectorPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsPolicy {
    pub allow: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    pub network: NetworkPolicy,
    pub tools: ToolsPolicy,
    pub data: DataPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

fn default_context_window() -> u32 {
    8192
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ModelsConfig {
    pub backend: String,
    pub default: String,
    pub map: std::collections::HashMap<String, ModelEntry>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            default: String::new(),
            map: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub read_only: bool,
    pub max_rows: Option<u32>,
    pub max_bytes: Option<u32>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            kind: "builtin".to_string(),
            read_only: false,
            max_rows: None,
            max_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub path: String,
    pub redact_prompt: bool,
    pub redact_tool_outputs: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: "audit.jsonl".to_string(),
            redact_prompt: false,
            redact_tool_outputs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    pub backend: String,
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VectorConfig {
    /// `"chroma"` or `"lance"`.
    pub backend: String,
    pub default_top_k: u32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: "chroma".to_string(),
            default_top_k: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Manifest {
    pub app: AppInfo,
    pub runtime: RuntimeConfig,
    pub policy: Policy,
    pub models: ModelsConfig,
    pub tools: std::collections::HashMap<String, ToolConfig>,
    pub audit: AuditConfig,
    pub embedding: EmbeddingConfig,
    pub vector_db: VectorConfig,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            app: AppInfo {
                name: String::new(),
                version: default_app_version(),
            },
            runtime: RuntimeConfig::default(),
            policy: Policy::default(),
            models: ModelsConfig::default(),
            tools: std::collections::HashMap::new(),
            audit: AuditConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_db: VectorConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestLoadError {
    #[error("manifest not found: {0}")]
    NotFound(String),
    #[error("manifest has invalid shape: {0}")]
    InvalidShape(String),
}

/// Load a manifest YAML document from `path`.
///
/// Does not touch any resource the manifest points at (no DB opens, no
/// directory creation) — those happen lazily as tools are invoked.
pub fn load(path: impl AsRef<Path>) -> Result<Manifest, ManifestLoadError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ManifestLoadError::NotFound(path.display().to_string())
        } else {
            ManifestLoadError::InvalidShape(e.to_string())
        }
    })?;

    let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(&raw)
        .map_err(|e| ManifestLoadError::InvalidShape(e.to_string()))?;

    if !value.is_mapping() {
        return Err(ManifestLoadError::InvalidShape(format!(
            "manifest must be a YAML mapping, got {}",
            value_type_name(&value)
        )));
    }

    serde_yaml_ng::from_value(value).map_err(|e| ManifestLoadError::InvalidShape(e.to_string()))
}

fn value_type_name(v: &serde_yaml_ng::Value) -> &'static str {
    match v {
        serde_yaml_ng::Value::Null => "null",
        serde_yaml_ng::Value::Bool(_) => "bool",
        serde_yaml_ng::Value::Number(_) => "number",
        serde_yaml_ng::Value::String(_) => "string",
        serde_yaml_ng::Value::Sequence(_) => "sequence",
        serde_yaml_ng::Value::Mapping(_) => "mapping",
        serde_yaml_ng::Value::Tagged(_) => "tagged",
    }
}

/// Single environment variable designating the manifest path at startup.
pub const MANIFEST_PATH_ENV: &str = "DOMEKIT_MANIFEST";

pub fn default_manifest_path() -> String {
    std::env::var(MANIFEST_PATH_ENV).unwrap_or_else(|_| "./domekit.yaml".to_string())
}

#[cfg(test)]
mod tests;
