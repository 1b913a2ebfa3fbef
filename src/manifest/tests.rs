use super::*;

#[test]
fn load_missing_file_is_not_found() {
    let err = load("/nonexistent/domekit.yaml").unwrap_err();
    assert!(matches!(err, ManifestLoadError::NotFound(_)));
}

#[test]
fn load_non_mapping_is_invalid_shape() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), "- just\n- a\n- list\n").unwrap();
    let err = load(tmp.path()).unwrap_err();
    assert!(matches!(err, ManifestLoadError::InvalidShape(_)));
}

#[test]
fn load_minimal_manifest_fills_defaults() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), "app:\n  name: demo\n").unwrap();
    let manifest = load(tmp.path()).unwrap();
    assert_eq!(manifest.app.name, "demo");
    assert_eq!(manifest.app.version, "0.0.1");
    assert_eq!(manifest.runtime.policy_mode, PolicyMode::LocalOnly);
    assert_eq!(manifest.audit.path, "audit.jsonl");
    assert!(manifest.policy.tools.allow.is_empty());
}

#[test]
fn load_full_manifest_round_trips_fields() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        tmp.path(),
        r#"
app:
  name: demo
  version: "1.2.3"
runtime:
  policy_mode: developer
policy:
  tools:
    allow: ["sql_query", "read_file"]
  data:
    sqlite:
      allow: ["/tmp/t.db"]
    filesystem:
      allow_read: ["/tmp/*"]
  network:
    outbound: allow
models:
  backend: ollama
  default: gemma3:12b
tools:
  sql_query:
    max_rows: 50
audit:
  path: /tmp/audit.jsonl
"#,
    )
    .unwrap();

    let manifest = load(tmp.path()).unwrap();
    assert_eq!(manifest.app.version, "1.2.3");
    assert_eq!(manifest.runtime.policy_mode, PolicyMode::Developer);
    assert_eq!(manifest.policy.tools.allow, vec!["sql_query", "read_file"]);
    assert_eq!(manifest.policy.data.sqlite.allow, vec!["/tmp/t.db"]);
    assert_eq!(manifest.policy.network.outbound, NetworkOutbound::Allow);
    assert_eq!(manifest.tools["sql_query"].max_rows, Some(50));
    assert_eq!(manifest.audit.path, "/tmp/audit.jsonl");
}

#[test]
fn load_unknown_field_in_known_section_is_rejected() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        tmp.path(),
        "app:\n  name: demo\n  nonexistent_field: oops\n",
    )
    .unwrap();
    let err = load(tmp.path()).unwrap_err();
    assert!(matches!(err, ManifestLoadError::InvalidShape(_)));
}
