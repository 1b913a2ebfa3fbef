use super::*;

#[test]
fn backend_failure_is_retryable() {
    let err = RuntimeError::BackendFailure("timeout".into());
    assert!(err.is_retryable());
}

#[test]
fn policy_denied_is_not_retryable() {
    let err = RuntimeError::PolicyDenied {
        rule: "tools.allow".into(),
        reason: "not allowed".into(),
    };
    assert!(!err.is_retryable());
}

#[test]
fn manifest_invalid_display() {
    let err = RuntimeError::ManifestInvalid("unknown field".into());
    assert_eq!(err.to_string(), "manifest has invalid shape: unknown field");
}
