use super::*;

#[test]
fn ensure_dir_creates_and_returns() {
    let tmp = tempfile::tempdir().unwrap();
    let new_dir = tmp.path().join("subdir");
    let result = ensure_dir(&new_dir).unwrap();
    assert_eq!(result, new_dir);
    assert!(new_dir.exists());
}

#[test]
fn atomic_write_creates_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("test.txt");
    atomic_write(&path, "hello").unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
}

#[test]
fn atomic_write_overwrites() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("test.txt");
    atomic_write(&path, "first").unwrap();
    atomic_write(&path, "second").unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
}

#[test]
fn truncate_chars_short_string_unchanged() {
    assert_eq!(truncate_chars("hello", 10, "..."), "hello");
}

#[test]
fn truncate_chars_truncates_and_appends_suffix() {
    assert_eq!(truncate_chars("hello world", 5, "..."), "hello...");
}

#[test]
fn resolve_path_collapses_parent_and_current_dir_segments() {
    let resolved = resolve_path("/a/b/../c/./d");
    assert_eq!(resolved, std::path::PathBuf::from("/a/c/d"));
}

#[test]
fn resolve_path_joins_relative_against_cwd() {
    let resolved = resolve_path("relative/file.txt");
    assert!(resolved.is_absolute());
    assert!(resolved.ends_with("relative/file.txt"));
}
