// tests/telos_tests.rs
//! Structured ledger behavior: append-only writes, status annotations, and
//! tolerant reads.

use std::fs;
use std::io::Write;

use telos_core::services::telos::TelosStore;
use tempfile::tempdir;

fn open_store(dir: &tempfile::TempDir) -> TelosStore {
    TelosStore::open(dir.path().join("memory").join("telos.jsonl")).expect("open store")
}

#[test]
fn add_goal_creates_active_record() {
    let dir = tempdir().expect("tempdir");
    let mut store = open_store(&dir);

    let id = store
        .add_goal("Run a marathon", &["health".to_string()], "high", None)
        .expect("add goal");
    assert!(id.starts_with("goal_"));
    assert_eq!(store.current_status(&id), Some("active"));

    let goals = store.get_goals(None).expect("get goals");
    assert_eq!(goals.len(), 1);
    assert_eq!(goals[0].content, "Run a marathon");
    assert_eq!(goals[0].status, "active");
    assert_eq!(goals[0].priority, "high");
}

#[test]
fn add_task_links_parent_goal_verbatim() {
    let dir = tempdir().expect("tempdir");
    let mut store = open_store(&dir);

    let task_id = store
        .add_task("Buy shoes", Some("goal_123"), &[], "low", Some("2026-09-01"))
        .expect("add task");
    assert!(task_id.starts_with("task_"));

    let tasks = store.get_tasks(None, Some("goal_123")).expect("get tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].parent_goal.as_deref(), Some("goal_123"));
    assert_eq!(tasks[0].due_date.as_deref(), Some("2026-09-01"));
}

#[test]
fn update_status_appends_annotation_without_rewriting() {
    let dir = tempdir().expect("tempdir");
    let mut store = open_store(&dir);

    let id = store.add_goal("Ship the release", &[], "medium", None).expect("add");
    let found = store.update_status(&id, "completed").expect("update");
    assert!(found);
    assert_eq!(store.current_status(&id), Some("completed"));

    // The creation line is untouched; the change is a second line.
    let text = fs::read_to_string(store.path()).expect("read ledger");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("\"active\""));
    assert!(lines[1].contains("\"status_update\""));
    assert!(lines[1].contains("\"old_status\":\"active\""));

    // Filtering resolves through annotations, but the record keeps its
    // creation-time status field.
    let completed = store.get_goals(Some("completed")).expect("filter");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, "active");
    assert!(store.get_goals(Some("active")).expect("filter").is_empty());
}

#[test]
fn update_status_unknown_id_reports_not_found() {
    let dir = tempdir().expect("tempdir");
    let mut store = open_store(&dir);
    let found = store.update_status("goal_nope", "completed").expect("update");
    assert!(!found);
}

#[test]
fn update_status_rejects_wrong_vocabulary() {
    let dir = tempdir().expect("tempdir");
    let mut store = open_store(&dir);
    let id = store.add_goal("Learn piano", &[], "medium", None).expect("add");
    // "in_progress" is a task status, not a goal status.
    assert!(store.update_status(&id, "in_progress").is_err());
    assert_eq!(store.current_status(&id), Some("active"));
}

#[test]
fn creation_validation_rejects_bad_input() {
    let dir = tempdir().expect("tempdir");
    let mut store = open_store(&dir);
    assert!(store.add_goal("   ", &[], "medium", None).is_err());
    assert!(store.add_goal("Real goal", &[], "urgent", None).is_err());
}

#[test]
fn corrupt_lines_are_skipped_not_fatal() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("memory").join("telos.jsonl");
    let mut store = TelosStore::open(&path).expect("open");
    store.add_goal("Valid goal", &[], "medium", None).expect("add");
    drop(store);

    let mut f = fs::OpenOptions::new().append(true).open(&path).expect("open file");
    writeln!(f, "{{not json at all").expect("write");
    writeln!(f, "{{\"type\":\"goal\",\"id\":\"g\",\"timestamp\":\"nope\",\"content\":\"x\",\"status\":\"active\"}}").expect("write");
    drop(f);

    let store = TelosStore::open(&path).expect("reopen");
    let entries = store.get_all_entries().expect("read");
    assert_eq!(entries.len(), 1);
}

#[test]
fn reopen_rebuilds_status_index() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("memory").join("telos.jsonl");
    let mut store = TelosStore::open(&path).expect("open");
    let id = store.add_task("Draft report", None, &[], "medium", None).expect("add");
    store.update_status(&id, "in_progress").expect("update");
    drop(store);

    let store = TelosStore::open(&path).expect("reopen");
    assert_eq!(store.current_status(&id), Some("in_progress"));
}
