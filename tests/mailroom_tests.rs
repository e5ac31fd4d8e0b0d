// tests/mailroom_tests.rs
//! Mail triage: dedupe ledger, suggestion filtering, fallback parsing.

use telos_core::config::MailPolicy;
use telos_core::services::generator::{GeneratorError, TextGenerator};
use telos_core::services::mailroom::{EmailMessage, MailError, MailSource, Mailroom};
use telos_core::services::telos::TelosStore;
use tempfile::tempdir;

struct StaticSource(Vec<EmailMessage>);

impl MailSource for StaticSource {
    fn fetch_recent(&self, _days_back: u32) -> Result<Vec<EmailMessage>, MailError> {
        Ok(self.0.clone())
    }
}

struct Scripted(String);

impl TextGenerator for Scripted {
    fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
        Ok(self.0.clone())
    }
}

fn message(id: &str, subject: &str) -> EmailMessage {
    EmailMessage {
        message_id: id.to_string(),
        sender: "alice@example.com".to_string(),
        subject: subject.to_string(),
        date: "2026-08-20".to_string(),
        body: format!("Body of {subject}"),
    }
}

fn setup(dir: &tempfile::TempDir) -> (Mailroom, TelosStore) {
    let memory = dir.path().join("memory");
    let mailroom = Mailroom::open(memory.join("processed_emails.jsonl"), MailPolicy::default())
        .expect("mailroom");
    let telos = TelosStore::open(memory.join("telos.jsonl")).expect("telos");
    (mailroom, telos)
}

#[test]
fn triage_suggests_todos_and_filters_duplicates() {
    let dir = tempdir().expect("tempdir");
    let (mailroom, mut telos) = setup(&dir);
    telos
        .add_task("Buy groceries for the week", None, &[], "medium", None)
        .expect("add task");

    let source = StaticSource(vec![message("m1", "Grocery list"), message("m2", "Invoice due")]);
    let reply = r#"```json
{
  "news_brief": "Two emails: one grocery list, one invoice reminder.",
  "suggested_todos": [
    {"content": "Buy groceries for the week ahead", "priority": "medium", "reason": "grocery email"},
    {"content": "Pay the outstanding invoice", "priority": "high"}
  ]
}
```"#;

    let report = mailroom
        .triage(&source, &Scripted(reply.to_string()), &telos)
        .expect("triage");

    assert_eq!(report.messages_seen, 2);
    assert_eq!(report.messages_new, 2);
    assert!(report.news_brief.contains("invoice reminder"));
    // The grocery suggestion overlaps the existing task and is dropped.
    assert_eq!(report.duplicates_filtered, 1);
    assert_eq!(report.suggested_todos.len(), 1);
    assert_eq!(report.suggested_todos[0].content, "Pay the outstanding invoice");
    assert_eq!(report.suggested_todos[0].priority, "high");
    // Suggestions are for review only; the ledger is untouched.
    assert_eq!(telos.get_tasks(None, None).expect("tasks").len(), 1);
}

#[test]
fn processed_messages_are_skipped_on_the_next_run() {
    let dir = tempdir().expect("tempdir");
    let (mailroom, telos) = setup(&dir);
    let source = StaticSource(vec![message("m1", "Hello")]);
    let reply = r#"```json
{"news_brief": "One greeting.", "suggested_todos": []}
```"#;

    let first = mailroom
        .triage(&source, &Scripted(reply.to_string()), &telos)
        .expect("triage");
    assert_eq!(first.messages_new, 1);

    let second = mailroom
        .triage(&source, &Scripted(reply.to_string()), &telos)
        .expect("triage");
    assert_eq!(second.messages_seen, 1);
    assert_eq!(second.messages_new, 0);
    assert!(second.news_brief.is_empty());
}

#[test]
fn non_json_reply_becomes_the_brief() {
    let dir = tempdir().expect("tempdir");
    let (mailroom, telos) = setup(&dir);
    let source = StaticSource(vec![message("m1", "Status")]);

    let report = mailroom
        .triage(
            &source,
            &Scripted("Nothing urgent in the inbox today.".to_string()),
            &telos,
        )
        .expect("triage");
    assert_eq!(report.news_brief, "Nothing urgent in the inbox today.");
    assert!(report.suggested_todos.is_empty());
}

#[test]
fn message_cap_limits_the_batch() {
    let dir = tempdir().expect("tempdir");
    let memory = dir.path().join("memory");
    let policy = MailPolicy {
        max_messages: 1,
        ..MailPolicy::default()
    };
    let mailroom = Mailroom::open(memory.join("processed_emails.jsonl"), policy).expect("open");
    let telos = TelosStore::open(memory.join("telos.jsonl")).expect("telos");

    let source = StaticSource(vec![message("m1", "A"), message("m2", "B")]);
    let reply = r#"```json
{"news_brief": "ok", "suggested_todos": []}
```"#;
    let report = mailroom
        .triage(&source, &Scripted(reply.to_string()), &telos)
        .expect("triage");
    assert_eq!(report.messages_seen, 1);
    assert_eq!(report.messages_new, 1);
}
