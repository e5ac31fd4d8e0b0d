// src/services/mailroom.rs
//! Email triage.
//!
//! Pulls recent messages from a `MailSource`, skips anything already seen in
//! the processed ledger, asks the generator for a news brief plus suggested
//! todos, and filters suggestions that duplicate existing tasks by word-set
//! similarity. A message is marked processed only after its batch was
//! analyzed, so a failed run leaves it eligible for the next one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::MailPolicy;
use crate::services::generator::TextGenerator;
use crate::services::telos::TelosStore;
use crate::utils::timestamps::now_iso;

const PROMPT_EMAIL_CAP: usize = 10;
const PROMPT_TASK_CAP: usize = 10;
const BODY_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail fetch failed: {0}")]
    Fetch(String),
    #[error("mail authentication failed: {0}")]
    Auth(String),
}

/// One fetched message, already decoded to text.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub date: String,
    pub body: String,
}

/// Source of recent messages. Implementations own protocol and credentials.
pub trait MailSource {
    fn fetch_recent(&self, days_back: u32) -> Result<Vec<EmailMessage>, MailError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestedTodo {
    pub content: String,
    #[serde(default = "default_todo_priority")]
    pub priority: String,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_todo_priority() -> String {
    "medium".to_string()
}

#[derive(Debug, Clone, Default)]
pub struct TriageReport {
    pub messages_seen: usize,
    pub messages_new: usize,
    pub news_brief: String,
    pub suggested_todos: Vec<SuggestedTodo>,
    pub duplicates_filtered: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProcessedRecord {
    message_id: String,
    processed_at: String,
}

#[derive(Debug, Deserialize)]
struct TriageEnvelope {
    #[serde(default)]
    news_brief: String,
    #[serde(default)]
    suggested_todos: Vec<SuggestedTodo>,
}

pub struct Mailroom {
    processed_path: PathBuf,
    policy: MailPolicy,
}

impl Mailroom {
    pub fn open(processed_path: impl Into<PathBuf>, policy: MailPolicy) -> Result<Self> {
        let processed_path = processed_path.into();
        if let Some(parent) = processed_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating memory directory {}", parent.display()))?;
        }
        Ok(Self {
            processed_path,
            policy,
        })
    }

    pub fn processed_path(&self) -> &Path {
        &self.processed_path
    }

    /// Fetch, dedupe, analyze, and filter. Suggested todos are returned for
    /// review, never written to the task ledger here.
    pub fn triage(
        &self,
        source: &dyn MailSource,
        generator: &dyn TextGenerator,
        telos: &TelosStore,
    ) -> Result<TriageReport> {
        let mut messages = source
            .fetch_recent(self.policy.days_back)
            .map_err(anyhow::Error::from)?;
        messages.truncate(self.policy.max_messages);
        let messages_seen = messages.len();

        let processed = self.processed_ids()?;
        let new_messages: Vec<EmailMessage> = messages
            .into_iter()
            .filter(|m| !processed.contains(&m.message_id))
            .collect();
        tracing::info!(
            seen = messages_seen,
            new = new_messages.len(),
            "fetched mail for triage"
        );
        if new_messages.is_empty() {
            return Ok(TriageReport {
                messages_seen,
                ..TriageReport::default()
            });
        }

        let existing_tasks: Vec<String> = {
            let mut tasks = telos.get_tasks(Some("pending"), None)?;
            tasks.extend(telos.get_tasks(Some("in_progress"), None)?);
            tasks.into_iter().map(|t| t.content).collect()
        };

        let prompt = build_triage_prompt(&new_messages, &existing_tasks);
        let response = generator
            .generate(&prompt)
            .map_err(|err| anyhow::anyhow!("triage generation failed: {err}"))?;
        let envelope = parse_triage_response(&response);

        let mut suggested_todos = Vec::new();
        let mut duplicates_filtered = 0usize;
        for todo in envelope.suggested_todos {
            if todo.content.trim().is_empty() {
                continue;
            }
            let is_duplicate = existing_tasks
                .iter()
                .any(|t| word_similarity(t, &todo.content) >= self.policy.duplicate_threshold);
            if is_duplicate {
                duplicates_filtered += 1;
                tracing::info!(content = %todo.content, "filtered duplicate todo suggestion");
            } else {
                suggested_todos.push(todo);
            }
        }

        // Analysis succeeded, so the batch counts as processed.
        for message in &new_messages {
            self.mark_processed(&message.message_id)?;
        }

        Ok(TriageReport {
            messages_seen,
            messages_new: new_messages.len(),
            news_brief: envelope.news_brief,
            suggested_todos,
            duplicates_filtered,
        })
    }

    fn processed_ids(&self) -> Result<HashSet<String>> {
        if !self.processed_path.exists() {
            return Ok(HashSet::new());
        }
        let text = fs::read_to_string(&self.processed_path).with_context(|| {
            format!("reading processed ledger {}", self.processed_path.display())
        })?;
        let mut ids = HashSet::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ProcessedRecord>(line) {
                Ok(record) => {
                    ids.insert(record.message_id);
                }
                Err(err) => {
                    tracing::warn!(%err, "skipping unparseable processed-mail line");
                }
            }
        }
        Ok(ids)
    }

    fn mark_processed(&self, message_id: &str) -> Result<()> {
        let record = ProcessedRecord {
            message_id: message_id.to_string(),
            processed_at: now_iso(),
        };
        let json = serde_json::to_string(&record)?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.processed_path)
            .with_context(|| {
                format!("opening processed ledger {}", self.processed_path.display())
            })?;
        writeln!(f, "{}", json).with_context(|| {
            format!("appending to processed ledger {}", self.processed_path.display())
        })?;
        Ok(())
    }
}

fn build_triage_prompt(messages: &[EmailMessage], existing_tasks: &[String]) -> String {
    let mut prompt = String::from(
        "You are triaging recent email. Summarize what matters and suggest todos.\n\n",
    );
    prompt.push_str("Recent emails:\n");
    for message in messages.iter().take(PROMPT_EMAIL_CAP) {
        let body: String = message.body.chars().take(BODY_EXCERPT_CHARS).collect();
        prompt.push_str(&format!(
            "- From: {} | Subject: {} | Date: {}\n  {}\n",
            message.sender, message.subject, message.date, body
        ));
    }
    if !existing_tasks.is_empty() {
        prompt.push_str("\nExisting open tasks (do not re-suggest these):\n");
        for task in existing_tasks.iter().take(PROMPT_TASK_CAP) {
            prompt.push_str(&format!("- {}\n", task));
        }
    }
    prompt.push_str(
        "\nReply with a ```json block shaped as:\n\
         {\"news_brief\": \"...\", \"suggested_todos\": \
         [{\"content\": \"...\", \"priority\": \"low|medium|high\", \"reason\": \"...\"}]}\n",
    );
    prompt
}

/// Decode the triage reply, falling back to treating the whole response as
/// the brief when it is not valid JSON.
fn parse_triage_response(response: &str) -> TriageEnvelope {
    let candidate = extract_fenced(response).unwrap_or_else(|| response.trim().to_string());
    match serde_json::from_str::<TriageEnvelope>(&candidate) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(%err, "triage reply was not valid JSON; using raw text as brief");
            TriageEnvelope {
                news_brief: response.trim().to_string(),
                suggested_todos: Vec::new(),
            }
        }
    }
}

fn extract_fenced(text: &str) -> Option<String> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}

/// Jaccard similarity over lowercase word sets.
fn word_similarity(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_string())
            .collect()
    };
    let wa = words(a);
    let wb = words(b);
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    intersection as f64 / union as f64
}
