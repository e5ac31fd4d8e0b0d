// src/services/telos.rs
//! Structured goal/task ledger.
//!
//! - One JSON object per line in `telos.jsonl`, append-only: creation records
//!   are never rewritten, status changes are separate annotation lines.
//! - The current status of a record is the `new_status` of the most recently
//!   appended annotation targeting it, or the creation status if none exists.
//!   An in-memory index (id -> kind + latest status) is built by one replay at
//!   open and refreshed on each append, so status lookups never rescan the log.
//! - Reads validate every line and skip invalid ones with a warning; a corrupt
//!   line never aborts the read. Writes are validated and surfaced on failure.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::utils::timestamps::{now_iso, timestamp_digits, validate_timestamp};

pub const GOAL_STATUSES: &[&str] = &["active", "completed", "cancelled"];
pub const TASK_STATUSES: &[&str] = &["pending", "in_progress", "completed", "cancelled"];
pub const PRIORITIES: &[&str] = &["low", "medium", "high"];

/// Permitted status set for a record kind (`goal` or `task`).
pub fn allowed_statuses(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "goal" => Some(GOAL_STATUSES),
        "task" => Some(TASK_STATUSES),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum TelosError {
    #[error("content cannot be empty")]
    EmptyContent,
    #[error("invalid timestamp format: {0}")]
    InvalidTimestamp(String),
    #[error("invalid status for {kind}: {status}")]
    InvalidStatus { kind: String, status: String },
    #[error("invalid priority: {0}")]
    InvalidPriority(String),
    #[error("invalid target kind: {0}")]
    InvalidTargetKind(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoalRecord {
    pub id: String,
    pub timestamp: String,
    pub content: String,
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub timestamp: String,
    pub content: String,
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub due_date: Option<String>,
    /// Stored verbatim; a dangling reference is tolerated.
    #[serde(default)]
    pub parent_goal: Option<String>,
}

/// Append-only status-change annotation. The targeted creation record is
/// never touched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub id: String,
    pub timestamp: String,
    pub target_id: String,
    pub target_kind: String,
    #[serde(default)]
    pub old_status: Option<String>,
    pub new_status: String,
}

/// One line of the ledger, tagged by its `type` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelosEntry {
    Goal(GoalRecord),
    Task(TaskRecord),
    StatusUpdate(StatusUpdate),
}

fn default_priority() -> String {
    "medium".to_string()
}

/// Single writer for `telos.jsonl`.
pub struct TelosStore {
    path: PathBuf,
    // id -> (kind, latest status)
    status_index: HashMap<String, (String, String)>,
}

impl TelosStore {
    /// Open the ledger, creating the parent directory if missing, and build
    /// the status index with one linear replay.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating memory directory {}", parent.display()))?;
        }
        let mut store = Self {
            path,
            status_index: HashMap::new(),
        };
        for entry in store.get_all_entries()? {
            store.index_entry(&entry);
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a goal; returns the new id. Fails on empty content or a bad priority.
    pub fn add_goal(
        &mut self,
        content: &str,
        tags: &[String],
        priority: &str,
        due_date: Option<&str>,
    ) -> Result<String> {
        let ts = now_iso();
        let id = format!("goal_{}", timestamp_digits(&ts));
        let goal = GoalRecord {
            id: id.clone(),
            timestamp: ts,
            content: content.to_string(),
            status: "active".to_string(),
            tags: tags.to_vec(),
            priority: priority.to_string(),
            due_date: due_date.map(|d| d.to_string()),
        };
        self.append(TelosEntry::Goal(goal))?;
        Ok(id)
    }

    /// Add a task; `parent_goal` is stored verbatim, unchecked.
    pub fn add_task(
        &mut self,
        content: &str,
        parent_goal: Option<&str>,
        tags: &[String],
        priority: &str,
        due_date: Option<&str>,
    ) -> Result<String> {
        let ts = now_iso();
        let id = format!("task_{}", timestamp_digits(&ts));
        let task = TaskRecord {
            id: id.clone(),
            timestamp: ts,
            content: content.to_string(),
            status: "pending".to_string(),
            tags: tags.to_vec(),
            priority: priority.to_string(),
            due_date: due_date.map(|d| d.to_string()),
            parent_goal: parent_goal.map(|g| g.to_string()),
        };
        self.append(TelosEntry::Task(task))?;
        Ok(id)
    }

    /// Record a status change as a new annotation line.
    ///
    /// Returns `Ok(false)` if no record with that id exists. Fails if
    /// `new_status` is not valid for the target's kind.
    pub fn update_status(&mut self, id: &str, new_status: &str) -> Result<bool> {
        let (kind, old_status) = match self.status_index.get(id) {
            Some((kind, status)) => (kind.clone(), status.clone()),
            None => return Ok(false),
        };
        let valid = allowed_statuses(&kind).unwrap_or(&[]);
        if !valid.contains(&new_status) {
            return Err(TelosError::InvalidStatus {
                kind,
                status: new_status.to_string(),
            }
            .into());
        }
        let ts = now_iso();
        let update = StatusUpdate {
            id: format!("update_{}_{}", id, timestamp_digits(&ts)),
            timestamp: ts,
            target_id: id.to_string(),
            target_kind: kind,
            old_status: Some(old_status),
            new_status: new_status.to_string(),
        };
        self.append(TelosEntry::StatusUpdate(update))?;
        Ok(true)
    }

    /// Latest status for a record, resolved from the index.
    pub fn current_status(&self, id: &str) -> Option<&str> {
        self.status_index.get(id).map(|(_, status)| status.as_str())
    }

    /// Replay the whole ledger in file order: creation records and annotations
    /// together. Invalid lines are logged and skipped, never fatal.
    pub fn get_all_entries(&self) -> Result<Vec<TelosEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading telos ledger {}", self.path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<TelosEntry>(line) {
                Ok(entry) => match validate_entry(&entry) {
                    Ok(()) => entries.push(entry),
                    Err(err) => {
                        tracing::warn!(line = line_num + 1, %err, "skipping invalid telos entry");
                    }
                },
                Err(err) => {
                    tracing::warn!(line = line_num + 1, %err, "skipping unparseable telos line");
                }
            }
        }
        Ok(entries)
    }

    /// Goals, optionally filtered by resolved current status. The returned
    /// records keep their original (creation-time) `status` field.
    pub fn get_goals(&self, status_filter: Option<&str>) -> Result<Vec<GoalRecord>> {
        let goals = self
            .get_all_entries()?
            .into_iter()
            .filter_map(|e| match e {
                TelosEntry::Goal(g) => Some(g),
                _ => None,
            })
            .filter(|g| match status_filter {
                Some(want) => self.current_status(&g.id) == Some(want),
                None => true,
            })
            .collect();
        Ok(goals)
    }

    /// Tasks, optionally filtered by resolved current status and/or parent goal.
    pub fn get_tasks(
        &self,
        status_filter: Option<&str>,
        parent_goal: Option<&str>,
    ) -> Result<Vec<TaskRecord>> {
        let tasks = self
            .get_all_entries()?
            .into_iter()
            .filter_map(|e| match e {
                TelosEntry::Task(t) => Some(t),
                _ => None,
            })
            .filter(|t| match status_filter {
                Some(want) => self.current_status(&t.id) == Some(want),
                None => true,
            })
            .filter(|t| match parent_goal {
                Some(pg) => t.parent_goal.as_deref() == Some(pg),
                None => true,
            })
            .collect();
        Ok(tasks)
    }

    fn append(&mut self, entry: TelosEntry) -> Result<()> {
        validate_entry(&entry)?;
        let json = serde_json::to_string(&entry)?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening telos ledger {}", self.path.display()))?;
        writeln!(f, "{}", json)
            .with_context(|| format!("appending to telos ledger {}", self.path.display()))?;
        self.index_entry(&entry);
        match &entry {
            TelosEntry::Goal(g) => tracing::info!(id = %g.id, "appended goal"),
            TelosEntry::Task(t) => tracing::info!(id = %t.id, "appended task"),
            TelosEntry::StatusUpdate(u) => {
                tracing::info!(target = %u.target_id, status = %u.new_status, "appended status update")
            }
        }
        Ok(())
    }

    fn index_entry(&mut self, entry: &TelosEntry) {
        match entry {
            TelosEntry::Goal(g) => {
                self.status_index
                    .insert(g.id.clone(), ("goal".to_string(), g.status.clone()));
            }
            TelosEntry::Task(t) => {
                self.status_index
                    .insert(t.id.clone(), ("task".to_string(), t.status.clone()));
            }
            TelosEntry::StatusUpdate(u) => {
                // An annotation targeting an unknown id (hand-edited file) is
                // tolerated and simply ignored here.
                if let Some(slot) = self.status_index.get_mut(&u.target_id) {
                    slot.1 = u.new_status.clone();
                }
            }
        }
    }
}

/// Uniform validation, applied on write and on read.
fn validate_entry(entry: &TelosEntry) -> Result<(), TelosError> {
    match entry {
        TelosEntry::Goal(g) => {
            validate_creation("goal", &g.timestamp, &g.content, &g.status, &g.priority)
        }
        TelosEntry::Task(t) => {
            validate_creation("task", &t.timestamp, &t.content, &t.status, &t.priority)
        }
        TelosEntry::StatusUpdate(u) => {
            if !validate_timestamp(&u.timestamp) {
                return Err(TelosError::InvalidTimestamp(u.timestamp.clone()));
            }
            let valid = allowed_statuses(&u.target_kind)
                .ok_or_else(|| TelosError::InvalidTargetKind(u.target_kind.clone()))?;
            if !valid.contains(&u.new_status.as_str()) {
                return Err(TelosError::InvalidStatus {
                    kind: u.target_kind.clone(),
                    status: u.new_status.clone(),
                });
            }
            Ok(())
        }
    }
}

fn validate_creation(
    kind: &str,
    timestamp: &str,
    content: &str,
    status: &str,
    priority: &str,
) -> Result<(), TelosError> {
    if content.trim().is_empty() {
        return Err(TelosError::EmptyContent);
    }
    if !validate_timestamp(timestamp) {
        return Err(TelosError::InvalidTimestamp(timestamp.to_string()));
    }
    let valid =
        allowed_statuses(kind).ok_or_else(|| TelosError::InvalidTargetKind(kind.to_string()))?;
    if !valid.contains(&status) {
        return Err(TelosError::InvalidStatus {
            kind: kind.to_string(),
            status: status.to_string(),
        });
    }
    if !PRIORITIES.contains(&priority) {
        return Err(TelosError::InvalidPriority(priority.to_string()));
    }
    Ok(())
}
