// src/services/mutation.rs
//! Applies approved proposals to the stores and keeps the audit trail.
//!
//! Application is best-effort per item: one failing item is recorded and the
//! rest still apply. Every attempt, success or failure, is appended to
//! `changes.jsonl` immediately, so the trail stays truthful even if a later
//! item aborts the run. An append failure of the trail itself is fatal.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ProposalPolicy;
use crate::services::journal::JournalStore;
use crate::services::proposals::{ChangeProposal, NarrativeChange, ProposalEngine, StructuredChange};
use crate::services::telos::TelosStore;
use crate::utils::timestamps::now_iso;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("proposal {0} was not approved")]
    NotApproved(String),
    #[error("proposal {id} failed validation: {reason}")]
    ValidationFailed { id: String, reason: String },
}

/// One line of the audit trail: a single attempted change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRecord {
    pub change_id: String,
    pub timestamp: String,
    pub proposal_id: String,
    /// "structured" or "narrative".
    pub change_type: String,
    pub action: String,
    #[serde(default)]
    pub target_id: Option<String>,
    pub description: String,
    pub success: bool,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of applying one proposal.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub proposal_id: String,
    pub applied_at: String,
    pub records: Vec<ChangeRecord>,
    /// True only when every item applied cleanly.
    pub success: bool,
    pub summary: String,
}

pub struct MutationEngine {
    changes_path: PathBuf,
    policy: ProposalPolicy,
}

impl MutationEngine {
    pub fn open(changes_path: impl Into<PathBuf>, policy: ProposalPolicy) -> Result<Self> {
        let changes_path = changes_path.into();
        if let Some(parent) = changes_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating memory directory {}", parent.display()))?;
        }
        Ok(Self {
            changes_path,
            policy,
        })
    }

    pub fn changes_path(&self) -> &Path {
        &self.changes_path
    }

    /// Apply an approved proposal. Revalidates first; the parse-time check may
    /// be stale by the time a human approves.
    pub fn apply(
        &self,
        telos: &mut TelosStore,
        journal: &mut JournalStore,
        proposal: &ChangeProposal,
        approved: bool,
    ) -> Result<ApplyOutcome> {
        if !approved {
            return Err(MutationError::NotApproved(proposal.proposal_id.clone()).into());
        }
        let engine = ProposalEngine::new(self.policy.clone());
        engine.validate(proposal).map_err(|err| {
            anyhow::Error::from(MutationError::ValidationFailed {
                id: proposal.proposal_id.clone(),
                reason: err.to_string(),
            })
        })?;

        tracing::info!(
            proposal_id = %proposal.proposal_id,
            items = proposal.item_count(),
            "applying proposal"
        );

        let mut records = Vec::new();
        let mut counter = 0usize;

        for item in &proposal.structured_items {
            counter += 1;
            let change_id = format!("{}_structured_{}", proposal.proposal_id, counter);
            let record = self.apply_structured(telos, proposal, item, change_id);
            self.append_record(&record)?;
            records.push(record);
        }
        for item in &proposal.narrative_items {
            counter += 1;
            let change_id = format!("{}_narrative_{}", proposal.proposal_id, counter);
            let record = self.apply_narrative(journal, proposal, item, change_id);
            self.append_record(&record)?;
            records.push(record);
        }

        let success = records.iter().all(|r| r.success);
        let summary = format!(
            "{} goal/task changes, {} journal entries",
            proposal.structured_items.len(),
            proposal.narrative_items.len()
        );
        if !success {
            tracing::warn!(proposal_id = %proposal.proposal_id, "proposal applied with failures");
        }
        Ok(ApplyOutcome {
            proposal_id: proposal.proposal_id.clone(),
            applied_at: now_iso(),
            records,
            success,
            summary,
        })
    }

    fn apply_structured(
        &self,
        telos: &mut TelosStore,
        proposal: &ChangeProposal,
        item: &StructuredChange,
        change_id: String,
    ) -> ChangeRecord {
        let mut record = ChangeRecord {
            change_id,
            timestamp: now_iso(),
            proposal_id: proposal.proposal_id.clone(),
            change_type: "structured".to_string(),
            action: item.action.clone(),
            target_id: None,
            description: String::new(),
            success: false,
            details: Value::Null,
            error: None,
        };

        let result: Result<()> = (|| {
            match item.action.as_str() {
                "add_goal" => {
                    let content = item.content.as_deref().unwrap_or_default();
                    let priority = item.priority.as_deref().unwrap_or("medium");
                    let id =
                        telos.add_goal(content, &item.tags, priority, item.due_date.as_deref())?;
                    record.target_id = Some(id.clone());
                    record.description = format!("Added goal: {}", content);
                    record.details = json!({ "goal_id": id, "priority": priority });
                }
                "add_task" => {
                    let content = item.content.as_deref().unwrap_or_default();
                    let priority = item.priority.as_deref().unwrap_or("medium");
                    let id = telos.add_task(
                        content,
                        item.goal_id.as_deref(),
                        &item.tags,
                        priority,
                        item.due_date.as_deref(),
                    )?;
                    record.target_id = Some(id.clone());
                    record.description = format!("Added task: {}", content);
                    record.details =
                        json!({ "task_id": id, "parent_goal": item.goal_id, "priority": priority });
                }
                "update_status" => {
                    // Validation guarantees one of the two ids is present.
                    let target = item
                        .goal_id
                        .as_deref()
                        .or(item.task_id.as_deref())
                        .unwrap_or_default();
                    let new_status = item.new_status.as_deref().unwrap_or_default();
                    let found = telos.update_status(target, new_status)?;
                    if !found {
                        anyhow::bail!("no record with id {target}");
                    }
                    record.target_id = Some(target.to_string());
                    record.description = format!("Updated {} to {}", target, new_status);
                    record.details = json!({ "new_status": new_status });
                }
                other => anyhow::bail!("unknown action: {other}"),
            }
            Ok(())
        })();

        match result {
            Ok(()) => record.success = true,
            Err(err) => {
                record.error = Some(err.to_string());
                if record.description.is_empty() {
                    record.description = format!("Failed {}", item.action);
                }
                tracing::warn!(change_id = %record.change_id, %err, "structured change failed");
            }
        }
        record
    }

    fn apply_narrative(
        &self,
        journal: &mut JournalStore,
        proposal: &ChangeProposal,
        item: &NarrativeChange,
        change_id: String,
    ) -> ChangeRecord {
        let content = item.content.as_deref().unwrap_or_default();
        let mut record = ChangeRecord {
            change_id,
            timestamp: now_iso(),
            proposal_id: proposal.proposal_id.clone(),
            change_type: "narrative".to_string(),
            action: item.action.clone(),
            target_id: None,
            description: format!("Added {} entry", item.entry_type),
            success: false,
            details: Value::Null,
            error: None,
        };
        match journal.add_entry(
            content,
            &item.entry_type,
            &item.tags,
            item.mood.as_deref(),
            item.location.as_deref(),
            item.weather.as_deref(),
        ) {
            Ok(timestamp) => {
                record.success = true;
                record.target_id = Some(timestamp.clone());
                record.details = json!({ "entry_type": item.entry_type, "timestamp": timestamp });
            }
            Err(err) => {
                record.error = Some(err.to_string());
                tracing::warn!(change_id = %record.change_id, %err, "narrative change failed");
            }
        }
        record
    }

    /// Most recent audit records first, truncated to `limit`. Unparseable
    /// lines are skipped with a warning.
    pub fn get_change_history(&self, limit: usize) -> Result<Vec<ChangeRecord>> {
        if !self.changes_path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.changes_path)
            .with_context(|| format!("reading change log {}", self.changes_path.display()))?;
        let mut records = Vec::new();
        for (line_num, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChangeRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(line = line_num + 1, %err, "skipping unparseable change record");
                }
            }
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }

    /// Distinct proposal ids in the trail, most recent first.
    pub fn proposal_history(&self, limit: usize) -> Result<Vec<String>> {
        let records = self.get_change_history(usize::MAX)?;
        let mut seen = Vec::new();
        for record in records {
            if !seen.contains(&record.proposal_id) {
                seen.push(record.proposal_id);
            }
            if seen.len() >= limit {
                break;
            }
        }
        Ok(seen)
    }

    fn append_record(&self, record: &ChangeRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.changes_path)
            .with_context(|| format!("opening change log {}", self.changes_path.display()))?;
        writeln!(f, "{}", json)
            .with_context(|| format!("appending to change log {}", self.changes_path.display()))?;
        Ok(())
    }
}
