// src/services/proposals.rs
//! Response parsing and proposal validation.
//!
//! Turns raw model output into a `ChangeProposal` through a fallback chain:
//! fenced ```json block, then the whole output as JSON, then keyword patterns
//! over freeform text (low confidence), then an empty proposal. Parsing never
//! fails; validation is a separate, strict pass that the mutation engine
//! repeats before applying anything.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ProposalPolicy;
use crate::services::journal::ENTRY_TYPES;
use crate::services::telos::{allowed_statuses, PRIORITIES};
use crate::utils::timestamps::now_iso;

pub const STRUCTURED_ACTIONS: &[&str] = &["add_goal", "add_task", "update_status"];
pub const NARRATIVE_ACTIONS: &[&str] = &["add_entry"];

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
    #[error("proposal has {got} items, maximum is {max}")]
    TooManyItems { got: usize, max: usize },
    #[error("structured item {index}: {reason}")]
    InvalidStructuredItem { index: usize, reason: String },
    #[error("narrative item {index}: {reason}")]
    InvalidNarrativeItem { index: usize, reason: String },
}

/// One proposed change to the structured store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredChange {
    pub action: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub goal_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub new_status: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
}

/// One proposed journal entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NarrativeChange {
    pub action: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default = "default_entry_type")]
    pub entry_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub weather: Option<String>,
}

fn default_entry_type() -> String {
    "reflection".to_string()
}

/// A parsed, not-yet-validated set of proposed changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeProposal {
    pub proposal_id: String,
    pub timestamp: String,
    pub query: String,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default)]
    pub structured_items: Vec<StructuredChange>,
    #[serde(default)]
    pub narrative_items: Vec<NarrativeChange>,
}

impl ChangeProposal {
    pub fn is_empty(&self) -> bool {
        self.structured_items.is_empty() && self.narrative_items.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.structured_items.len() + self.narrative_items.len()
    }
}

// Envelope shape the model is asked to emit inside the fenced block.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    structured_items: Vec<Value>,
    #[serde(default)]
    narrative_items: Vec<Value>,
}

static SUGGESTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:suggest|add|create).*?(goal|task).*?["']([^"']+)["']"#)
        .expect("suggestion pattern compiles")
});
static REFLECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:reflect|journal|note|remember).*?["']([^"']+)["']"#)
        .expect("reflection pattern compiles")
});
static REASONING_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:because|since|reason)[^.!?]*[.!?]",
        r"(?i)(?:suggest|suggesting)[^.!?]*[.!?]",
        r"(?i)(?:think|believe|recommend)[^.!?]*[.!?]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("reasoning pattern compiles"))
    .collect()
});

pub struct ProposalEngine {
    policy: ProposalPolicy,
}

impl ProposalEngine {
    pub fn new(policy: ProposalPolicy) -> Self {
        Self { policy }
    }

    /// Parse model output into a proposal. Always succeeds; a reply with
    /// nothing recognizable yields an empty proposal.
    pub fn parse_response(&self, response: &str, query: &str) -> ChangeProposal {
        if let Some(json) = extract_fenced_json(response) {
            if let Some(proposal) = self.parse_envelope(&json, query) {
                return proposal;
            }
        }
        // Some models skip the fence and emit bare JSON.
        if let Some(proposal) = self.parse_envelope(response.trim(), query) {
            return proposal;
        }
        self.parse_freeform(response, query)
    }

    /// Strict validation against the store vocabularies and the item ceiling.
    /// The proposal is checked as a whole: one bad item rejects all of it.
    pub fn validate(&self, proposal: &ChangeProposal) -> Result<(), ProposalError> {
        if !(0.0..=1.0).contains(&proposal.confidence) {
            return Err(ProposalError::ConfidenceOutOfRange(proposal.confidence));
        }
        let count = proposal.item_count();
        if count > self.policy.max_items {
            return Err(ProposalError::TooManyItems {
                got: count,
                max: self.policy.max_items,
            });
        }
        for (index, item) in proposal.structured_items.iter().enumerate() {
            validate_structured(item)
                .map_err(|reason| ProposalError::InvalidStructuredItem { index, reason })?;
        }
        for (index, item) in proposal.narrative_items.iter().enumerate() {
            validate_narrative(item)
                .map_err(|reason| ProposalError::InvalidNarrativeItem { index, reason })?;
        }
        Ok(())
    }

    fn parse_envelope(&self, json: &str, query: &str) -> Option<ChangeProposal> {
        let envelope: RawEnvelope = serde_json::from_str(json).ok()?;
        // Items are decoded individually so one malformed item drops out
        // instead of discarding the rest of the envelope.
        let structured_items = decode_items(envelope.structured_items, "structured");
        let narrative_items = decode_items(envelope.narrative_items, "narrative");
        Some(ChangeProposal {
            proposal_id: new_proposal_id(),
            timestamp: now_iso(),
            query: query.to_string(),
            reasoning: envelope
                .reasoning
                .unwrap_or_else(|| "No reasoning provided".to_string()),
            confidence: envelope.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            structured_items,
            narrative_items,
        })
    }

    /// Last-resort keyword extraction from prose. Confidence is pinned low so
    /// callers can distinguish these from real structured replies.
    fn parse_freeform(&self, response: &str, query: &str) -> ChangeProposal {
        let mut structured_items = Vec::new();
        let mut narrative_items = Vec::new();

        // Freeform extraction is deliberately conservative: at most two
        // structured items and one reflection per reply.
        for caps in SUGGESTION_RE.captures_iter(response).take(2) {
            let content = caps[2].trim().to_string();
            if content.is_empty() {
                continue;
            }
            let action = if caps[1].to_lowercase() == "task" {
                "add_task"
            } else {
                "add_goal"
            };
            structured_items.push(StructuredChange {
                action: action.to_string(),
                content: Some(content),
                goal_id: None,
                task_id: None,
                new_status: None,
                tags: vec!["suggested".to_string()],
                priority: None,
                due_date: None,
            });
        }
        for caps in REFLECTION_RE.captures_iter(response).take(1) {
            let content = caps[1].trim().to_string();
            if content.is_empty() {
                continue;
            }
            narrative_items.push(NarrativeChange {
                action: "add_entry".to_string(),
                content: Some(content),
                entry_type: default_entry_type(),
                tags: vec!["suggested".to_string()],
                mood: None,
                location: None,
                weather: None,
            });
        }

        if !structured_items.is_empty() || !narrative_items.is_empty() {
            tracing::warn!(
                structured = structured_items.len(),
                narrative = narrative_items.len(),
                "fell back to freeform extraction"
            );
        }

        ChangeProposal {
            proposal_id: new_proposal_id(),
            timestamp: now_iso(),
            query: query.to_string(),
            reasoning: extract_reasoning(response),
            confidence: 0.3,
            structured_items,
            narrative_items,
        }
    }
}

/// Find the first fenced ```json block with a bounded string scan.
fn extract_fenced_json(text: &str) -> Option<String> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    let body = rest[..end].trim();
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

fn decode_items<T: for<'de> Deserialize<'de>>(values: Vec<Value>, kind: &str) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<T>(v) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!(kind, %err, "dropping malformed proposal item");
                None
            }
        })
        .collect()
}

/// Pull the first explanation-looking sentence out of prose, else the first
/// sentence, else a fixed placeholder.
fn extract_reasoning(response: &str) -> String {
    for re in REASONING_RES.iter() {
        if let Some(m) = re.find(response) {
            return m.as_str().trim().to_string();
        }
    }
    response
        .split_inclusive(['.', '!', '?'])
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "No reasoning provided".to_string())
}

fn validate_structured(item: &StructuredChange) -> Result<(), String> {
    if !STRUCTURED_ACTIONS.contains(&item.action.as_str()) {
        return Err(format!("unknown action: {}", item.action));
    }
    match item.action.as_str() {
        "add_goal" | "add_task" => {
            let has_content = item
                .content
                .as_deref()
                .map(|c| !c.trim().is_empty())
                .unwrap_or(false);
            if !has_content {
                return Err(format!("{} requires non-empty content", item.action));
            }
        }
        "update_status" => {
            // The target's kind determines which status vocabulary applies.
            let kind = if item.goal_id.is_some() {
                "goal"
            } else if item.task_id.is_some() {
                "task"
            } else {
                return Err("update_status requires goal_id or task_id".to_string());
            };
            let status = item
                .new_status
                .as_deref()
                .ok_or_else(|| "update_status requires new_status".to_string())?;
            let valid = allowed_statuses(kind).unwrap_or(&[]);
            if !valid.contains(&status) {
                return Err(format!("invalid status for {kind}: {status}"));
            }
        }
        _ => unreachable!(),
    }
    if let Some(priority) = item.priority.as_deref() {
        if !PRIORITIES.contains(&priority) {
            return Err(format!("invalid priority: {priority}"));
        }
    }
    Ok(())
}

fn validate_narrative(item: &NarrativeChange) -> Result<(), String> {
    if !NARRATIVE_ACTIONS.contains(&item.action.as_str()) {
        return Err(format!("unknown action: {}", item.action));
    }
    let has_content = item
        .content
        .as_deref()
        .map(|c| !c.trim().is_empty())
        .unwrap_or(false);
    if !has_content {
        return Err("add_entry requires non-empty content".to_string());
    }
    if !ENTRY_TYPES.contains(&item.entry_type.as_str()) {
        return Err(format!("invalid entry type: {}", item.entry_type));
    }
    Ok(())
}

fn new_proposal_id() -> String {
    format!("proposal_{}", Uuid::new_v4().simple())
}
