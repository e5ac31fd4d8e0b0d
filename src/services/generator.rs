// src/services/generator.rs
//! Text generation seam.
//!
//! `TextGenerator` is the one trait the rest of the crate talks to; the
//! proposal pipeline never knows whether replies come from a local model, a
//! remote endpoint, or a scripted stub. `MockGenerator` ships as the built-in
//! offline strategy and is also what the tests drive.

use thiserror::Error;

use crate::services::proposals::{ChangeProposal, ProposalEngine};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generation timed out after {0}s")]
    Timeout(u64),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;
}

/// Deterministic offline generator. Emits a canned fenced-JSON envelope keyed
/// off simple words in the prompt, enough to exercise the whole pipeline
/// without a model.
#[derive(Debug, Default)]
pub struct MockGenerator;

impl MockGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl TextGenerator for MockGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        let lower = prompt.to_lowercase();
        let body = if lower.contains("task") {
            r#"{
  "reasoning": "The request mentions a task, so a pending task is suggested.",
  "confidence": 0.8,
  "structured_items": [
    {"action": "add_task", "content": "Follow up on the discussed task", "tags": ["suggested"], "priority": "medium"}
  ],
  "narrative_items": []
}"#
        } else if lower.contains("goal") {
            r#"{
  "reasoning": "The request mentions a goal, so a new goal is suggested.",
  "confidence": 0.8,
  "structured_items": [
    {"action": "add_goal", "content": "Pursue the discussed goal", "tags": ["suggested"], "priority": "medium"}
  ],
  "narrative_items": []
}"#
        } else {
            r#"{
  "reasoning": "Nothing actionable stood out, so a reflection is suggested.",
  "confidence": 0.6,
  "structured_items": [],
  "narrative_items": [
    {"action": "add_entry", "content": "Reviewed recent context without new commitments.", "entry_type": "reflection", "tags": ["review"]}
  ]
}"#
        };
        Ok(format!("```json\n{}\n```", body))
    }
}

/// Generate, parse, and validate, retrying generation only when validation
/// fails. Transport errors propagate immediately; a broken connection will
/// not be fixed by asking again.
pub fn propose_with_retry(
    generator: &dyn TextGenerator,
    engine: &ProposalEngine,
    prompt: &str,
    query: &str,
    max_retries: u32,
) -> Result<ChangeProposal, GeneratorError> {
    let mut last_failure = String::new();
    for attempt in 0..=max_retries {
        let response = generator.generate(prompt)?;
        let proposal = engine.parse_response(&response, query);
        match engine.validate(&proposal) {
            Ok(()) => {
                if attempt > 0 {
                    tracing::info!(attempt, "proposal validated after retry");
                }
                return Ok(proposal);
            }
            Err(err) => {
                last_failure = err.to_string();
                tracing::warn!(attempt, %err, "proposal failed validation");
            }
        }
    }
    Err(GeneratorError::InvalidResponse(format!(
        "no valid proposal after {} attempts: {}",
        max_retries + 1,
        last_failure
    )))
}
