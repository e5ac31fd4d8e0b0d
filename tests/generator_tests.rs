// tests/generator_tests.rs
//! The validation-retry wrapper around a text generator.

use std::cell::RefCell;

use telos_core::config::ProposalPolicy;
use telos_core::services::generator::{
    propose_with_retry, GeneratorError, MockGenerator, TextGenerator,
};
use telos_core::services::proposals::ProposalEngine;

/// Replays scripted responses in order; panics if asked for more.
struct Playback {
    responses: RefCell<Vec<String>>,
    calls: RefCell<usize>,
}

impl Playback {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: RefCell::new(responses.iter().rev().map(|s| s.to_string()).collect()),
            calls: RefCell::new(0),
        }
    }

    fn call_count(&self) -> usize {
        *self.calls.borrow()
    }
}

impl TextGenerator for Playback {
    fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
        *self.calls.borrow_mut() += 1;
        self.responses
            .borrow_mut()
            .pop()
            .ok_or_else(|| GeneratorError::InvalidResponse("script exhausted".to_string()))
    }
}

struct Failing;

impl TextGenerator for Failing {
    fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
        Err(GeneratorError::Connection("refused".to_string()))
    }
}

const OVERSIZED: &str = r#"```json
{
  "confidence": 0.9,
  "structured_items": [
    {"action": "add_goal", "content": "g1"},
    {"action": "add_goal", "content": "g2"},
    {"action": "add_goal", "content": "g3"},
    {"action": "add_goal", "content": "g4"},
    {"action": "add_goal", "content": "g5"},
    {"action": "add_goal", "content": "g6"}
  ]
}
```"#;

const VALID: &str = r#"```json
{
  "reasoning": "ok",
  "confidence": 0.9,
  "structured_items": [{"action": "add_goal", "content": "One good goal"}]
}
```"#;

fn engine() -> ProposalEngine {
    ProposalEngine::new(ProposalPolicy::default())
}

#[test]
fn retries_until_a_response_validates() {
    let generator = Playback::new(&[OVERSIZED, VALID]);
    let proposal =
        propose_with_retry(&generator, &engine(), "prompt", "query", 2).expect("second try");
    assert_eq!(generator.call_count(), 2);
    assert_eq!(proposal.structured_items.len(), 1);
    assert_eq!(proposal.query, "query");
}

#[test]
fn gives_up_after_the_configured_attempts() {
    let generator = Playback::new(&[OVERSIZED, OVERSIZED, OVERSIZED]);
    let err = propose_with_retry(&generator, &engine(), "prompt", "query", 2)
        .expect_err("must give up");
    assert_eq!(generator.call_count(), 3);
    assert!(matches!(err, GeneratorError::InvalidResponse(_)));
    assert!(err.to_string().contains("after 3 attempts"));
}

#[test]
fn transport_errors_are_never_retried() {
    let err =
        propose_with_retry(&Failing, &engine(), "prompt", "query", 5).expect_err("must fail");
    assert!(matches!(err, GeneratorError::Connection(_)));
}

#[test]
fn mock_generator_output_parses_and_validates() {
    let generator = MockGenerator::new();
    let engine = engine();
    for prompt in ["think about my goal", "help with a task", "anything else"] {
        let response = generator.generate(prompt).expect("generate");
        let proposal = engine.parse_response(&response, prompt);
        assert!(!proposal.is_empty());
        engine.validate(&proposal).expect("mock output validates");
    }
}
