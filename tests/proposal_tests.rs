// tests/proposal_tests.rs
//! Response parsing fallback chain and proposal validation.

use telos_core::config::ProposalPolicy;
use telos_core::services::proposals::{
    ChangeProposal, NarrativeChange, ProposalEngine, ProposalError, StructuredChange,
};
use telos_core::utils::now_iso;

fn engine() -> ProposalEngine {
    ProposalEngine::new(ProposalPolicy::default())
}

fn goal_item(content: &str) -> StructuredChange {
    StructuredChange {
        action: "add_goal".to_string(),
        content: Some(content.to_string()),
        goal_id: None,
        task_id: None,
        new_status: None,
        tags: Vec::new(),
        priority: None,
        due_date: None,
    }
}

fn empty_proposal() -> ChangeProposal {
    ChangeProposal {
        proposal_id: "proposal_test".to_string(),
        timestamp: now_iso(),
        query: "q".to_string(),
        reasoning: "r".to_string(),
        confidence: 0.5,
        structured_items: Vec::new(),
        narrative_items: Vec::new(),
    }
}

#[test]
fn parses_fenced_json_envelope() {
    let response = r#"Here is my suggestion.

```json
{
  "reasoning": "The user asked about fitness.",
  "confidence": 0.9,
  "structured_items": [
    {"action": "add_goal", "content": "Exercise three times a week", "tags": ["health"], "priority": "high"}
  ],
  "narrative_items": [
    {"action": "add_entry", "content": "Noticed renewed motivation.", "entry_type": "reflection"}
  ]
}
```

Hope this helps."#;

    let proposal = engine().parse_response(response, "fitness plans");
    assert_eq!(proposal.query, "fitness plans");
    assert_eq!(proposal.reasoning, "The user asked about fitness.");
    assert!((proposal.confidence - 0.9).abs() < 1e-9);
    assert_eq!(proposal.structured_items.len(), 1);
    assert_eq!(proposal.structured_items[0].action, "add_goal");
    assert_eq!(proposal.structured_items[0].priority.as_deref(), Some("high"));
    assert_eq!(proposal.narrative_items.len(), 1);
    assert_eq!(proposal.narrative_items[0].entry_type, "reflection");
    assert!(engine().validate(&proposal).is_ok());
}

#[test]
fn parses_bare_json_without_fence() {
    let response = r#"{"reasoning": "direct", "confidence": 0.7, "structured_items": [], "narrative_items": []}"#;
    let proposal = engine().parse_response(response, "q");
    assert_eq!(proposal.reasoning, "direct");
    assert!(proposal.is_empty());
}

#[test]
fn malformed_items_are_dropped_individually() {
    let response = r#"```json
{
  "confidence": 0.8,
  "structured_items": [
    {"action": "add_task", "content": "Call the dentist"},
    {"action": 42}
  ]
}
```"#;
    let proposal = engine().parse_response(response, "q");
    assert_eq!(proposal.structured_items.len(), 1);
    assert_eq!(proposal.structured_items[0].content.as_deref(), Some("Call the dentist"));
    // Missing reasoning falls back to the placeholder.
    assert_eq!(proposal.reasoning, "No reasoning provided");
}

#[test]
fn out_of_range_json_confidence_is_clamped() {
    let response = r#"```json
{"confidence": 7.5, "structured_items": [], "narrative_items": []}
```"#;
    let proposal = engine().parse_response(response, "q");
    assert!((proposal.confidence - 1.0).abs() < 1e-9);
}

#[test]
fn freeform_text_yields_low_confidence_extraction() {
    let response = "I would suggest adding a goal 'learn woodworking' this year, \
                    because you keep mentioning it.";
    let proposal = engine().parse_response(response, "hobbies");
    assert!((proposal.confidence - 0.3).abs() < 1e-9);
    assert_eq!(proposal.structured_items.len(), 1);
    assert_eq!(proposal.structured_items[0].action, "add_goal");
    assert_eq!(
        proposal.structured_items[0].content.as_deref(),
        Some("learn woodworking")
    );
    assert_eq!(proposal.structured_items[0].tags, vec!["suggested".to_string()]);
    assert!(proposal.reasoning.to_lowercase().contains("because"));
}

#[test]
fn freeform_task_and_reflection_extraction() {
    let response = "You could create a task 'book the dentist appointment'. \
                    Also worth a journal line: 'energy was better this week'.";
    let proposal = engine().parse_response(response, "q");
    assert_eq!(proposal.structured_items.len(), 1);
    assert_eq!(proposal.structured_items[0].action, "add_task");
    assert_eq!(proposal.narrative_items.len(), 1);
    assert_eq!(
        proposal.narrative_items[0].content.as_deref(),
        Some("energy was better this week")
    );
}

#[test]
fn unrecognizable_text_yields_empty_proposal() {
    let proposal = engine().parse_response("The weather was fine.", "q");
    assert!(proposal.is_empty());
    assert!((proposal.confidence - 0.3).abs() < 1e-9);
}

#[test]
fn item_ceiling_is_a_hard_failure() {
    let mut proposal = empty_proposal();
    for i in 0..6 {
        proposal.structured_items.push(goal_item(&format!("Goal {i}")));
    }
    match engine().validate(&proposal) {
        Err(ProposalError::TooManyItems { got, max }) => {
            assert_eq!(got, 6);
            assert_eq!(max, 5);
        }
        other => panic!("expected TooManyItems, got {other:?}"),
    }
}

#[test]
fn update_status_requires_target_and_matching_vocabulary() {
    let mut proposal = empty_proposal();
    proposal.structured_items.push(StructuredChange {
        action: "update_status".to_string(),
        content: None,
        goal_id: None,
        task_id: None,
        new_status: Some("completed".to_string()),
        tags: Vec::new(),
        priority: None,
        due_date: None,
    });
    assert!(engine().validate(&proposal).is_err());

    // goal_id present means goal vocabulary; in_progress is task-only.
    proposal.structured_items[0].goal_id = Some("goal_1".to_string());
    proposal.structured_items[0].new_status = Some("in_progress".to_string());
    assert!(engine().validate(&proposal).is_err());

    proposal.structured_items[0].new_status = Some("completed".to_string());
    assert!(engine().validate(&proposal).is_ok());
}

#[test]
fn add_actions_require_content_and_valid_fields() {
    let mut proposal = empty_proposal();
    proposal.structured_items.push(goal_item("  "));
    assert!(engine().validate(&proposal).is_err());

    proposal.structured_items[0] = goal_item("Real goal");
    proposal.structured_items[0].priority = Some("urgent".to_string());
    assert!(engine().validate(&proposal).is_err());

    proposal.structured_items[0].priority = Some("low".to_string());
    assert!(engine().validate(&proposal).is_ok());
}

#[test]
fn narrative_entry_type_is_checked() {
    let mut proposal = empty_proposal();
    proposal.narrative_items.push(NarrativeChange {
        action: "add_entry".to_string(),
        content: Some("A note".to_string()),
        entry_type: "diary".to_string(),
        tags: Vec::new(),
        mood: None,
        location: None,
        weather: None,
    });
    assert!(engine().validate(&proposal).is_err());

    proposal.narrative_items[0].entry_type = "gratitude".to_string();
    assert!(engine().validate(&proposal).is_ok());
}

#[test]
fn confidence_out_of_range_fails_validation() {
    let mut proposal = empty_proposal();
    proposal.confidence = 1.5;
    assert!(matches!(
        engine().validate(&proposal),
        Err(ProposalError::ConfidenceOutOfRange(_))
    ));
}
