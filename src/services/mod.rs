// src/services/mod.rs

pub mod context;   // retrieval/ranking engine + goal-progress analysis
pub mod generator; // TextGenerator seam, mock strategy, validation-retry wrapper
pub mod journal;   // narrative ledger (Markdown blocks)
pub mod mailroom;  // email triage: dedupe ledger + duplicate filter
pub mod mutation;  // applies approved proposals with a per-item audit trail
pub mod proposals; // parses model output into validated change proposals
pub mod telos;     // structured ledger (goal/task JSONL), the only telos.jsonl writer

// Public API
pub use context::{ContextBuilder, ContextKind, ContextReport, GoalProgress};
pub use generator::{propose_with_retry, GeneratorError, MockGenerator, TextGenerator};
pub use journal::{JournalBlock, JournalError, JournalMeta, JournalStore};
pub use mailroom::{EmailMessage, MailError, MailSource, Mailroom, SuggestedTodo, TriageReport};
pub use mutation::{ApplyOutcome, ChangeRecord, MutationEngine, MutationError};
pub use proposals::{
    ChangeProposal, NarrativeChange, ProposalEngine, ProposalError, StructuredChange,
};
pub use telos::{GoalRecord, StatusUpdate, TaskRecord, TelosEntry, TelosError, TelosStore};
