//! Telos-Core: append-only personal memory with ranked retrieval and an
//! audited proposal pipeline.
//!
//! - Two ledgers: a structured goal/task store (`services::telos`) and a
//!   narrative journal store (`services::journal`), both append-only files.
//! - A context builder (`services::context`) scores ledger entries against a
//!   free-text query and renders a size-bounded block for a model prompt.
//! - A proposal engine (`services::proposals`) turns model output into a
//!   validated set of mutation intents, which the mutation engine
//!   (`services::mutation`) applies with a per-item audit trail.
//! - `commands::Assistant` wires the whole flow behind one facade.

pub mod commands;
pub mod config;
pub mod services;
pub mod utils;

pub use commands::Assistant;
pub use config::AssistantConfig;
