// src/commands/api.rs
//! Embedding-friendly facade.
//!
//! `Assistant` owns every store and engine and is the only type an embedding
//! application needs. All paths come from `AssistantConfig`; nothing here
//! reads globals or environment.

use anyhow::Result;
use std::path::Path;

use crate::config::{AssistantConfig, GeneratorConfig};
use crate::services::context::{ContextBuilder, ContextKind, ContextReport, GoalProgress};
use crate::services::generator::{propose_with_retry, TextGenerator};
use crate::services::journal::{JournalBlock, JournalStore};
use crate::services::mailroom::{MailSource, Mailroom, TriageReport};
use crate::services::mutation::{ApplyOutcome, ChangeRecord, MutationEngine};
use crate::services::proposals::{ChangeProposal, ProposalEngine};
use crate::services::telos::{GoalRecord, TaskRecord, TelosStore};

pub struct Assistant {
    config: AssistantConfig,
    telos: TelosStore,
    journal: JournalStore,
    context: ContextBuilder,
    proposals: ProposalEngine,
    mutations: MutationEngine,
    mailroom: Mailroom,
}

impl Assistant {
    /// Open all stores under `root`, reading `config.toml` if present.
    pub fn open(root: &Path) -> Result<Self> {
        Self::with_config(AssistantConfig::load(root)?)
    }

    pub fn with_config(config: AssistantConfig) -> Result<Self> {
        let telos = TelosStore::open(&config.memory.telos_file)?;
        let journal = JournalStore::open(&config.memory.journal_file)?;
        let context = ContextBuilder::new(config.context.clone());
        let proposals = ProposalEngine::new(config.proposals.clone());
        let mutations = MutationEngine::open(&config.memory.changes_file, config.proposals.clone())?;
        let mailroom = Mailroom::open(&config.memory.processed_mail_file, config.mail.clone())?;
        Ok(Self {
            config,
            telos,
            journal,
            context,
            proposals,
            mutations,
            mailroom,
        })
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Backend settings for whoever constructs the `TextGenerator` handed to
    /// `propose` or `triage_mail`: which model to ask for and how long to
    /// wait before giving up.
    pub fn generator_config(&self) -> &GeneratorConfig {
        &self.config.generator
    }

    // ---- direct store operations -------------------------------------------

    pub fn add_goal(
        &mut self,
        content: &str,
        tags: &[String],
        priority: &str,
        due_date: Option<&str>,
    ) -> Result<String> {
        self.telos.add_goal(content, tags, priority, due_date)
    }

    pub fn add_task(
        &mut self,
        content: &str,
        parent_goal: Option<&str>,
        tags: &[String],
        priority: &str,
        due_date: Option<&str>,
    ) -> Result<String> {
        self.telos.add_task(content, parent_goal, tags, priority, due_date)
    }

    /// Returns `Ok(false)` when no record with that id exists.
    pub fn update_status(&mut self, id: &str, new_status: &str) -> Result<bool> {
        self.telos.update_status(id, new_status)
    }

    pub fn add_journal_entry(
        &mut self,
        content: &str,
        entry_type: &str,
        tags: &[String],
        mood: Option<&str>,
        location: Option<&str>,
        weather: Option<&str>,
    ) -> Result<String> {
        self.journal
            .add_entry(content, entry_type, tags, mood, location, weather)
    }

    pub fn goals(&self, status: Option<&str>) -> Result<Vec<GoalRecord>> {
        self.telos.get_goals(status)
    }

    pub fn tasks(
        &self,
        status: Option<&str>,
        parent_goal: Option<&str>,
    ) -> Result<Vec<TaskRecord>> {
        self.telos.get_tasks(status, parent_goal)
    }

    pub fn recent_journal_entries(&self, limit: usize) -> Result<Vec<JournalBlock>> {
        self.journal.get_recent_entries(limit)
    }

    pub fn search_journal(
        &self,
        query: Option<&str>,
        entry_type: Option<&str>,
        tags: Option<&[String]>,
        date_from: Option<&str>,
        date_to: Option<&str>,
    ) -> Result<Vec<JournalBlock>> {
        self.journal
            .search_entries(query, entry_type, tags, date_from, date_to)
    }

    // ---- context and proposals ---------------------------------------------

    pub fn build_context(&self, query: &str, kind: ContextKind) -> Result<ContextReport> {
        self.context
            .build_context(&self.telos, &self.journal, query, kind)
    }

    /// Render the full model prompt: ranked context plus the reply contract.
    pub fn compose_prompt(&self, query: &str, kind: ContextKind) -> Result<(String, ContextReport)> {
        let report = self.build_context(query, kind)?;
        let prompt = format!(
            "You are a personal assistant with access to the user's goals, tasks, \
             and journal.\n\n\
             # Context\n{}\n\n\
             # Request\n{}\n\n\
             # Reply format\n\
             Reply with a ```json block shaped as:\n\
             {{\"reasoning\": \"...\", \"confidence\": 0.0,\n \
             \"structured_items\": [{{\"action\": \"add_goal|add_task|update_status\", \
             \"content\": \"...\", \"goal_id\": null, \"task_id\": null, \
             \"new_status\": null, \"tags\": [], \"priority\": \"low|medium|high\"}}],\n \
             \"narrative_items\": [{{\"action\": \"add_entry\", \"content\": \"...\", \
             \"entry_type\": \"reflection|gratitude|learning|goal_review|planning\", \
             \"tags\": []}}]}}\n\
             Suggest at most {} items total. Suggest nothing if nothing is warranted.",
            report.formatted_context, query, self.config.proposals.max_items
        );
        Ok((prompt, report))
    }

    /// Build context, ask the generator, and return a validated proposal.
    /// Generation is retried on validation failure per the configured policy.
    pub fn propose(
        &self,
        generator: &dyn TextGenerator,
        query: &str,
        kind: ContextKind,
    ) -> Result<(ChangeProposal, ContextReport)> {
        let (prompt, report) = self.compose_prompt(query, kind)?;
        let proposal = propose_with_retry(
            generator,
            &self.proposals,
            &prompt,
            query,
            self.config.proposals.max_validation_retries,
        )?;
        Ok((proposal, report))
    }

    /// Parse raw model output without generating. Useful when the caller
    /// drives the model itself.
    pub fn parse_response(&self, response: &str, query: &str) -> ChangeProposal {
        self.proposals.parse_response(response, query)
    }

    /// Human-readable rendering of a proposal for an approval prompt.
    pub fn present(&self, proposal: &ChangeProposal) -> String {
        let mut out = format!(
            "Proposal {} (confidence {:.2})\nReasoning: {}\n",
            proposal.proposal_id, proposal.confidence, proposal.reasoning
        );
        if proposal.is_empty() {
            out.push_str("No changes proposed.\n");
            return out;
        }
        let mut n = 0usize;
        for item in &proposal.structured_items {
            n += 1;
            match item.action.as_str() {
                "update_status" => {
                    let target = item
                        .goal_id
                        .as_deref()
                        .or(item.task_id.as_deref())
                        .unwrap_or("?");
                    out.push_str(&format!(
                        "  {}. {} {} -> {}\n",
                        n,
                        item.action,
                        target,
                        item.new_status.as_deref().unwrap_or("?")
                    ));
                }
                _ => {
                    out.push_str(&format!(
                        "  {}. {}: {}\n",
                        n,
                        item.action,
                        item.content.as_deref().unwrap_or("")
                    ));
                }
            }
        }
        for item in &proposal.narrative_items {
            n += 1;
            out.push_str(&format!(
                "  {}. add {} entry: {}\n",
                n,
                item.entry_type,
                item.content.as_deref().unwrap_or("")
            ));
        }
        out
    }

    /// Apply an approved proposal; every item lands in the audit trail.
    pub fn apply(&mut self, proposal: &ChangeProposal, approved: bool) -> Result<ApplyOutcome> {
        self.mutations
            .apply(&mut self.telos, &mut self.journal, proposal, approved)
    }

    pub fn change_history(&self, limit: usize) -> Result<Vec<ChangeRecord>> {
        self.mutations.get_change_history(limit)
    }

    pub fn proposal_history(&self, limit: usize) -> Result<Vec<String>> {
        self.mutations.proposal_history(limit)
    }

    // ---- analysis and mail -------------------------------------------------

    pub fn goal_progress(&self, goal_content: &str, days_back: i64) -> Result<GoalProgress> {
        self.context
            .analyze_goal_progress(&self.journal, goal_content, days_back)
    }

    pub fn triage_mail(
        &self,
        source: &dyn MailSource,
        generator: &dyn TextGenerator,
    ) -> Result<TriageReport> {
        self.mailroom.triage(source, generator, &self.telos)
    }
}
