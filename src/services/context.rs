// src/services/context.rs
//! Retrieval and ranking engine.
//!
//! Scores ledger entries against a free-text query, partitions the survivors
//! into work/personal buckets, and renders a size-bounded context block for a
//! model prompt. Only creation records are scored; status annotations never
//! enter the ranking. The whole pass is deterministic for a fixed store state,
//! query, and clock.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::config::ContextConfig;
use crate::services::journal::{JournalBlock, JournalStore};
use crate::services::telos::{TelosEntry, TelosStore};
use crate::utils::timestamps::parse_timestamp;

const WORK_KEYWORDS: &[&str] = &[
    "work", "professional", "career", "project", "meeting", "deadline", "business",
];
const PERSONAL_KEYWORDS: &[&str] = &[
    "personal", "family", "health", "home", "friends", "leisure", "hobby",
];

const PROGRESS_KEYWORDS: &[&str] = &[
    "progress", "worked on", "started", "began", "continued", "advanced", "improved", "developed",
];
const COMPLETION_KEYWORDS: &[&str] = &[
    "completed", "finished", "done", "achieved", "accomplished", "succeeded",
];

const TRUNCATION_NOTICE: &str = "\n\n[Context truncated due to size limits]";
const TRUNCATION_RESERVE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextKind {
    Work,
    Personal,
    #[default]
    Balanced,
}

/// Rendered context plus the counts callers report alongside it.
#[derive(Debug, Clone)]
pub struct ContextReport {
    pub query: String,
    pub context_kind: ContextKind,
    pub date_range_days: i64,
    pub total_entries: usize,
    pub work_entries: usize,
    pub personal_entries: usize,
    pub context_size_chars: usize,
    pub estimated_tokens: usize,
    pub formatted_context: String,
}

/// Journal-derived progress signals for one goal.
#[derive(Debug, Clone)]
pub struct GoalProgress {
    pub goal_content: String,
    pub time_period_days: i64,
    pub total_mentions: usize,
    pub progress_indicators: usize,
    pub completion_signals: usize,
    pub recent_activity: usize,
    pub insights: Vec<String>,
    pub recommended_action: String,
}

struct ScoredStructured {
    kind: &'static str,
    timestamp: String,
    content: String,
    status: String,
    tags: Vec<String>,
    score: f64,
}

struct ScoredNarrative {
    block: JournalBlock,
    score: f64,
}

enum Category {
    Work,
    Personal,
    Neutral,
}

pub struct ContextBuilder {
    cfg: ContextConfig,
}

impl ContextBuilder {
    pub fn new(cfg: ContextConfig) -> Self {
        Self { cfg }
    }

    /// Build ranked, bucketed, size-bounded context for `query` using the
    /// configured entry cap and date range.
    pub fn build_context(
        &self,
        telos: &TelosStore,
        journal: &JournalStore,
        query: &str,
        kind: ContextKind,
    ) -> Result<ContextReport> {
        self.build_context_with(
            telos,
            journal,
            query,
            kind,
            self.cfg.max_entries_per_store,
            self.cfg.date_range_days,
        )
    }

    pub fn build_context_with(
        &self,
        telos: &TelosStore,
        journal: &JournalStore,
        query: &str,
        kind: ContextKind,
        max_entries: usize,
        date_range_days: i64,
    ) -> Result<ContextReport> {
        tracing::info!(query = %preview(query, 50), "building context");
        let now = Utc::now();
        let cutoff = now - Duration::days(date_range_days);
        let query_lower = query.to_lowercase();

        let structured = self.rank_structured(telos, &query_lower, cutoff, now, max_entries)?;
        let narrative = self.rank_narrative(journal, &query_lower, cutoff, now, max_entries)?;
        let total_entries = structured.len() + narrative.len();

        // Bucket into work/personal, routing neutral entries per the requested
        // context kind. Balanced routing fills whichever bucket has fewer
        // entries so far, per store, work winning ties.
        let mut work_structured = Vec::new();
        let mut personal_structured = Vec::new();
        for entry in structured {
            let category = classify(&entry.tags, &entry.content);
            route(
                entry,
                category,
                kind,
                &mut work_structured,
                &mut personal_structured,
            );
        }
        let mut work_narrative = Vec::new();
        let mut personal_narrative = Vec::new();
        for entry in narrative {
            let category = classify(&entry.block.meta.tags, &entry.block.content);
            route(
                entry,
                category,
                kind,
                &mut work_narrative,
                &mut personal_narrative,
            );
        }

        let work_entries = work_structured.len() + work_narrative.len();
        let personal_entries = personal_structured.len() + personal_narrative.len();

        let rendered = self.render(
            &work_structured,
            &work_narrative,
            &personal_structured,
            &personal_narrative,
        );
        let formatted_context = self.enforce_size_limit(rendered);
        let context_size_chars = formatted_context.chars().count();

        tracing::info!(
            total_entries,
            context_size_chars,
            "built context ({} est. tokens)",
            context_size_chars / 4
        );

        Ok(ContextReport {
            query: query.to_string(),
            context_kind: kind,
            date_range_days,
            total_entries,
            work_entries,
            personal_entries,
            context_size_chars,
            estimated_tokens: context_size_chars / 4,
            formatted_context,
        })
    }

    fn rank_structured(
        &self,
        telos: &TelosStore,
        query_lower: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        max_entries: usize,
    ) -> Result<Vec<ScoredStructured>> {
        let mut scored = Vec::new();
        for entry in telos.get_all_entries()? {
            let (kind, id, timestamp, content, status, tags) = match entry {
                TelosEntry::Goal(g) => ("Goal", g.id, g.timestamp, g.content, g.status, g.tags),
                TelosEntry::Task(t) => ("Task", t.id, t.timestamp, t.content, t.status, t.tags),
                TelosEntry::StatusUpdate(_) => continue,
            };
            let Some(ts) = parse_timestamp(&timestamp) else {
                continue;
            };
            if ts < cutoff {
                continue;
            }
            let score = score_entry(&content, &tags, query_lower, ts, now, 0.8, 0.5, None);
            if score > 0.0 {
                // Render the resolved current status, not the creation snapshot.
                let status = telos
                    .current_status(&id)
                    .map(|s| s.to_string())
                    .unwrap_or(status);
                scored.push(ScoredStructured {
                    kind,
                    timestamp,
                    content,
                    status,
                    tags,
                    score,
                });
            }
        }
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        scored.truncate(max_entries);
        Ok(scored)
    }

    fn rank_narrative(
        &self,
        journal: &JournalStore,
        query_lower: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        max_entries: usize,
    ) -> Result<Vec<ScoredNarrative>> {
        let mut scored = Vec::new();
        for block in journal.get_all_entries()? {
            let Some(ts) = parse_timestamp(&block.meta.timestamp) else {
                continue;
            };
            if ts < cutoff {
                continue;
            }
            let type_boost = match block.meta.entry_type.as_str() {
                "reflection" | "learning" => 0.1,
                "planning" => 0.2,
                "goal_review" => 0.3,
                _ => 0.0,
            };
            let score = score_entry(
                &block.content,
                &block.meta.tags,
                query_lower,
                ts,
                now,
                0.7,
                0.4,
                Some(type_boost),
            );
            if score > 0.0 {
                scored.push(ScoredNarrative { block, score });
            }
        }
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.block.meta.timestamp.cmp(&a.block.meta.timestamp))
        });
        scored.truncate(max_entries);
        Ok(scored)
    }

    /// Sections in fixed order: work-structured, work-narrative,
    /// personal-structured, personal-narrative; empty buckets are absent.
    fn render(
        &self,
        work_structured: &[ScoredStructured],
        work_narrative: &[ScoredNarrative],
        personal_structured: &[ScoredStructured],
        personal_narrative: &[ScoredNarrative],
    ) -> String {
        let mut sections = Vec::new();

        if !work_structured.is_empty() {
            sections.push("## Work Goals & Tasks".to_string());
            sections.extend(work_structured.iter().map(format_structured));
        }
        if !work_narrative.is_empty() {
            sections.push("## Work Reflections".to_string());
            sections.extend(work_narrative.iter().map(|e| self.format_narrative(e)));
        }
        if !personal_structured.is_empty() {
            sections.push("## Personal Goals & Tasks".to_string());
            sections.extend(personal_structured.iter().map(format_structured));
        }
        if !personal_narrative.is_empty() {
            sections.push("## Personal Reflections".to_string());
            sections.extend(personal_narrative.iter().map(|e| self.format_narrative(e)));
        }

        sections.join("\n\n")
    }

    fn format_narrative(&self, entry: &ScoredNarrative) -> String {
        let meta = &entry.block.meta;
        let tag_str = if meta.tags.is_empty() {
            String::new()
        } else {
            format!(" (tags: {})", meta.tags.join(", "))
        };
        let mut content = entry.block.content.clone();
        if content.chars().count() > self.cfg.excerpt_chars {
            content = content.chars().take(self.cfg.excerpt_chars).collect();
            content.push_str("...");
        }
        format!(
            "**{}** - {}{}\n{}",
            title_case(&meta.entry_type),
            date_prefix(&meta.timestamp),
            tag_str,
            content
        )
    }

    /// Hard truncation to the character budget. Entries simply fall off the
    /// end; no re-ranking happens here.
    fn enforce_size_limit(&self, context: String) -> String {
        let budget = self.cfg.max_context_chars();
        let len = context.chars().count();
        if len <= budget {
            return context;
        }
        let keep = budget.saturating_sub(TRUNCATION_RESERVE);
        let mut truncated: String = context.chars().take(keep).collect();
        truncated.push_str(TRUNCATION_NOTICE);
        tracing::warn!(from = len, to = truncated.chars().count(), "context truncated");
        truncated
    }

    /// Scan journal entries for signals about one goal: mere mentions,
    /// progress-keyword hits, and completion-keyword hits, plus canned
    /// insights and a recommended action derived from the three counts.
    pub fn analyze_goal_progress(
        &self,
        journal: &JournalStore,
        goal_content: &str,
        days_back: i64,
    ) -> Result<GoalProgress> {
        let now = Utc::now();
        let cutoff = (now - Duration::days(days_back)).to_rfc3339();
        let entries = journal.search_entries(None, None, None, Some(&cutoff), None)?;

        let goal_lower = goal_content.to_lowercase();
        let goal_words: Vec<&str> = goal_lower
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .collect();

        let week_ago = now - Duration::days(7);
        let mut mentions = 0usize;
        let mut progress = 0usize;
        let mut completions = 0usize;
        let mut recent = 0usize;

        for entry in &entries {
            let content = entry.content.to_lowercase();
            if !goal_words.iter().any(|w| content.contains(w)) {
                continue;
            }
            mentions += 1;
            if PROGRESS_KEYWORDS.iter().any(|k| content.contains(k)) {
                progress += 1;
            }
            if COMPLETION_KEYWORDS.iter().any(|k| content.contains(k)) {
                completions += 1;
            }
            if let Some(ts) = parse_timestamp(&entry.meta.timestamp) {
                if ts > week_ago {
                    recent += 1;
                }
            }
        }

        Ok(GoalProgress {
            goal_content: goal_content.to_string(),
            time_period_days: days_back,
            total_mentions: mentions,
            progress_indicators: progress,
            completion_signals: completions,
            recent_activity: recent,
            insights: goal_insights(mentions, progress, completions),
            recommended_action: recommend_action(completions, progress, mentions),
        })
    }
}

/// Weighted relevance heuristic, clamped to [0, 1].
///
/// Exact substring match scores 1.0; the first tag contained in (or
/// containing) the query adds `tag_weight`; fractional word overlap adds up to
/// `overlap_cap`; entries from the last 30 days get a linearly decaying bonus
/// of at most 0.1.
#[allow(clippy::too_many_arguments)]
fn score_entry(
    content: &str,
    tags: &[String],
    query_lower: &str,
    entry_ts: DateTime<Utc>,
    now: DateTime<Utc>,
    tag_weight: f64,
    overlap_cap: f64,
    type_boost: Option<f64>,
) -> f64 {
    let mut score = 0.0;
    let content_lower = content.to_lowercase();

    if content_lower.contains(query_lower) {
        score += 1.0;
    }

    for tag in tags {
        let tag = tag.to_lowercase();
        if query_lower.contains(&tag) || tag.contains(query_lower) {
            score += tag_weight;
            break;
        }
    }

    if let Some(boost) = type_boost {
        score += boost;
    }

    let query_words: HashSet<&str> = query_lower.split_whitespace().collect();
    if !query_words.is_empty() {
        let content_words: HashSet<String> = content_lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .map(|w| w.to_string())
            .collect();
        let matching = query_words
            .iter()
            .filter(|w| content_words.contains(**w))
            .count();
        if matching > 0 {
            let word_score = matching as f64 / query_words.len() as f64;
            score += (word_score * overlap_cap).min(overlap_cap);
        }
    }

    let days_old = (now - entry_ts).num_days();
    let recency = (0.1 * (30 - days_old) as f64 / 30.0).max(0.0);
    score += recency;

    score.min(1.0)
}

/// Count work vs personal keyword hits over tags + content; strict majority
/// wins, ties are neutral.
fn classify(tags: &[String], content: &str) -> Category {
    let tag_text = tags.join(" ").to_lowercase();
    let content = content.to_lowercase();
    let hits = |keywords: &[&str]| {
        keywords
            .iter()
            .filter(|k| tag_text.contains(*k) || content.contains(*k))
            .count()
    };
    let work = hits(WORK_KEYWORDS);
    let personal = hits(PERSONAL_KEYWORDS);
    if work > personal {
        Category::Work
    } else if personal > work {
        Category::Personal
    } else {
        Category::Neutral
    }
}

fn route<T>(entry: T, category: Category, kind: ContextKind, work: &mut Vec<T>, personal: &mut Vec<T>) {
    match category {
        Category::Work => work.push(entry),
        Category::Personal => personal.push(entry),
        Category::Neutral => match kind {
            ContextKind::Work => work.push(entry),
            ContextKind::Personal => personal.push(entry),
            ContextKind::Balanced => {
                if work.len() <= personal.len() {
                    work.push(entry);
                } else {
                    personal.push(entry);
                }
            }
        },
    }
}

fn format_structured(entry: &ScoredStructured) -> String {
    let tag_str = if entry.tags.is_empty() {
        String::new()
    } else {
        format!(" (tags: {})", entry.tags.join(", "))
    };
    format!(
        "**{}** [{}] - {}{}\n{}",
        entry.kind,
        entry.status,
        date_prefix(&entry.timestamp),
        tag_str,
        entry.content
    )
}

fn goal_insights(mentions: usize, progress: usize, completions: usize) -> Vec<String> {
    let mut insights = Vec::new();
    if completions > 0 {
        insights.push(format!(
            "Found {completions} completion signal(s) - goal may be finished!"
        ));
    } else if progress > 0 {
        insights.push(format!(
            "Found {progress} progress indicator(s) - active work ongoing"
        ));
    } else if mentions > 0 {
        insights.push(format!(
            "Goal mentioned {mentions} time(s) - staying top of mind"
        ));
    }
    if mentions == 0 {
        insights.push("No recent journal mentions - consider if this goal is still relevant".into());
    } else if mentions > 5 {
        insights.push("Frequently mentioned - this seems to be a high-priority goal".into());
    }
    insights
}

fn recommend_action(completions: usize, progress: usize, mentions: usize) -> String {
    if completions > 0 {
        "Consider marking this goal as completed".into()
    } else if progress > 2 {
        "Goal appears active - keep up the good work!".into()
    } else if progress > 0 {
        "Some progress detected - consider what next steps to take".into()
    } else if mentions > 0 {
        "Goal is being thought about - time to take action?".into()
    } else {
        "No recent activity - review if this goal should be updated or removed".into()
    }
}

fn title_case(s: &str) -> String {
    s.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("_")
}

fn date_prefix(ts: &str) -> &str {
    ts.get(..10).unwrap_or(ts)
}

fn preview(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
